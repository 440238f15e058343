use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use texting_robots::{get_robots_url, Robot};
use tracing::{debug, warn};

use atlas_core::url::NormalizedUrl;

/// Outcome of a robots check for one URL.
#[derive(Debug, Clone)]
pub struct RobotsDecision {
    pub allowed: bool,
    /// Why the gate answered without consulting rules, when it did.
    pub bypass: Option<&'static str>,
}

impl RobotsDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            bypass: None,
        }
    }
}

enum CachedRobots {
    /// Parsed rules for our user agent.
    Rules {
        robot: Robot,
        sitemaps: Vec<String>,
        crawl_delay: Option<f32>,
    },
    /// No usable robots.txt. `expires` is set for fetch failures so a flaky
    /// origin gets re-asked; a definitive 404 never expires.
    AllowAll { expires: Option<Instant> },
}

/// Per-origin robots.txt cache. One fetch per origin, memoized for the
/// crawl; answers are cheap after that.
pub struct RobotsCache {
    client: reqwest::Client,
    cache: DashMap<String, Arc<CachedRobots>>,
    user_agent: String,
    respect: bool,
    override_used: bool,
    negative_ttl: Duration,
}

impl RobotsCache {
    pub fn new(
        user_agent: &str,
        respect: bool,
        override_used: bool,
        negative_ttl: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            cache: DashMap::new(),
            user_agent: user_agent.to_string(),
            respect,
            override_used,
            negative_ttl,
        })
    }

    /// Whether the crawl may fetch `url`. Disrespect and explicit override
    /// both short-circuit to allow; the override is recorded in the manifest
    /// by the archive writer, not here.
    pub async fn should_fetch(&self, url: &NormalizedUrl) -> RobotsDecision {
        if !self.respect {
            return RobotsDecision {
                allowed: true,
                bypass: Some("respect=false"),
            };
        }
        if self.override_used {
            return RobotsDecision {
                allowed: true,
                bypass: Some("override"),
            };
        }
        let entry = self.get_or_fetch(url).await;
        match entry.as_ref() {
            CachedRobots::AllowAll { .. } => RobotsDecision::allow(),
            CachedRobots::Rules { robot, .. } => RobotsDecision {
                allowed: robot.allowed(url.as_str()),
                bypass: None,
            },
        }
    }

    /// Sitemap URLs advertised by the origin's robots.txt. Collected, never
    /// enforced.
    pub async fn sitemaps(&self, url: &NormalizedUrl) -> Vec<String> {
        match self.get_or_fetch(url).await.as_ref() {
            CachedRobots::Rules { sitemaps, .. } => sitemaps.clone(),
            CachedRobots::AllowAll { .. } => Vec::new(),
        }
    }

    /// Crawl-delay is advisory; the token bucket governs pacing.
    pub async fn crawl_delay(&self, url: &NormalizedUrl) -> Option<f32> {
        match self.get_or_fetch(url).await.as_ref() {
            CachedRobots::Rules { crawl_delay, .. } => *crawl_delay,
            CachedRobots::AllowAll { .. } => None,
        }
    }

    async fn get_or_fetch(&self, url: &NormalizedUrl) -> Arc<CachedRobots> {
        let origin = url.origin();
        if let Some(cached) = self.cache.get(&origin) {
            let expired = matches!(
                cached.as_ref(),
                CachedRobots::AllowAll {
                    expires: Some(at)
                } if *at <= Instant::now()
            );
            if !expired {
                return cached.clone();
            }
            drop(cached);
            self.cache.remove(&origin);
        }

        let fetched = Arc::new(self.fetch(url).await);
        self.cache.insert(origin, fetched.clone());
        fetched
    }

    async fn fetch(&self, url: &NormalizedUrl) -> CachedRobots {
        let robots_url = match get_robots_url(url.as_str()) {
            Ok(u) => u,
            Err(e) => {
                warn!(url = %url, "could not derive robots.txt URL: {e}");
                return CachedRobots::AllowAll { expires: None };
            }
        };

        let response = match self.client.get(&robots_url).send().await {
            Ok(r) => r,
            Err(e) => {
                // Fetch failures never fail the crawl; allow with a short
                // negative TTL so a recovering origin gets re-asked.
                warn!(robots_url = %robots_url, "robots fetch failed: {e}");
                return CachedRobots::AllowAll {
                    expires: Some(Instant::now() + self.negative_ttl),
                };
            }
        };

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            debug!(robots_url = %robots_url, status = status.as_u16(), "no robots.txt, allowing all");
            return CachedRobots::AllowAll { expires: None };
        }

        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(robots_url = %robots_url, "robots body read failed: {e}");
                return CachedRobots::AllowAll {
                    expires: Some(Instant::now() + self.negative_ttl),
                };
            }
        };

        // Empty and malformed both mean "allow everything"; texting_robots
        // parses an empty body into a rule-less robot, which does exactly that.
        match Robot::new(&self.user_agent, body.as_ref()) {
            Ok(robot) => {
                let sitemaps = robot.sitemaps.clone();
                let crawl_delay = robot.delay;
                debug!(
                    robots_url = %robots_url,
                    sitemaps = sitemaps.len(),
                    ?crawl_delay,
                    "robots.txt parsed"
                );
                CachedRobots::Rules {
                    robot,
                    sitemaps,
                    crawl_delay,
                }
            }
            Err(e) => {
                warn!(robots_url = %robots_url, "malformed robots.txt, allowing all: {e}");
                CachedRobots::AllowAll { expires: None }
            }
        }
    }

    /// Seed the cache directly. Used by tests and by resume, where refetching
    /// every origin would hammer servers for no reason.
    pub fn preload(&self, origin: &str, robots_txt: &[u8]) {
        let entry = match Robot::new(&self.user_agent, robots_txt) {
            Ok(robot) => {
                let sitemaps = robot.sitemaps.clone();
                let crawl_delay = robot.delay;
                CachedRobots::Rules {
                    robot,
                    sitemaps,
                    crawl_delay,
                }
            }
            Err(_) => CachedRobots::AllowAll { expires: None },
        };
        self.cache.insert(origin.to_string(), Arc::new(entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::url::QueryParamPolicy;

    fn cache(respect: bool, override_used: bool) -> RobotsCache {
        RobotsCache::new("atlas", respect, override_used, Duration::from_secs(300)).unwrap()
    }

    fn norm(raw: &str) -> NormalizedUrl {
        NormalizedUrl::parse(raw, &QueryParamPolicy::Keep, true).unwrap()
    }

    #[tokio::test]
    async fn disallow_rules_apply() {
        let c = cache(true, false);
        c.preload("https://h", b"User-agent: *\nDisallow: /admin/\n");
        assert!(c.should_fetch(&norm("https://h/")).await.allowed);
        assert!(c.should_fetch(&norm("https://h/blog")).await.allowed);
        assert!(!c.should_fetch(&norm("https://h/admin/x")).await.allowed);
    }

    #[tokio::test]
    async fn longest_match_allow_wins_ties() {
        let c = cache(true, false);
        c.preload(
            "https://h",
            b"User-agent: *\nDisallow: /shop/\nAllow: /shop/public/\n",
        );
        assert!(!c.should_fetch(&norm("https://h/shop/cart")).await.allowed);
        assert!(c.should_fetch(&norm("https://h/shop/public/catalog")).await.allowed);
    }

    #[tokio::test]
    async fn specific_agent_group_wins() {
        let c = cache(true, false);
        c.preload(
            "https://h",
            b"User-agent: *\nDisallow: /\n\nUser-agent: atlas\nDisallow: /private/\n",
        );
        assert!(c.should_fetch(&norm("https://h/open")).await.allowed);
        assert!(!c.should_fetch(&norm("https://h/private/x")).await.allowed);
    }

    #[tokio::test]
    async fn empty_disallow_allows_everything() {
        let c = cache(true, false);
        c.preload("https://h", b"User-agent: *\nDisallow:\n");
        assert!(c.should_fetch(&norm("https://h/anything")).await.allowed);
    }

    #[tokio::test]
    async fn respect_false_bypasses() {
        let c = cache(false, false);
        c.preload("https://h", b"User-agent: *\nDisallow: /\n");
        let decision = c.should_fetch(&norm("https://h/x")).await;
        assert!(decision.allowed);
        assert_eq!(decision.bypass, Some("respect=false"));
    }

    #[tokio::test]
    async fn override_bypasses_and_is_flagged() {
        let c = cache(true, true);
        c.preload("https://h", b"User-agent: *\nDisallow: /\n");
        let decision = c.should_fetch(&norm("https://h/x")).await;
        assert!(decision.allowed);
        assert_eq!(decision.bypass, Some("override"));
    }

    #[tokio::test]
    async fn sitemaps_are_collected_not_enforced() {
        let c = cache(true, false);
        c.preload(
            "https://h",
            b"User-agent: *\nDisallow: /admin/\nSitemap: https://h/sitemap.xml\n",
        );
        let maps = c.sitemaps(&norm("https://h/")).await;
        assert_eq!(maps, vec!["https://h/sitemap.xml".to_string()]);
    }

    #[tokio::test]
    async fn crawl_delay_is_exposed() {
        let c = cache(true, false);
        c.preload("https://h", b"User-agent: *\nCrawl-delay: 2\n");
        assert_eq!(c.crawl_delay(&norm("https://h/")).await, Some(2.0));
    }
}
