use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::RenderMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlConfig {
    #[serde(default)]
    pub crawl: CrawlSection,
    #[serde(default)]
    pub filters: FilterSection,
    #[serde(default)]
    pub robots: RobotsSection,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub accessibility: AccessibilitySection,
    #[serde(default)]
    pub sitemaps: SitemapsSection,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
    #[serde(default)]
    pub privacy: PrivacySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Seed URLs. Usually supplied on the command line instead.
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Tokens per second granted to each host.
    #[serde(default = "default_rps")]
    pub per_host_rps: f64,
    /// Bucket capacity. Zero means "same as per_host_rps".
    #[serde(default)]
    pub burst: f64,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_pages: u64,
    /// -1 = unlimited, 0 = seeds only.
    #[serde(default = "default_max_depth")]
    pub max_depth: i64,
    /// Counted errors allowed before the crawl aborts. 0 = unlimited.
    #[serde(default = "default_error_budget")]
    pub error_budget: u64,
    /// How long to wait for in-flight renders on shutdown.
    #[serde(default = "default_drain_seconds")]
    pub drain_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            concurrency: default_concurrency(),
            per_host_rps: default_rps(),
            burst: 0.0,
            max_pages: 0,
            max_depth: default_max_depth(),
            error_budget: default_error_budget(),
            drain_seconds: default_drain_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl CrawlSection {
    pub fn effective_burst(&self) -> f64 {
        if self.burst > 0.0 {
            self.burst
        } else {
            self.per_host_rps
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSection {
    /// Glob patterns, or `/pattern/flags` for regex. Empty = allow everything.
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    /// keep | strip | whitelist
    #[serde(default = "default_query_policy")]
    pub query_params: String,
    /// Parameters kept when query_params = "whitelist".
    #[serde(default)]
    pub query_whitelist: Vec<String>,
    /// Remove a single trailing slash during normalization.
    #[serde(default = "default_true")]
    pub strip_trailing_slash: bool,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            query_params: default_query_policy(),
            query_whitelist: Vec::new(),
            strip_trailing_slash: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotsSection {
    #[serde(default = "default_true")]
    pub respect: bool,
    /// Set together with an override reason to crawl past robots.txt.
    /// The override is recorded in the manifest.
    #[serde(default)]
    pub override_used: bool,
    #[serde(default)]
    pub override_reason: Option<String>,
    /// Seconds an "allow all" entry from a failed fetch stays cached.
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_seconds: u64,
}

impl Default for RobotsSection {
    fn default() -> Self {
        Self {
            respect: true,
            override_used: false,
            override_reason: None,
            negative_ttl_seconds: default_negative_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSection {
    #[serde(default)]
    pub mode: RenderMode,
    #[serde(default = "default_nav_timeout")]
    pub nav_timeout_seconds: u64,
    /// A browser context is recycled after this many pages.
    #[serde(default = "default_recycle_pages")]
    pub recycle_after_pages: u32,
    #[serde(default = "default_max_requests")]
    pub max_requests_per_page: u64,
    #[serde(default = "default_max_page_bytes")]
    pub max_bytes_per_page: u64,
    /// Upper bound on the single extended wait granted to challenge pages.
    #[serde(default = "default_challenge_wait")]
    pub challenge_wait_cap_seconds: u64,
    #[serde(default = "default_desktop_viewport")]
    pub desktop_viewport: (u32, u32),
    #[serde(default = "default_mobile_viewport")]
    pub mobile_viewport: (u32, u32),
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            mode: RenderMode::default(),
            nav_timeout_seconds: default_nav_timeout(),
            recycle_after_pages: default_recycle_pages(),
            max_requests_per_page: default_max_requests(),
            max_bytes_per_page: default_max_page_bytes(),
            challenge_wait_cap_seconds: default_challenge_wait(),
            desktop_viewport: default_desktop_viewport(),
            mobile_viewport: default_mobile_viewport(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessibilitySection {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapsSection {
    /// Fetch sitemaps advertised by robots.txt and enqueue their URLs.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sitemap_urls")]
    pub max_urls: usize,
}

impl Default for SitemapsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_urls: default_sitemap_urls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSection {
    /// Part rotation threshold, uncompressed.
    #[serde(default = "default_max_part_bytes")]
    pub max_part_bytes: u64,
    /// individual | packed
    #[serde(default = "default_blob_format")]
    pub blob_format: String,
    #[serde(default = "default_flush_every")]
    pub flush_every_records: u64,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            max_part_bytes: default_max_part_bytes(),
            blob_format: default_blob_format(),
            flush_every_records: default_flush_every(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSection {
    /// Checkpoint every N visited pages.
    #[serde(default = "default_checkpoint_pages")]
    pub every_pages: u64,
    /// 0 = no time-based checkpoints.
    #[serde(default)]
    pub every_seconds: u64,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            every_pages: default_checkpoint_pages(),
            every_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacySection {
    #[serde(default = "default_true")]
    pub strip_cookies: bool,
    #[serde(default = "default_true")]
    pub strip_auth_headers: bool,
    #[serde(default = "default_true")]
    pub redact_inputs: bool,
    #[serde(default = "default_true")]
    pub redact_forms: bool,
}

impl Default for PrivacySection {
    fn default() -> Self {
        Self {
            strip_cookies: true,
            strip_auth_headers: true,
            redact_inputs: true,
            redact_forms: true,
        }
    }
}

impl CrawlConfig {
    /// SHA-256 of the key-sorted JSON form of this config with seeds sorted.
    /// serde_json maps are BTree-backed, so field order is already stable.
    pub fn config_hash(&self) -> String {
        let mut normalized = self.clone();
        normalized.crawl.seeds.sort();
        let json = serde_json::to_string(&normalized).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Environment variable overrides, applied after the TOML load.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ATLAS_CONCURRENCY") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 && n <= 128 {
                    self.crawl.concurrency = n;
                }
            }
        }
        if let Ok(v) = std::env::var("ATLAS_RPS") {
            if let Ok(n) = v.parse::<f64>() {
                if n > 0.0 {
                    self.crawl.per_host_rps = n;
                }
            }
        }
        if let Ok(v) = std::env::var("ATLAS_MODE") {
            if let Ok(mode) = v.parse::<RenderMode>() {
                self.render.mode = mode;
            }
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_rps() -> f64 {
    2.0
}
fn default_max_depth() -> i64 {
    -1
}
fn default_error_budget() -> u64 {
    100
}
fn default_drain_seconds() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("atlas/{} (site crawler)", env!("CARGO_PKG_VERSION"))
}
fn default_query_policy() -> String {
    "keep".to_string()
}
fn default_negative_ttl() -> u64 {
    300
}
fn default_nav_timeout() -> u64 {
    30
}
fn default_recycle_pages() -> u32 {
    50
}
fn default_max_requests() -> u64 {
    1000
}
fn default_max_page_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_challenge_wait() -> u64 {
    45
}
fn default_desktop_viewport() -> (u32, u32) {
    (1366, 900)
}
fn default_mobile_viewport() -> (u32, u32) {
    (390, 844)
}
fn default_sitemap_urls() -> usize {
    5000
}
fn default_max_part_bytes() -> u64 {
    150 * 1024 * 1024
}
fn default_blob_format() -> String {
    "individual".to_string()
}
fn default_flush_every() -> u64 {
    1000
}
fn default_checkpoint_pages() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CrawlConfig::default();
        assert_eq!(cfg.crawl.concurrency, 8);
        assert_eq!(cfg.crawl.max_depth, -1);
        assert_eq!(cfg.crawl.error_budget, 100);
        assert!(cfg.robots.respect);
        assert_eq!(cfg.archive.max_part_bytes, 150 * 1024 * 1024);
        assert!((cfg.crawl.effective_burst() - cfg.crawl.per_host_rps).abs() < f64::EPSILON);
    }

    #[test]
    fn config_hash_is_seed_order_independent() {
        let mut a = CrawlConfig::default();
        a.crawl.seeds = vec!["https://b.example/".into(), "https://a.example/".into()];
        let mut b = CrawlConfig::default();
        b.crawl.seeds = vec!["https://a.example/".into(), "https://b.example/".into()];
        assert_eq!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn config_hash_changes_with_content() {
        let a = CrawlConfig::default();
        let mut b = CrawlConfig::default();
        b.crawl.max_pages = 7;
        assert_ne!(a.config_hash(), b.config_hash());
    }
}
