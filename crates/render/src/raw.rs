use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use atlas_core::challenge::is_challenge_page;
use atlas_core::config::{CrawlSection, RenderSection};
use atlas_core::{CrawlError, NavEndReason, RenderMode, RenderResult};

use crate::{RenderJob, Renderer};

const MAX_REDIRECT_HOPS: usize = 10;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Everything a plain HTTP fetch can know about a URL.
#[derive(Debug)]
pub struct RawFetch {
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub redirect_chain: Vec<String>,
    pub fetch_ms: u64,
}

/// Plain HTTP fetcher. Redirects are followed by hand so the chain survives
/// into the page record; the body read is streamed against the per-page cap.
pub struct RawFetcher {
    client: reqwest::Client,
    max_body_bytes: u64,
}

impl RawFetcher {
    pub fn new(crawl: &CrawlSection, render: &RenderSection) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(crawl.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(render.nav_timeout_seconds))
            .gzip(true)
            .build()
            .map_err(|e| CrawlError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            max_body_bytes: render.max_bytes_per_page,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<RawFetch, CrawlError> {
        let started = Instant::now();
        let mut current = url.to_string();
        let mut chain: Vec<String> = Vec::new();

        for _hop in 0..MAX_REDIRECT_HOPS {
            let response = self
                .client
                .get(&current)
                .send()
                .await
                .map_err(|e| transient(url, &e.to_string()))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                match location {
                    Some(loc) => {
                        let next = response
                            .url()
                            .join(&loc)
                            .map_err(|e| CrawlError::InvalidUrl(format!("{loc}: {e}")))?;
                        chain.push(current.clone());
                        debug!(from = %current, to = %next, "following redirect");
                        current = next.to_string();
                        continue;
                    }
                    None => {
                        return Err(CrawlError::RenderFatal {
                            url: url.to_string(),
                            status: Some(status.as_u16()),
                            message: "redirect without Location header".into(),
                        })
                    }
                }
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let final_url = response.url().to_string();
            let status = status.as_u16();

            let mut body: Vec<u8> = Vec::new();
            let mut stream = response;
            while let Some(chunk) = stream
                .chunk()
                .await
                .map_err(|e| transient(url, &e.to_string()))?
            {
                if body.len() as u64 + chunk.len() as u64 > self.max_body_bytes {
                    return Err(CrawlError::PageCapExceeded {
                        url: url.to_string(),
                        message: format!("body exceeds {} bytes", self.max_body_bytes),
                    });
                }
                body.extend_from_slice(&chunk);
            }

            return Ok(RawFetch {
                final_url,
                status,
                content_type,
                body,
                redirect_chain: chain,
                fetch_ms: started.elapsed().as_millis() as u64,
            });
        }

        Err(CrawlError::RenderFatal {
            url: url.to_string(),
            status: None,
            message: format!("more than {MAX_REDIRECT_HOPS} redirects"),
        })
    }

    /// Best-effort favicon fetch for an origin. Absence is not an error.
    pub async fn fetch_favicon(&self, origin: &str) -> Option<(Vec<u8>, String)> {
        let url = format!("{origin}/favicon.ico");
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/x-icon")
            .to_string();
        let bytes = response.bytes().await.ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some((bytes.to_vec(), mime))
    }
}

fn transient(url: &str, message: &str) -> CrawlError {
    CrawlError::RenderTransient {
        url: url.to_string(),
        status: None,
        message: message.to_string(),
    }
}

/// Renderer for `raw` mode: one HTTP fetch, no JavaScript, no DOM hash.
pub struct RawRenderer {
    fetcher: RawFetcher,
}

impl RawRenderer {
    pub fn new(crawl: &CrawlSection, render: &RenderSection) -> Result<Self, CrawlError> {
        Ok(Self {
            fetcher: RawFetcher::new(crawl, render)?,
        })
    }
}

#[async_trait]
impl Renderer for RawRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Raw
    }

    async fn render(&mut self, job: &RenderJob) -> Result<RenderResult, CrawlError> {
        let fetch = self.fetcher.fetch(job.url.as_str()).await?;
        let body_text = String::from_utf8_lossy(&fetch.body);
        let nav_end_reason = if is_challenge_page(fetch.status, &body_text) {
            NavEndReason::Challenge
        } else {
            NavEndReason::Load
        };

        Ok(RenderResult {
            url: job.url.as_str().to_string(),
            final_url: fetch.final_url,
            status_code: fetch.status,
            content_type: fetch.content_type,
            raw_html_hash: sha256_hex(&fetch.body),
            raw_body: fetch.body,
            live_dom: None,
            dom_hash: None,
            nav_end_reason,
            redirect_chain: fetch.redirect_chain,
            fetch_ms: fetch.fetch_ms,
            render_ms: 0,
            screenshots: None,
            favicon: None,
            console_logs: Vec::new(),
            computed_text_styles: Vec::new(),
            request_count: 1,
            failed_request_count: u64::from(fetch.status >= 400),
            first_paint_ms: None,
            first_contentful_paint_ms: None,
            dom_interactive_ms: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn identical_bodies_hash_identically() {
        let a = sha256_hex(b"<html></html>");
        let b = sha256_hex(b"<html></html>");
        assert_eq!(a, b);
        assert_ne!(a, sha256_hex(b"<html> </html>"));
    }
}
