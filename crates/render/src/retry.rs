use std::time::Duration;

use rand::Rng;
use tracing::warn;

use atlas_core::{CrawlError, RenderResult};

use crate::{RenderJob, Renderer};

/// Backoff schedule for transient render failures, capped at three attempts.
const BACKOFF_SECONDS: [u64; 3] = [1, 2, 5];
const MAX_ATTEMPTS: u32 = 3;

/// Statuses worth a second try. Everything else in 4xx is terminal.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Drive a renderer with the render-phase retry policy: transient statuses
/// and network errors retry with backoff, other failures surface at once.
/// The last attempt's result is returned even if its status is still bad;
/// a page with a 503 is still a page.
pub async fn render_with_retry(
    renderer: &mut dyn Renderer,
    job: &RenderJob,
) -> Result<RenderResult, CrawlError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match renderer.render(job).await {
            Ok(result) => {
                if is_transient_status(result.status_code) && attempt < MAX_ATTEMPTS {
                    warn!(
                        url = %job.url,
                        status = result.status_code,
                        attempt,
                        "transient status, retrying"
                    );
                    backoff(attempt).await;
                    continue;
                }
                return Ok(result);
            }
            Err(CrawlError::RenderTransient { url, status, message }) => {
                if attempt < MAX_ATTEMPTS {
                    warn!(url = %url, attempt, "transient render failure, retrying: {message}");
                    backoff(attempt).await;
                    continue;
                }
                // Retries exhausted; this is now fatal for the URL.
                return Err(CrawlError::RenderFatal {
                    url,
                    status,
                    message: format!("{message} (after {attempt} attempts)"),
                });
            }
            Err(other) => return Err(other),
        }
    }
}

async fn backoff(attempt: u32) {
    let base = BACKOFF_SECONDS[((attempt - 1) as usize).min(BACKOFF_SECONDS.len() - 1)];
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    tokio::time::sleep(Duration::from_secs(base) + Duration::from_millis(jitter_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atlas_core::{NavEndReason, RenderMode};

    fn result_with_status(status: u16) -> RenderResult {
        RenderResult {
            url: "https://h/".into(),
            final_url: "https://h/".into(),
            status_code: status,
            content_type: Some("text/html".into()),
            raw_body: b"<html></html>".to_vec(),
            raw_html_hash: crate::sha256_hex(b"<html></html>"),
            live_dom: None,
            dom_hash: None,
            nav_end_reason: NavEndReason::Load,
            redirect_chain: vec![],
            fetch_ms: 1,
            render_ms: 0,
            screenshots: None,
            favicon: None,
            console_logs: vec![],
            computed_text_styles: vec![],
            request_count: 1,
            failed_request_count: 0,
            first_paint_ms: None,
            first_contentful_paint_ms: None,
            dom_interactive_ms: None,
        }
    }

    /// Renderer that fails N times then succeeds.
    struct Flaky {
        failures_left: u32,
        attempts: u32,
    }

    #[async_trait]
    impl Renderer for Flaky {
        fn mode(&self) -> RenderMode {
            RenderMode::Raw
        }

        async fn render(&mut self, job: &RenderJob) -> Result<RenderResult, CrawlError> {
            self.attempts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(CrawlError::RenderTransient {
                    url: job.url.as_str().to_string(),
                    status: None,
                    message: "connection reset".into(),
                });
            }
            Ok(result_with_status(200))
        }
    }

    struct AlwaysStatus(u16, u32);

    #[async_trait]
    impl Renderer for AlwaysStatus {
        fn mode(&self) -> RenderMode {
            RenderMode::Raw
        }

        async fn render(&mut self, _job: &RenderJob) -> Result<RenderResult, CrawlError> {
            self.1 += 1;
            Ok(result_with_status(self.0))
        }
    }

    fn job() -> RenderJob {
        RenderJob {
            url: atlas_core::url::NormalizedUrl::parse(
                "https://h/",
                &atlas_core::url::QueryParamPolicy::Keep,
                true,
            )
            .unwrap(),
            depth: 0,
            discovered_from: None,
        }
    }

    #[test]
    fn transient_statuses() {
        for s in [429, 500, 502, 503, 504] {
            assert!(is_transient_status(s));
        }
        for s in [200, 301, 400, 403, 404, 410] {
            assert!(!is_transient_status(s));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let mut renderer = Flaky {
            failures_left: 2,
            attempts: 0,
        };
        let result = render_with_retry(&mut renderer, &job()).await.unwrap();
        assert_eq!(result.status_code, 200);
        assert_eq!(renderer.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_and_escalates_to_fatal() {
        let mut renderer = Flaky {
            failures_left: 10,
            attempts: 0,
        };
        let err = render_with_retry(&mut renderer, &job()).await.unwrap_err();
        assert!(matches!(err, CrawlError::RenderFatal { .. }));
        assert_eq!(renderer.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_status_retries_then_returns_result() {
        let mut renderer = AlwaysStatus(503, 0);
        let result = render_with_retry(&mut renderer, &job()).await.unwrap();
        assert_eq!(result.status_code, 503);
        assert_eq!(renderer.1, 3);
    }

    #[tokio::test]
    async fn terminal_status_does_not_retry() {
        let mut renderer = AlwaysStatus(404, 0);
        let result = render_with_retry(&mut renderer, &job()).await.unwrap();
        assert_eq!(result.status_code, 404);
        assert_eq!(renderer.1, 1);
    }
}
