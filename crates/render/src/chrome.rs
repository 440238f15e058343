use std::ffi::OsString;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use tracing::{debug, info, warn};

use atlas_core::challenge::{challenge_wait_seconds, is_challenge_page};
use atlas_core::config::{CrawlSection, RenderSection};
use atlas_core::{
    ComputedTextStyle, ConsoleEntry, CrawlError, NavEndReason, RenderMode, RenderResult,
};

use crate::raw::{sha256_hex, RawFetcher};
use crate::{RenderJob, Renderer};

const SETTLE_POLL_MS: u64 = 500;
const SETTLE_STABLE_POLLS: u32 = 2;

/// Installed right after navigation so console output from post-load scripts
/// lands in a buffer we can read back.
const CONSOLE_HOOK_JS: &str = r#"
(() => {
    if (window.__atlasConsole) { return; }
    window.__atlasConsole = [];
    for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
        const original = console[level];
        console[level] = (...args) => {
            try {
                window.__atlasConsole.push({
                    level,
                    text: args.map(a => String(a)).join(' ').slice(0, 2000),
                });
            } catch (_) {}
            original.apply(console, args);
        };
    }
})()
"#;

const PERF_JS: &str = r#"
(() => {
    const nav = performance.getEntriesByType('navigation')[0];
    const paint = performance.getEntriesByType('paint');
    const res = performance.getEntriesByType('resource');
    const fp = paint.find(p => p.name === 'first-paint');
    const fcp = paint.find(p => p.name === 'first-contentful-paint');
    return JSON.stringify({
        requestCount: res.length + 1,
        failedRequestCount: res.filter(r => (r.responseStatus || 0) >= 400).length,
        firstPaintMs: fp ? Math.round(fp.startTime) : null,
        firstContentfulPaintMs: fcp ? Math.round(fcp.startTime) : null,
        domInteractiveMs: nav ? Math.round(nav.domInteractive) : null,
    });
})()
"#;

const TEXT_STYLES_JS: &str = r#"
(() => {
    const out = [];
    const walker = document.createTreeWalker(document.body || document.documentElement, NodeFilter.SHOW_ELEMENT);
    let node;
    while ((node = walker.nextNode()) && out.length < 200) {
        const hasText = Array.from(node.childNodes).some(
            c => c.nodeType === Node.TEXT_NODE && c.textContent.trim().length > 0
        );
        if (!hasText) { continue; }
        const cs = getComputedStyle(node);
        let sel = node.tagName.toLowerCase();
        if (node.id) { sel += '#' + node.id; }
        else if (node.classList.length) { sel += '.' + node.classList[0]; }
        out.push({
            selector: sel,
            fontSize: cs.fontSize,
            fontWeight: cs.fontWeight,
            color: cs.color,
            backgroundColor: cs.backgroundColor,
        });
    }
    return JSON.stringify(out);
})()
"#;

const SETTLE_JS: &str = r#"
JSON.stringify({
    readyState: document.readyState,
    resources: performance.getEntriesByType('resource').length,
})
"#;

/// Renderer for `prerender` and `full` modes. The raw fetch supplies status,
/// headers and original bytes; Chrome supplies the live DOM and, in full
/// mode, screenshots, console output, styles and timings.
pub struct ChromeRenderer {
    fetcher: RawFetcher,
    browser: Browser,
    mode: RenderMode,
    crawl: CrawlSection,
    render: RenderSection,
    pages_since_recycle: u32,
}

impl ChromeRenderer {
    pub fn new(
        crawl: &CrawlSection,
        render: &RenderSection,
        mode: RenderMode,
    ) -> Result<Self, CrawlError> {
        let browser = launch_browser(crawl, render)?;
        Ok(Self {
            fetcher: RawFetcher::new(crawl, render)?,
            browser,
            mode,
            crawl: crawl.clone(),
            render: render.clone(),
            pages_since_recycle: 0,
        })
    }

    /// Contexts are recycled after a fixed number of pages; the old browser
    /// process goes away with its accumulated tabs and heap.
    fn maybe_recycle(&mut self) -> Result<(), CrawlError> {
        if self.pages_since_recycle < self.render.recycle_after_pages {
            return Ok(());
        }
        info!(pages = self.pages_since_recycle, "recycling browser context");
        self.browser = launch_browser(&self.crawl, &self.render)?;
        self.pages_since_recycle = 0;
        Ok(())
    }

    async fn settle(&self, tab: &Arc<Tab>, deadline: Instant) -> NavEndReason {
        let mut last_resources: i64 = -1;
        let mut stable_polls: u32 = 0;
        loop {
            if Instant::now() >= deadline {
                return NavEndReason::Timeout;
            }
            let state = tab
                .evaluate(SETTLE_JS, false)
                .ok()
                .and_then(|r| r.value)
                .and_then(|v| v.as_str().map(str::to_string))
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok());

            if let Some(state) = state {
                let ready = state["readyState"].as_str() == Some("complete");
                let resources = state["resources"].as_i64().unwrap_or(0);
                if ready {
                    if resources == last_resources {
                        stable_polls += 1;
                        if stable_polls >= SETTLE_STABLE_POLLS {
                            return NavEndReason::Networkidle;
                        }
                    } else {
                        stable_polls = 0;
                    }
                    last_resources = resources;
                }
            }
            tokio::time::sleep(Duration::from_millis(SETTLE_POLL_MS)).await;
        }
    }

    fn read_console(&self, tab: &Arc<Tab>) -> Vec<ConsoleEntry> {
        tab.evaluate("JSON.stringify(window.__atlasConsole || [])", false)
            .ok()
            .and_then(|r| r.value)
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| serde_json::from_str::<Vec<ConsoleEntry>>(&s).ok())
            .unwrap_or_default()
    }

    fn read_text_styles(&self, tab: &Arc<Tab>) -> Vec<ComputedTextStyle> {
        tab.evaluate(TEXT_STYLES_JS, false)
            .ok()
            .and_then(|r| r.value)
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| serde_json::from_str::<Vec<ComputedTextStyle>>(&s).ok())
            .unwrap_or_default()
    }

    fn read_perf(&self, tab: &Arc<Tab>) -> serde_json::Value {
        tab.evaluate(PERF_JS, false)
            .ok()
            .and_then(|r| r.value)
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null)
    }

    fn screenshot_pair(&self, tab: &Arc<Tab>) -> Option<atlas_core::Screenshots> {
        let desktop = tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Jpeg, Some(80), None, true)
            .map_err(|e| warn!("desktop screenshot failed: {e}"))
            .ok()?;
        let (mw, mh) = self.render.mobile_viewport;
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: f64::from(mw),
            height: f64::from(mh),
            scale: 1.0,
        };
        let mobile = tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Jpeg, Some(80), Some(clip), true)
            .map_err(|e| warn!("mobile screenshot failed: {e}"))
            .ok()?;
        Some(atlas_core::Screenshots { desktop, mobile })
    }
}

fn launch_browser(crawl: &CrawlSection, render: &RenderSection) -> Result<Browser, CrawlError> {
    let mut extra_args: Vec<OsString> = vec![
        OsString::from("--no-sandbox"),
        OsString::from("--disable-dev-shm-usage"),
        OsString::from("--disable-gpu"),
        OsString::from(format!("--user-agent={}", crawl.user_agent)),
    ];
    if crawl.user_agent.is_empty() {
        extra_args.pop();
    }

    let mut builder = LaunchOptionsBuilder::default();
    builder
        .headless(true)
        .window_size(Some(render.desktop_viewport))
        .args(extra_args.iter().map(|a| a.as_ref()).collect());

    if let Ok(chrome_path) = std::env::var("CHROME_PATH") {
        builder.path(Some(std::path::PathBuf::from(chrome_path)));
    }

    let options = builder
        .build()
        .map_err(|e| CrawlError::Config(format!("browser launch options: {e}")))?;
    Browser::new(options).map_err(|e| CrawlError::Config(format!("browser launch: {e}")))
}

#[async_trait]
impl Renderer for ChromeRenderer {
    fn mode(&self) -> RenderMode {
        self.mode
    }

    async fn render(&mut self, job: &RenderJob) -> Result<RenderResult, CrawlError> {
        let url = job.url.as_str();
        let fetch = self.fetcher.fetch(url).await?;
        let is_html = fetch
            .content_type
            .as_deref()
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
            .unwrap_or(true);

        let raw_html_hash = sha256_hex(&fetch.body);

        if !is_html {
            // Nothing for a browser to do; behave like a raw fetch.
            return Ok(RenderResult {
                url: url.to_string(),
                final_url: fetch.final_url,
                status_code: fetch.status,
                content_type: fetch.content_type,
                raw_html_hash,
                raw_body: fetch.body,
                live_dom: None,
                dom_hash: None,
                nav_end_reason: NavEndReason::Load,
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
            });
        }

        self.maybe_recycle()?;
        self.pages_since_recycle += 1;

        let render_started = Instant::now();
        let deadline = render_started + Duration::from_secs(self.render.nav_timeout_seconds);

        let tab = self
            .browser
            .new_tab()
            .map_err(|e| CrawlError::RenderTransient {
                url: url.to_string(),
                status: None,
                message: format!("new tab: {e}"),
            })?;

        tab.navigate_to(url).map_err(|e| CrawlError::RenderTransient {
            url: url.to_string(),
            status: None,
            message: format!("navigate: {e}"),
        })?;

        let mut nav_end_reason = match tab.wait_until_navigated() {
            Ok(_) => NavEndReason::Load,
            Err(e) => {
                let message = e.to_string();
                if message.to_lowercase().contains("timeout") {
                    NavEndReason::Timeout
                } else {
                    return Err(CrawlError::RenderTransient {
                        url: url.to_string(),
                        status: None,
                        message: format!("navigation: {message}"),
                    });
                }
            }
        };

        if self.mode == RenderMode::Full {
            if let Err(e) = tab.evaluate(CONSOLE_HOOK_JS, false) {
                debug!("console hook install failed: {e}");
            }
        }

        if nav_end_reason != NavEndReason::Timeout {
            nav_end_reason = self.settle(&tab, deadline).await;
        }

        // One extended wait if the page looks like a bot challenge; the
        // interstitial may clear itself once its JavaScript finishes.
        let mut content = tab.get_content().unwrap_or_default();
        if is_challenge_page(fetch.status, &content) {
            let extra = challenge_wait_seconds(&content, self.render.challenge_wait_cap_seconds);
            info!(url, wait_s = extra, "challenge page detected, extending wait");
            tokio::time::sleep(Duration::from_secs(extra)).await;
            content = tab.get_content().unwrap_or_default();
            if is_challenge_page(fetch.status, &content) {
                nav_end_reason = NavEndReason::Challenge;
            }
        }

        let perf = self.read_perf(&tab);
        let request_count = perf["requestCount"].as_u64().unwrap_or(1);
        if request_count > self.render.max_requests_per_page {
            return Err(CrawlError::PageCapExceeded {
                url: url.to_string(),
                message: format!(
                    "{request_count} requests exceeds cap {}",
                    self.render.max_requests_per_page
                ),
            });
        }

        let (screenshots, console_logs, computed_text_styles) = if self.mode == RenderMode::Full {
            (
                self.screenshot_pair(&tab),
                self.read_console(&tab),
                self.read_text_styles(&tab),
            )
        } else {
            (None, Vec::new(), Vec::new())
        };

        let dom_hash = Some(sha256_hex(content.as_bytes()));

        Ok(RenderResult {
            url: url.to_string(),
            final_url: fetch.final_url,
            status_code: fetch.status,
            content_type: fetch.content_type,
            raw_html_hash,
            raw_body: fetch.body,
            live_dom: Some(content),
            dom_hash,
            nav_end_reason,
            redirect_chain: fetch.redirect_chain,
            fetch_ms: fetch.fetch_ms,
            render_ms: render_started.elapsed().as_millis() as u64,
            screenshots,
            favicon: None,
            console_logs,
            computed_text_styles,
            request_count,
            failed_request_count: perf["failedRequestCount"].as_u64().unwrap_or(0),
            first_paint_ms: perf["firstPaintMs"].as_u64(),
            first_contentful_paint_ms: perf["firstContentfulPaintMs"].as_u64(),
            dom_interactive_ms: perf["domInteractiveMs"].as_u64(),
        })
    }
}
