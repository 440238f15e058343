mod chrome;
mod raw;
mod retry;

pub use chrome::ChromeRenderer;
pub use raw::{sha256_hex, RawFetch, RawFetcher, RawRenderer};
pub use retry::{is_transient_status, render_with_retry};

use async_trait::async_trait;

use atlas_core::url::NormalizedUrl;
use atlas_core::{CrawlError, RenderMode, RenderResult};

/// One unit of work handed to a renderer.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub url: NormalizedUrl,
    pub depth: u32,
    pub discovered_from: Option<String>,
}

/// A renderer turns a URL into a RenderResult. Each worker owns exactly one,
/// so implementations may keep mutable state (browser contexts, counters).
#[async_trait]
pub trait Renderer: Send + 'static {
    fn mode(&self) -> RenderMode;

    async fn render(&mut self, job: &RenderJob) -> Result<RenderResult, CrawlError>;
}
