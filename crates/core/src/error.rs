use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which stage of the pipeline an error belongs to. Carried on every
/// ErrorRecord in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    Fetch,
    Render,
    Extract,
    Write,
    Robots,
    Validate,
}

#[derive(Error, Debug)]
pub enum CrawlError {
    /// Normalization failed. The URL is dropped silently.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Retryable render failure: network error or a transient status.
    #[error("transient render failure for {url}: {message}")]
    RenderTransient {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Non-retryable render failure. Counts against the error budget.
    #[error("render failed for {url}: {message}")]
    RenderFatal {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// A per-page cap (request count or bytes) was exceeded.
    #[error("page cap exceeded for {url}: {message}")]
    PageCapExceeded { url: String, message: String },

    /// An extractor failed. The page is still written with partial data.
    #[error("extractor {extractor} failed: {message}")]
    Extract { extractor: String, message: String },

    /// A record did not validate against its dataset schema.
    #[error("schema violation in dataset {dataset}: {message}")]
    Schema { dataset: String, message: String },

    /// Disk I/O failure. Fatal for the whole crawl.
    #[error("write failed: {0}")]
    WriteDisk(#[from] std::io::Error),

    /// checkpoint.json loaded but its companion files are missing or torn.
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    #[error("robots fetch failed for {origin}: {message}")]
    RobotsFetch { origin: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Whether this error counts against the error budget.
    pub fn is_counted(&self) -> bool {
        matches!(
            self,
            CrawlError::RenderFatal { .. }
                | CrawlError::PageCapExceeded { .. }
                | CrawlError::Extract { .. }
                | CrawlError::Schema { .. }
        )
    }

    pub fn phase(&self) -> ErrorPhase {
        match self {
            CrawlError::InvalidUrl(_) => ErrorPhase::Fetch,
            CrawlError::RenderTransient { .. }
            | CrawlError::RenderFatal { .. }
            | CrawlError::PageCapExceeded { .. } => ErrorPhase::Render,
            CrawlError::Extract { .. } => ErrorPhase::Extract,
            CrawlError::Schema { .. } | CrawlError::WriteDisk(_) => ErrorPhase::Write,
            CrawlError::CorruptCheckpoint(_) => ErrorPhase::Validate,
            CrawlError::RobotsFetch { .. } => ErrorPhase::Robots,
            CrawlError::Config(_) | CrawlError::Other(_) => ErrorPhase::Fetch,
        }
    }

    /// Stable code string written into ErrorRecords.
    pub fn code(&self) -> &'static str {
        match self {
            CrawlError::InvalidUrl(_) => "invalid_url",
            CrawlError::RenderTransient { .. } => "render_transient",
            CrawlError::RenderFatal { .. } => "render_fatal",
            CrawlError::PageCapExceeded { .. } => "page_cap_exceeded",
            CrawlError::Extract { .. } => "extract_failed",
            CrawlError::Schema { .. } => "schema_violation",
            CrawlError::WriteDisk(_) => "write_disk",
            CrawlError::CorruptCheckpoint(_) => "corrupt_checkpoint",
            CrawlError::RobotsFetch { .. } => "robots_fetch",
            CrawlError::Config(_) => "config",
            CrawlError::Other(_) => "unknown",
        }
    }
}

/// Process exit codes for the `crawl` and `validate` commands.
pub mod exit {
    pub const OK: u8 = 0;
    pub const ERROR_BUDGET: u8 = 2;
    pub const RENDER_FATAL: u8 = 3;
    pub const WRITE_FATAL: u8 = 4;
    pub const VALIDATE_FATAL: u8 = 5;
    pub const UNKNOWN: u8 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counted_errors() {
        let fatal = CrawlError::RenderFatal {
            url: "https://h/".into(),
            status: Some(404),
            message: "not found".into(),
        };
        assert!(fatal.is_counted());
        assert_eq!(fatal.phase(), ErrorPhase::Render);

        let transient = CrawlError::RenderTransient {
            url: "https://h/".into(),
            status: Some(503),
            message: "unavailable".into(),
        };
        assert!(!transient.is_counted());

        let invalid = CrawlError::InvalidUrl("::".into());
        assert!(!invalid.is_counted());
    }

    #[test]
    fn schema_errors_are_write_phase() {
        let err = CrawlError::Schema {
            dataset: "pages".into(),
            message: "/statusCode: expected integer".into(),
        };
        assert_eq!(err.phase(), ErrorPhase::Write);
        assert!(err.is_counted());
        assert_eq!(err.code(), "schema_violation");
    }
}
