pub mod challenge;
pub mod config;
pub mod error;
pub mod types;
pub mod url;

pub use crate::url::{NormalizedUrl, QueryParamPolicy, UrlFilter};
pub use config::CrawlConfig;
pub use error::{CrawlError, ErrorPhase};
pub use types::*;
