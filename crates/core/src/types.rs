use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorPhase;

/// How much JavaScript a crawl executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Raw,
    #[default]
    Prerender,
    Full,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Raw => "raw",
            RenderMode::Prerender => "prerender",
            RenderMode::Full => "full",
        }
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(RenderMode::Raw),
            "prerender" => Ok(RenderMode::Prerender),
            "full" => Ok(RenderMode::Full),
            other => Err(format!("unknown render mode: {other}")),
        }
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavEndReason {
    Load,
    Domcontentloaded,
    Networkidle,
    Timeout,
    Error,
    Challenge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkLocation {
    #[default]
    Unknown,
    Nav,
    Header,
    Main,
    Footer,
    Aside,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Navigation,
    Content,
    Footer,
    Breadcrumb,
    Pagination,
    Skip,
    Download,
    Social,
    Tag,
    Author,
    Related,
    Action,
    External,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Img,
    Video,
    Audio,
    Script,
    Style,
    Font,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Finished,
    Capped,
    ErrorBudget,
    Manual,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::Finished => "finished",
            CompletionReason::Capped => "capped",
            CompletionReason::ErrorBudget => "error_budget",
            CompletionReason::Manual => "manual",
        }
    }
}

/// One unit of crawl work waiting in the frontier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierEntry {
    pub url: String,
    pub url_key: String,
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

/// Everything a renderer produced for one URL. Internal to the pipeline;
/// records derived from it are what the archive stores.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub raw_body: Vec<u8>,
    pub raw_html_hash: String,
    pub live_dom: Option<String>,
    pub dom_hash: Option<String>,
    pub nav_end_reason: NavEndReason,
    pub redirect_chain: Vec<String>,
    pub fetch_ms: u64,
    pub render_ms: u64,
    pub screenshots: Option<Screenshots>,
    pub favicon: Option<Favicon>,
    pub console_logs: Vec<ConsoleEntry>,
    pub computed_text_styles: Vec<ComputedTextStyle>,
    pub request_count: u64,
    pub failed_request_count: u64,
    pub first_paint_ms: Option<u64>,
    pub first_contentful_paint_ms: Option<u64>,
    pub dom_interactive_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Screenshots {
    pub desktop: Vec<u8>,
    pub mobile: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Favicon {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedTextStyle {
    pub selector: String,
    pub font_size: String,
    pub font_weight: String,
    pub color: String,
    pub background_color: String,
}

/// Final outcome of visiting one URL. One line in the `pages` dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub page_id: String,
    pub url: String,
    pub final_url: String,
    pub normalized_url: String,
    pub url_key: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub render_mode: RenderMode,
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub raw_html_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_hash: Option<String>,
    pub nav_end_reason: NavEndReason,
    pub redirect_chain: Vec<String>,
    pub fetch_ms: u64,
    pub render_ms: u64,
    pub internal_links_count: u64,
    pub external_links_count: u64,
    pub media_assets_count: u64,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Vec<String>,
    pub headings: Vec<Heading>,
    pub canonical: Option<String>,
    pub meta_robots: Option<String>,
    pub hreflang: Vec<Hreflang>,
    pub open_graph: BTreeMap<String, String>,
    pub twitter_card: BTreeMap<String, String>,
    pub technologies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo: Option<EnhancedSeo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessibility: Option<AccessibilitySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<PageMedia>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hreflang {
    pub lang: String,
    pub href: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedSeo {
    pub word_count: u64,
    pub text_html_ratio: f64,
    pub heading_counts: BTreeMap<String, u32>,
    pub images_missing_alt: u32,
    pub has_structured_data: bool,
    pub meta_robots_directives: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilitySummary {
    pub missing_alt_count: u32,
    pub landmark_count: u32,
    pub role_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMedia {
    pub screenshots: MediaScreenshots,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaScreenshots {
    pub desktop: Option<String>,
    pub mobile: Option<String>,
}

/// One outgoing link discovered on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub source_url: String,
    pub target_url: String,
    pub is_external: bool,
    pub anchor_text: Option<String>,
    pub rel: Option<String>,
    pub nofollow: bool,
    pub sponsored: bool,
    pub ugc: bool,
    pub location: LinkLocation,
    pub selector_hint: String,
    pub discovered_in_mode: RenderMode,
    pub link_type: LinkType,
    pub opens_new_tab: bool,
    pub has_image: bool,
    pub is_download: bool,
    pub has_title_attr: bool,
    pub has_aria_label: bool,
    pub is_empty_anchor: bool,
    pub is_relative_href: bool,
    pub is_https_downgrade: bool,
}

/// One sub-resource reference found on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub page_url: String,
    pub src: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub alt: Option<String>,
    pub has_alt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    pub loading_attr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_viewport: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Links a page to its stored response body. v1 shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub page_id: String,
    pub encoding: Option<String>,
    pub body_blob_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityRecord {
    pub page_url: String,
    pub missing_alt_count: u32,
    pub heading_order: Vec<u8>,
    pub landmarks: Landmarks,
    pub roles: BTreeMap<String, u32>,
    pub wcag_data: WcagData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast_violations: Option<Vec<ContrastViolation>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmarks {
    pub header: bool,
    pub nav: bool,
    pub main: bool,
    pub aside: bool,
    pub footer: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WcagData {
    pub images_total: u32,
    pub images_with_alt: u32,
    pub form_inputs_total: u32,
    pub form_labels_missing: u32,
    pub language_set: bool,
    pub title_present: bool,
    pub skip_link_present: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContrastViolation {
    pub selector: String,
    pub foreground: String,
    pub background: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub url: String,
    pub origin: String,
    pub host: String,
    pub phase: ErrorPhase,
    pub code: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Structured operational event: checkpoints, denials, shutdowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl EventRecord {
    pub fn new(kind: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleRecord {
    pub page_url: String,
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleRecord {
    pub page_url: String,
    pub selector: String,
    pub font_size: String,
    pub font_weight: String,
    pub color: String,
    pub background_color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshotRecord {
    pub page_id: String,
    pub page_url: String,
    pub dom_hash: String,
    pub dom_blob_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartPointer {
    pub filename: String,
    pub byte_offset: u64,
}

/// Snapshot of crawl progress sufficient to resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub crawl_id: String,
    pub visited_count: u64,
    pub enqueued_count: u64,
    pub queue_depth: u64,
    pub visited_index_file: String,
    pub frontier_snapshot: String,
    pub last_part_pointers: BTreeMap<String, PartPointer>,
    pub rss_mb: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_mode_round_trip() {
        for s in ["raw", "prerender", "full"] {
            let mode: RenderMode = s.parse().unwrap();
            assert_eq!(mode.as_str(), s);
        }
        assert!("headful".parse::<RenderMode>().is_err());
    }

    #[test]
    fn records_serialize_camel_case() {
        let rec = EdgeRecord {
            source_url: "https://a/".into(),
            target_url: "https://b/".into(),
            is_external: true,
            anchor_text: Some("b".into()),
            rel: None,
            nofollow: false,
            sponsored: false,
            ugc: false,
            location: LinkLocation::Main,
            selector_hint: "main > a".into(),
            discovered_in_mode: RenderMode::Raw,
            link_type: LinkType::External,
            opens_new_tab: false,
            has_image: false,
            is_download: false,
            has_title_attr: false,
            has_aria_label: false,
            is_empty_anchor: false,
            is_relative_href: false,
            is_https_downgrade: false,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["sourceUrl"], "https://a/");
        assert_eq!(json["linkType"], "external");
        assert_eq!(json["location"], "main");
    }

    #[test]
    fn event_builder() {
        let ev = EventRecord::new("robots_denied").field("url", "https://h/admin/x");
        assert_eq!(ev.kind, "robots_denied");
        assert_eq!(ev.fields["url"], "https://h/admin/x");
    }
}
