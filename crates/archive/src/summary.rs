use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atlas_core::{CompletionReason, PageRecord};

/// Live tallies of the crawl, written as `summary.json` at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasSummary {
    pub crawl_id: String,
    pub primary_origin: String,
    pub seed_urls: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_reason: Option<CompletionReason>,
    pub stats: SummaryStats,
    pub status_codes: BTreeMap<String, u64>,
    pub render_modes: BTreeMap<String, u64>,
    pub max_depth_reached: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_pages: u64,
    pub total_edges: u64,
    pub total_assets: u64,
    pub total_errors: u64,
    pub total_events: u64,
    pub total_blobs: u64,
    pub bytes_stored: u64,
}

impl AtlasSummary {
    pub fn new(crawl_id: &str, primary_origin: &str, seed_urls: Vec<String>) -> Self {
        Self {
            crawl_id: crawl_id.to_string(),
            primary_origin: primary_origin.to_string(),
            seed_urls,
            started_at: Utc::now(),
            completed_at: None,
            completion_reason: None,
            stats: SummaryStats::default(),
            status_codes: BTreeMap::new(),
            render_modes: BTreeMap::new(),
            max_depth_reached: 0,
        }
    }

    pub fn record_page(&mut self, page: &PageRecord) {
        self.stats.total_pages += 1;
        *self
            .status_codes
            .entry(page.status_code.to_string())
            .or_insert(0) += 1;
        *self
            .render_modes
            .entry(page.render_mode.as_str().to_string())
            .or_insert(0) += 1;
        self.max_depth_reached = self.max_depth_reached.max(page.depth);
    }

    pub fn complete(&mut self, reason: CompletionReason) {
        self.completed_at = Some(Utc::now());
        self.completion_reason = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::{NavEndReason, RenderMode};

    fn page(status: u16, depth: u32, mode: RenderMode) -> PageRecord {
        PageRecord {
            page_id: uuid::Uuid::new_v4().to_string(),
            url: "https://h/".into(),
            final_url: "https://h/".into(),
            normalized_url: "https://h/".into(),
            url_key: "0".repeat(40),
            status_code: status,
            content_type: Some("text/html".into()),
            render_mode: mode,
            depth,
            discovered_from: None,
            raw_html_hash: "0".repeat(64),
            dom_hash: None,
            nav_end_reason: NavEndReason::Load,
            redirect_chain: vec![],
            fetch_ms: 1,
            render_ms: 0,
            internal_links_count: 0,
            external_links_count: 0,
            media_assets_count: 0,
            title: None,
            meta_description: None,
            meta_keywords: vec![],
            headings: vec![],
            canonical: None,
            meta_robots: None,
            hreflang: vec![],
            open_graph: BTreeMap::new(),
            twitter_card: BTreeMap::new(),
            technologies: vec![],
            seo: None,
            accessibility: None,
            media: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn histograms_accumulate() {
        let mut summary = AtlasSummary::new("c1", "https://h", vec!["https://h/".into()]);
        summary.record_page(&page(200, 0, RenderMode::Prerender));
        summary.record_page(&page(200, 2, RenderMode::Prerender));
        summary.record_page(&page(404, 1, RenderMode::Raw));

        assert_eq!(summary.stats.total_pages, 3);
        assert_eq!(summary.status_codes["200"], 2);
        assert_eq!(summary.status_codes["404"], 1);
        assert_eq!(summary.render_modes["prerender"], 2);
        assert_eq!(summary.max_depth_reached, 2);
    }

    #[test]
    fn completion_stamps() {
        let mut summary = AtlasSummary::new("c1", "https://h", vec![]);
        assert!(summary.completed_at.is_none());
        summary.complete(CompletionReason::Finished);
        assert!(summary.completed_at.is_some());
        assert_eq!(summary.completion_reason, Some(CompletionReason::Finished));
    }
}
