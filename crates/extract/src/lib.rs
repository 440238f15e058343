mod a11y;
mod assets;
mod links;
mod seo;
mod tech;

pub use a11y::extract_accessibility;
pub use assets::extract_assets;
pub use links::extract_links;
pub use seo::{extract_seo, SeoFacts};
pub use tech::extract_technologies;

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;
use url::Url;

use atlas_core::{AccessibilityRecord, AssetRecord, EdgeRecord, RenderMode};

/// Everything the extractor suite produced for one page, plus the failures
/// that occurred along the way. A failed extractor contributes its empty
/// default; the page is still written.
pub struct ExtractOutcome {
    pub seo: SeoFacts,
    pub edges: Vec<EdgeRecord>,
    pub assets: Vec<AssetRecord>,
    pub technologies: Vec<String>,
    pub accessibility: Option<AccessibilityRecord>,
    /// (extractor name, panic message)
    pub failures: Vec<(String, String)>,
}

/// Run the extractor suite in its fixed order: seo, links, assets,
/// technologies, accessibility. Each extractor is total on its own; the
/// catch_unwind here is the hard boundary that keeps a bug in one of them
/// from taking the page down.
pub fn run_extractors(
    html: &str,
    base_url: &Url,
    mode: RenderMode,
    accessibility_enabled: bool,
) -> ExtractOutcome {
    let mut failures: Vec<(String, String)> = Vec::new();

    let seo = guarded(
        "seo",
        &mut failures,
        catch_unwind(AssertUnwindSafe(|| extract_seo(html, base_url))),
    )
    .unwrap_or_default();
    let edges = guarded(
        "links",
        &mut failures,
        catch_unwind(AssertUnwindSafe(|| extract_links(html, base_url, mode))),
    )
    .unwrap_or_default();
    let assets = guarded(
        "assets",
        &mut failures,
        catch_unwind(AssertUnwindSafe(|| extract_assets(html, base_url))),
    )
    .unwrap_or_default();
    let technologies = guarded(
        "technologies",
        &mut failures,
        catch_unwind(AssertUnwindSafe(|| extract_technologies(html))),
    )
    .unwrap_or_default();

    let accessibility = if accessibility_enabled && mode != RenderMode::Raw {
        guarded(
            "accessibility",
            &mut failures,
            catch_unwind(AssertUnwindSafe(|| {
                extract_accessibility(html, base_url.as_str())
            })),
        )
    } else {
        None
    };

    ExtractOutcome {
        seo,
        edges,
        assets,
        technologies,
        accessibility,
        failures,
    }
}

fn guarded<T>(
    name: &str,
    failures: &mut Vec<(String, String)>,
    out: std::thread::Result<T>,
) -> Option<T> {
    match out {
        Ok(value) => Some(value),
        Err(panic) => {
            let message = panic_message(panic);
            warn!(extractor = name, "extractor panicked: {message}");
            failures.push((name.to_string(), message));
            None
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_html_yields_empty_structures_not_panics() {
        let base = Url::parse("https://h/").unwrap();
        let outcome = run_extractors("<<<<not html>>>> <a href=", &base, RenderMode::Raw, true);
        assert!(outcome.failures.is_empty());
        assert!(outcome.edges.is_empty());
        // Raw mode never collects accessibility, independent of the knob.
        assert!(outcome.accessibility.is_none());
    }

    #[test]
    fn accessibility_gated_by_both_mode_and_knob() {
        let base = Url::parse("https://h/").unwrap();
        let html = "<html lang='en'><body><main><p>hi</p></main></body></html>";
        assert!(run_extractors(html, &base, RenderMode::Prerender, true)
            .accessibility
            .is_some());
        assert!(run_extractors(html, &base, RenderMode::Prerender, false)
            .accessibility
            .is_none());
        assert!(run_extractors(html, &base, RenderMode::Full, false)
            .accessibility
            .is_none());
    }
}
