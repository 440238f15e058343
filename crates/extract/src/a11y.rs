use std::collections::BTreeMap;

use scraper::{Html, Selector};

use atlas_core::{AccessibilityRecord, Landmarks, WcagData};

const MAX_HEADING_ORDER: usize = 100;

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// Implicit ARIA roles of the landmark elements. An explicit role attribute
/// on the same element takes precedence: the element is counted once, under
/// the explicit role.
fn implicit_role(tag: &str) -> Option<&'static str> {
    match tag {
        "header" => Some("banner"),
        "nav" => Some("navigation"),
        "main" => Some("main"),
        "aside" => Some("complementary"),
        "footer" => Some("contentinfo"),
        "form" => Some("form"),
        "button" => Some("button"),
        _ => None,
    }
}

/// Static accessibility snapshot of a page. Contrast violations need a
/// rendered page and are filled in by the full-mode pipeline, not here.
pub fn extract_accessibility(html_str: &str, page_url: &str) -> AccessibilityRecord {
    let document = Html::parse_document(html_str);

    let (images_total, images_with_alt) = selector("img")
        .map(|s| {
            let mut total = 0u32;
            let mut with_alt = 0u32;
            for el in document.select(&s) {
                total += 1;
                if el
                    .value()
                    .attr("alt")
                    .map(|a| !a.trim().is_empty())
                    .unwrap_or(false)
                {
                    with_alt += 1;
                }
            }
            (total, with_alt)
        })
        .unwrap_or((0, 0));

    let mut heading_order: Vec<u8> = Vec::new();
    if let Some(sel) = selector("h1, h2, h3, h4, h5, h6") {
        for el in document.select(&sel).take(MAX_HEADING_ORDER) {
            if let Some(level) = el.value().name().as_bytes().get(1) {
                heading_order.push(level - b'0');
            }
        }
    }

    let landmarks = Landmarks {
        header: has_any(&document, "header"),
        nav: has_any(&document, "nav"),
        main: has_any(&document, "main"),
        aside: has_any(&document, "aside"),
        footer: has_any(&document, "footer"),
    };

    let mut roles: BTreeMap<String, u32> = BTreeMap::new();
    if let Some(sel) = selector("*") {
        for el in document.select(&sel) {
            let explicit = el
                .value()
                .attr("role")
                .map(str::trim)
                .filter(|r| !r.is_empty());
            let role = match explicit {
                Some(r) => Some(r.to_string()),
                None => implicit_role(el.value().name()).map(str::to_string),
            };
            if let Some(role) = role {
                *roles.entry(role).or_insert(0) += 1;
            }
        }
    }

    let (form_inputs_total, form_labels_missing) = count_unlabeled_inputs(&document);

    let language_set = selector("html")
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("lang"))
        .map(|l| !l.trim().is_empty())
        .unwrap_or(false);

    let title_present = selector("head > title, title")
        .and_then(|s| document.select(&s).next())
        .map(|el| !el.text().collect::<String>().trim().is_empty())
        .unwrap_or(false);

    let skip_link_present = selector("a[href^='#']")
        .map(|s| {
            document.select(&s).any(|el| {
                let text = el.text().collect::<String>().to_lowercase();
                let class = el.value().attr("class").unwrap_or("").to_lowercase();
                text.contains("skip") || class.contains("skip")
            })
        })
        .unwrap_or(false);

    AccessibilityRecord {
        page_url: page_url.to_string(),
        missing_alt_count: images_total - images_with_alt,
        heading_order,
        landmarks,
        roles,
        wcag_data: WcagData {
            images_total,
            images_with_alt,
            form_inputs_total,
            form_labels_missing,
            language_set,
            title_present,
            skip_link_present,
        },
        contrast_violations: None,
    }
}

fn has_any(document: &Html, css: &str) -> bool {
    selector(css)
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false)
}

fn count_unlabeled_inputs(document: &Html) -> (u32, u32) {
    let labeled_ids: Vec<String> = selector("label[for]")
        .map(|s| {
            document
                .select(&s)
                .filter_map(|el| el.value().attr("for").map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let Some(sel) = selector("input, select, textarea") else {
        return (0, 0);
    };
    let mut total = 0u32;
    let mut missing = 0u32;
    for el in document.select(&sel) {
        let input_type = el.value().attr("type").unwrap_or("text");
        if matches!(input_type, "hidden" | "submit" | "button") {
            continue;
        }
        total += 1;
        let labeled = el.value().attr("aria-label").is_some()
            || el.value().attr("aria-labelledby").is_some()
            || el
                .value()
                .attr("id")
                .map(|id| labeled_ids.iter().any(|l| l == id))
                .unwrap_or(false);
        if !labeled {
            missing += 1;
        }
    }
    (total, missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html lang="en"><head><title>T</title></head><body>
        <a href="#main" class="skip-link">Skip to content</a>
        <header><nav role="navigation"><h1>Site</h1></nav></header>
        <main id="main">
            <h2>Post</h2><h3>Sub</h3>
            <img src="/a.png" alt="described">
            <img src="/b.png">
            <form>
                <label for="q">Query</label>
                <input id="q" type="text">
                <input type="text" name="unlabeled">
                <input type="hidden" name="csrf">
            </form>
        </main>
        <footer role="contentinfo"></footer>
    </body></html>"##;

    #[test]
    fn counts_and_landmarks() {
        let rec = extract_accessibility(PAGE, "https://h/");
        assert_eq!(rec.missing_alt_count, 1);
        assert_eq!(rec.heading_order, vec![1, 2, 3]);
        assert!(rec.landmarks.header);
        assert!(rec.landmarks.nav);
        assert!(rec.landmarks.main);
        assert!(rec.landmarks.footer);
        assert!(!rec.landmarks.aside);
        assert!(rec.contrast_violations.is_none());
    }

    #[test]
    fn explicit_role_counts_once() {
        let rec = extract_accessibility(PAGE, "https://h/");
        // <nav role="navigation"> is one navigation, not two.
        assert_eq!(rec.roles.get("navigation"), Some(&1));
        // <footer role="contentinfo"> likewise.
        assert_eq!(rec.roles.get("contentinfo"), Some(&1));
        // <header> has no explicit role, so its implicit banner role counts.
        assert_eq!(rec.roles.get("banner"), Some(&1));
    }

    #[test]
    fn explicit_role_overrides_implicit_name() {
        let html = r#"<body><main role="search"></main></body>"#;
        let rec = extract_accessibility(html, "https://h/");
        assert_eq!(rec.roles.get("search"), Some(&1));
        assert_eq!(rec.roles.get("main"), None);
    }

    #[test]
    fn wcag_data() {
        let rec = extract_accessibility(PAGE, "https://h/");
        let w = &rec.wcag_data;
        assert_eq!(w.images_total, 2);
        assert_eq!(w.images_with_alt, 1);
        assert_eq!(w.form_inputs_total, 2);
        assert_eq!(w.form_labels_missing, 1);
        assert!(w.language_set);
        assert!(w.title_present);
        assert!(w.skip_link_present);
    }

    #[test]
    fn empty_document() {
        let rec = extract_accessibility("", "https://h/");
        assert_eq!(rec.missing_alt_count, 0);
        assert!(rec.heading_order.is_empty());
        assert!(!rec.wcag_data.language_set);
    }
}
