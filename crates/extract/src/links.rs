use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use atlas_core::{EdgeRecord, LinkLocation, LinkType, RenderMode};

const MAX_LINKS_PER_PAGE: usize = 5000;

const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "tiktok.com",
    "pinterest.com",
    "mastodon.social",
    "threads.net",
];

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// Extract every crawlable anchor on the page as an EdgeRecord. Dedup key is
/// (source, target, selector hint), so the same target linked from two spots
/// yields two edges.
pub fn extract_links(html_str: &str, base_url: &Url, mode: RenderMode) -> Vec<EdgeRecord> {
    let document = Html::parse_document(html_str);
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };
    let base_host = base_url.host_str().unwrap_or("");

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut edges: Vec<EdgeRecord> = Vec::new();

    for el in document.select(&sel) {
        if edges.len() >= MAX_LINKS_PER_PAGE {
            break;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }

        let target_host = resolved.host_str().unwrap_or("");
        let is_external = target_host != base_host;
        let selector_hint = selector_hint(&el);
        if !seen.insert((resolved.to_string(), selector_hint.clone())) {
            continue;
        }

        let anchor_text = {
            let t = el.text().collect::<String>().trim().to_string();
            if t.is_empty() {
                None
            } else {
                Some(truncate(&t, 300))
            }
        };

        let rel = el.value().attr("rel").map(str::to_string);
        let rel_lower = rel.as_deref().unwrap_or("").to_lowercase();
        let location = classify_location(&el);
        let has_image = has_descendant_img(&el);
        let is_download = el.value().attr("download").is_some();
        let has_aria_label = el.value().attr("aria-label").is_some();
        let is_empty_anchor = anchor_text.is_none() && !has_image && !has_aria_label;

        edges.push(EdgeRecord {
            source_url: base_url.to_string(),
            target_url: resolved.to_string(),
            is_external,
            link_type: classify_type(&el, &rel_lower, location, is_external, is_download, target_host),
            anchor_text,
            nofollow: rel_lower.contains("nofollow"),
            sponsored: rel_lower.contains("sponsored"),
            ugc: rel_lower.contains("ugc"),
            rel,
            location,
            selector_hint,
            discovered_in_mode: mode,
            opens_new_tab: el.value().attr("target") == Some("_blank"),
            has_image,
            is_download,
            has_title_attr: el.value().attr("title").is_some(),
            has_aria_label,
            is_empty_anchor,
            is_relative_href: !href.contains("://") && !href.starts_with("//"),
            is_https_downgrade: base_url.scheme() == "https" && resolved.scheme() == "http",
        });
    }

    edges
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Short ancestor path like "body > main > a", enough to tell two
/// placements of the same target apart.
fn selector_hint(el: &ElementRef) -> String {
    let mut parts: Vec<String> = vec![describe(el)];
    for ancestor in el.ancestors().filter_map(ElementRef::wrap).take(2) {
        parts.push(ancestor.value().name().to_string());
    }
    parts.reverse();
    parts.join(" > ")
}

fn describe(el: &ElementRef) -> String {
    let mut out = el.value().name().to_string();
    if let Some(id) = el.value().attr("id") {
        out.push('#');
        out.push_str(id);
    } else if let Some(class) = el.value().attr("class") {
        if let Some(first) = class.split_whitespace().next() {
            out.push('.');
            out.push_str(first);
        }
    }
    out
}

fn classify_location(el: &ElementRef) -> LinkLocation {
    for ancestor in el.ancestors().filter_map(ElementRef::wrap) {
        match ancestor.value().name() {
            "nav" => return LinkLocation::Nav,
            "header" => return LinkLocation::Header,
            "main" | "article" => return LinkLocation::Main,
            "footer" => return LinkLocation::Footer,
            "aside" => return LinkLocation::Aside,
            "body" => return LinkLocation::Other,
            _ => continue,
        }
    }
    LinkLocation::Unknown
}

fn has_descendant_img(el: &ElementRef) -> bool {
    selector("img")
        .map(|s| el.select(&s).next().is_some())
        .unwrap_or(false)
}

fn classify_type(
    el: &ElementRef,
    rel_lower: &str,
    location: LinkLocation,
    is_external: bool,
    is_download: bool,
    target_host: &str,
) -> LinkType {
    let class_attr = el.value().attr("class").unwrap_or("").to_lowercase();
    let aria = el.value().attr("aria-label").unwrap_or("").to_lowercase();

    if is_download {
        return LinkType::Download;
    }
    if class_attr.contains("skip") || aria.contains("skip") {
        return LinkType::Skip;
    }
    if SOCIAL_HOSTS
        .iter()
        .any(|h| target_host == *h || target_host.ends_with(&format!(".{h}")))
    {
        return LinkType::Social;
    }
    if rel_lower.contains("tag") || class_attr.contains("tag") {
        return LinkType::Tag;
    }
    if rel_lower.contains("author") || class_attr.contains("author") {
        return LinkType::Author;
    }
    if rel_lower.contains("next") || rel_lower.contains("prev") || class_attr.contains("pagination")
    {
        return LinkType::Pagination;
    }
    if in_breadcrumb(el, &class_attr) {
        return LinkType::Breadcrumb;
    }
    if class_attr.contains("related") {
        return LinkType::Related;
    }
    if class_attr.contains("btn") || class_attr.contains("button") {
        return LinkType::Action;
    }
    match location {
        LinkLocation::Nav | LinkLocation::Header => LinkType::Navigation,
        LinkLocation::Footer => LinkType::Footer,
        LinkLocation::Main => LinkType::Content,
        _ if is_external => LinkType::External,
        _ => LinkType::Other,
    }
}

fn in_breadcrumb(el: &ElementRef, own_class: &str) -> bool {
    if own_class.contains("breadcrumb") {
        return true;
    }
    el.ancestors().filter_map(ElementRef::wrap).any(|a| {
        a.value()
            .attr("class")
            .map(|c| c.to_lowercase().contains("breadcrumb"))
            .unwrap_or(false)
            || a.value().attr("aria-label").map(|l| l.eq_ignore_ascii_case("breadcrumb")).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/blog/").unwrap()
    }

    #[test]
    fn resolves_and_classifies() {
        let html = r#"
            <html><body>
            <nav><a href="/about">About</a></nav>
            <main><a href="post-1">First post</a></main>
            <footer><a href="https://other.example/x" rel="nofollow sponsored">Partner</a></footer>
            </body></html>
        "#;
        let edges = extract_links(html, &base(), RenderMode::Raw);
        assert_eq!(edges.len(), 3);

        let about = edges.iter().find(|e| e.target_url.ends_with("/about")).unwrap();
        assert_eq!(about.link_type, LinkType::Navigation);
        assert_eq!(about.location, LinkLocation::Nav);
        assert!(!about.is_external);

        let post = edges
            .iter()
            .find(|e| e.target_url == "https://example.com/blog/post-1")
            .unwrap();
        assert_eq!(post.link_type, LinkType::Content);
        assert!(post.is_relative_href);

        let partner = edges.iter().find(|e| e.is_external).unwrap();
        assert!(partner.nofollow);
        assert!(partner.sponsored);
        assert!(!partner.ugc);
        assert_eq!(partner.link_type, LinkType::Footer);
    }

    #[test]
    fn skips_non_crawlable_schemes() {
        let html = r##"<body>
            <a href="javascript:void(0)">x</a>
            <a href="mailto:a@b.c">m</a>
            <a href="tel:+1555">t</a>
            <a href="#section">frag</a>
            <a href="ftp://h/f">ftp</a>
        </body>"##;
        assert!(extract_links(html, &base(), RenderMode::Raw).is_empty());
    }

    #[test]
    fn same_target_two_placements_yields_two_edges() {
        let html = r#"<body>
            <nav><a href="/pricing">Pricing</a></nav>
            <footer><a href="/pricing">Pricing</a></footer>
        </body>"#;
        let edges = extract_links(html, &base(), RenderMode::Raw);
        assert_eq!(edges.len(), 2);
        assert_ne!(edges[0].selector_hint, edges[1].selector_hint);
    }

    #[test]
    fn exact_duplicate_is_deduped() {
        let html = r#"<body><p><a href="/a">one</a><a href="/a">one again</a></p></body>"#;
        let edges = extract_links(html, &base(), RenderMode::Raw);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn hint_attributes() {
        let html = r#"<body><main>
            <a href="/img" target="_blank" title="pic"><img src="/p.png"></a>
            <a href="http://example.com/insecure">downgrade</a>
        </main></body>"#;
        let base = Url::parse("https://example.com/").unwrap();
        let edges = extract_links(html, &base, RenderMode::Full);
        let img_link = edges.iter().find(|e| e.has_image).unwrap();
        assert!(img_link.opens_new_tab);
        assert!(img_link.has_title_attr);
        assert!(!img_link.is_empty_anchor);
        assert_eq!(img_link.discovered_in_mode, RenderMode::Full);

        let downgrade = edges.iter().find(|e| e.is_https_downgrade).unwrap();
        assert!(downgrade.target_url.starts_with("http://"));
    }

    #[test]
    fn social_detection() {
        let html = r#"<body><a href="https://www.youtube.com/@chan">yt</a></body>"#;
        let edges = extract_links(html, &base(), RenderMode::Raw);
        assert_eq!(edges[0].link_type, LinkType::Social);
    }
}
