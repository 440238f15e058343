use std::collections::BTreeMap;

use scraper::{Html, Selector};
use url::Url;

use atlas_core::{EnhancedSeo, Heading, Hreflang};

const MAX_HEADINGS: usize = 200;
const MAX_HEADING_TEXT: usize = 200;

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// The SEO-relevant facts of one page. Later extractors may read these.
#[derive(Debug, Default, Clone)]
pub struct SeoFacts {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Vec<String>,
    pub headings: Vec<Heading>,
    pub canonical: Option<String>,
    pub meta_robots: Option<String>,
    pub hreflang: Vec<Hreflang>,
    pub open_graph: BTreeMap<String, String>,
    pub twitter_card: BTreeMap<String, String>,
    pub enhanced: EnhancedSeo,
}

pub fn extract_seo(html_str: &str, base_url: &Url) -> SeoFacts {
    let document = Html::parse_document(html_str);

    let title = selector("head > title, title")
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let meta_description = meta_content(&document, "description");
    let meta_keywords = meta_content(&document, "keywords")
        .map(|k| {
            k.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let meta_robots = meta_content(&document, "robots");

    let canonical = selector("link[rel='canonical']")
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| base_url.join(href).ok())
        .map(|u| u.to_string());

    let mut hreflang: Vec<Hreflang> = Vec::new();
    if let Some(sel) = selector("link[rel='alternate'][hreflang]") {
        for el in document.select(&sel) {
            if let (Some(lang), Some(href)) =
                (el.value().attr("hreflang"), el.value().attr("href"))
            {
                if let Ok(abs) = base_url.join(href) {
                    hreflang.push(Hreflang {
                        lang: lang.to_string(),
                        href: abs.to_string(),
                    });
                }
            }
        }
    }

    let mut headings: Vec<Heading> = Vec::new();
    let mut heading_counts: BTreeMap<String, u32> = BTreeMap::new();
    if let Some(sel) = selector("h1, h2, h3, h4, h5, h6") {
        for el in document.select(&sel) {
            let name = el.value().name().to_lowercase();
            let level = name.as_bytes().get(1).map(|b| b - b'0').unwrap_or(0);
            *heading_counts.entry(name).or_insert(0) += 1;
            if headings.len() < MAX_HEADINGS {
                let text = el.text().collect::<String>().trim().to_string();
                if !text.is_empty() {
                    headings.push(Heading {
                        level,
                        text: truncate(&text, MAX_HEADING_TEXT),
                    });
                }
            }
        }
    }

    let open_graph = property_map(&document, "meta[property^='og:']", "property");
    let twitter_card = property_map(&document, "meta[name^='twitter:']", "name");

    let body_text = selector("body")
        .and_then(|s| document.select(&s).next())
        .map(|el| {
            el.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let word_count = body_text.split_whitespace().count() as u64;
    let text_html_ratio = if html_str.is_empty() {
        0.0
    } else {
        body_text.len() as f64 / html_str.len() as f64
    };

    let images_missing_alt = selector("img")
        .map(|s| {
            document
                .select(&s)
                .filter(|el| {
                    el.value()
                        .attr("alt")
                        .map(|a| a.trim().is_empty())
                        .unwrap_or(true)
                })
                .count() as u32
        })
        .unwrap_or(0);

    let has_structured_data = selector("script[type='application/ld+json']")
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false);

    let meta_robots_directives = meta_robots
        .as_deref()
        .map(|r| {
            r.split(',')
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect()
        })
        .unwrap_or_default();

    SeoFacts {
        title,
        meta_description,
        meta_keywords,
        headings,
        canonical,
        meta_robots,
        hreflang,
        open_graph,
        twitter_card,
        enhanced: EnhancedSeo {
            word_count,
            text_html_ratio,
            heading_counts,
            images_missing_alt,
            has_structured_data,
            meta_robots_directives,
        },
    }
}

fn meta_content(document: &Html, name: &str) -> Option<String> {
    let sel_str = format!("meta[name='{name}'], meta[name='{}']", capitalize(name));
    selector(&sel_str)
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("content").map(str::to_string))
        .filter(|c| !c.trim().is_empty())
}

fn property_map(document: &Html, css: &str, attr: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(sel) = selector(css) {
        for el in document.select(&sel) {
            if let (Some(key), Some(content)) = (el.value().attr(attr), el.value().attr("content"))
            {
                out.entry(key.to_string()).or_insert_with(|| content.to_string());
            }
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/post").unwrap()
    }

    const PAGE: &str = r#"<html><head>
        <title>Example Post</title>
        <meta name="description" content="A post about examples.">
        <meta name="keywords" content="examples, posts">
        <meta name="robots" content="index, nofollow">
        <link rel="canonical" href="/post">
        <link rel="alternate" hreflang="de" href="/de/post">
        <meta property="og:title" content="Example Post">
        <meta property="og:type" content="article">
        <meta name="twitter:card" content="summary">
        <script type="application/ld+json">{"@type":"Article"}</script>
    </head><body>
        <h1>Example Post</h1>
        <h2>Section one</h2>
        <h2>Section two</h2>
        <p>Some body text with several words in it.</p>
        <img src="/x.png">
    </body></html>"#;

    #[test]
    fn core_facts() {
        let facts = extract_seo(PAGE, &base());
        assert_eq!(facts.title.as_deref(), Some("Example Post"));
        assert_eq!(facts.meta_description.as_deref(), Some("A post about examples."));
        assert_eq!(facts.meta_keywords, vec!["examples", "posts"]);
        assert_eq!(facts.canonical.as_deref(), Some("https://example.com/post"));
        assert_eq!(facts.hreflang.len(), 1);
        assert_eq!(facts.hreflang[0].lang, "de");
        assert_eq!(facts.open_graph.get("og:type").map(String::as_str), Some("article"));
        assert_eq!(
            facts.twitter_card.get("twitter:card").map(String::as_str),
            Some("summary")
        );
    }

    #[test]
    fn enhanced_numbers() {
        let facts = extract_seo(PAGE, &base());
        assert_eq!(facts.enhanced.heading_counts.get("h1"), Some(&1));
        assert_eq!(facts.enhanced.heading_counts.get("h2"), Some(&2));
        assert_eq!(facts.enhanced.images_missing_alt, 1);
        assert!(facts.enhanced.has_structured_data);
        assert!(facts.enhanced.word_count > 5);
        assert!(facts.enhanced.text_html_ratio > 0.0 && facts.enhanced.text_html_ratio < 1.0);
        assert_eq!(
            facts.enhanced.meta_robots_directives,
            vec!["index", "nofollow"]
        );
    }

    #[test]
    fn empty_page_is_all_defaults() {
        let facts = extract_seo("", &base());
        assert!(facts.title.is_none());
        assert!(facts.headings.is_empty());
        assert_eq!(facts.enhanced.word_count, 0);
    }
}
