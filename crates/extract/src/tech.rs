use once_cell::sync::Lazy;
use scraper::{Html, Selector};

/// (needle in lowercased HTML, technology name)
static SIGNATURES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("/wp-content/", "WordPress"),
        ("/wp-includes/", "WordPress"),
        ("cdn.shopify.com", "Shopify"),
        ("/_next/static", "Next.js"),
        ("/_nuxt/", "Nuxt"),
        ("data-reactroot", "React"),
        ("ng-version=", "Angular"),
        ("data-v-app", "Vue"),
        ("/sites/default/files", "Drupal"),
        ("joomla", "Joomla"),
        ("squarespace.com", "Squarespace"),
        ("static.wixstatic.com", "Wix"),
        ("ghost.org", "Ghost"),
        ("gatsby-", "Gatsby"),
        ("jquery", "jQuery"),
        ("bootstrap", "Bootstrap"),
        ("tailwind", "Tailwind CSS"),
        ("googletagmanager.com", "Google Tag Manager"),
        ("google-analytics.com", "Google Analytics"),
        ("cloudflareinsights.com", "Cloudflare Analytics"),
    ]
});

/// Name the technologies a page visibly uses, from generator meta tags and
/// markup signatures. Best-effort fingerprinting, not an audit.
pub fn extract_technologies(html_str: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    let document = Html::parse_document(html_str);
    if let Ok(sel) = Selector::parse("meta[name='generator']") {
        for el in document.select(&sel) {
            if let Some(content) = el.value().attr("content") {
                let content = content.trim();
                if !content.is_empty() {
                    found.push(content.to_string());
                }
            }
        }
    }

    let html_lower = if html_str.len() > 256 * 1024 {
        html_str[..256 * 1024].to_lowercase()
    } else {
        html_str.to_lowercase()
    };
    for (needle, name) in SIGNATURES.iter() {
        if html_lower.contains(needle) && !found.iter().any(|f| f.contains(name)) {
            found.push((*name).to_string());
        }
    }

    found.truncate(15);
    found
}
