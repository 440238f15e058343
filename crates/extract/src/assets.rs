use scraper::{Html, Selector};
use url::Url;

use atlas_core::{AssetRecord, AssetType, Dimensions};

const MAX_ASSETS_PER_PAGE: usize = 1000;

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// Collect sub-resource references: images, media, scripts, styles, fonts.
/// Capped at 1000 per page.
pub fn extract_assets(html_str: &str, base_url: &Url) -> Vec<AssetRecord> {
    let document = Html::parse_document(html_str);
    let page_url = base_url.to_string();
    let mut assets: Vec<AssetRecord> = Vec::new();

    let mut push = |assets: &mut Vec<AssetRecord>, record: AssetRecord| {
        if assets.len() < MAX_ASSETS_PER_PAGE {
            assets.push(record);
        }
    };

    if let Some(sel) = selector("img[src]") {
        for el in document.select(&sel) {
            let Some(src) = resolve(base_url, el.value().attr("src")) else {
                continue;
            };
            let alt = el.value().attr("alt").map(str::to_string);
            push(
                &mut assets,
                AssetRecord {
                    page_url: page_url.clone(),
                    src,
                    asset_type: AssetType::Img,
                    has_alt: alt.as_deref().map(|a| !a.is_empty()).unwrap_or(false),
                    alt,
                    dimensions: parse_dimensions(
                        el.value().attr("width"),
                        el.value().attr("height"),
                    ),
                    loading_attr: el.value().attr("loading").map(str::to_string),
                    visible: None,
                    in_viewport: None,
                },
            );
        }
    }

    for (css, asset_type) in [("video", AssetType::Video), ("audio", AssetType::Audio)] {
        if let Some(sel) = selector(css) {
            for el in document.select(&sel) {
                // src may sit on the element or on a <source> child.
                let src = el.value().attr("src").map(str::to_string).or_else(|| {
                    selector("source[src]").and_then(|s| {
                        el.select(&s)
                            .next()
                            .and_then(|c| c.value().attr("src"))
                            .map(str::to_string)
                    })
                });
                let Some(src) = resolve(base_url, src.as_deref()) else {
                    continue;
                };
                push(
                    &mut assets,
                    AssetRecord {
                        page_url: page_url.clone(),
                        src,
                        asset_type,
                        alt: None,
                        has_alt: false,
                        dimensions: None,
                        loading_attr: None,
                        visible: None,
                        in_viewport: None,
                    },
                );
            }
        }
    }

    if let Some(sel) = selector("script[src]") {
        for el in document.select(&sel) {
            let Some(src) = resolve(base_url, el.value().attr("src")) else {
                continue;
            };
            push(
                &mut assets,
                AssetRecord {
                    page_url: page_url.clone(),
                    src,
                    asset_type: AssetType::Script,
                    alt: None,
                    has_alt: false,
                    dimensions: None,
                    loading_attr: None,
                    visible: None,
                    in_viewport: None,
                },
            );
        }
    }

    if let Some(sel) = selector("link[href]") {
        for el in document.select(&sel) {
            let rel = el.value().attr("rel").unwrap_or("").to_lowercase();
            let as_attr = el.value().attr("as").unwrap_or("").to_lowercase();
            let asset_type = if rel.contains("stylesheet") {
                AssetType::Style
            } else if as_attr == "font" {
                AssetType::Font
            } else {
                continue;
            };
            let Some(src) = resolve(base_url, el.value().attr("href")) else {
                continue;
            };
            push(
                &mut assets,
                AssetRecord {
                    page_url: page_url.clone(),
                    src,
                    asset_type,
                    alt: None,
                    has_alt: false,
                    dimensions: None,
                    loading_attr: None,
                    visible: None,
                    in_viewport: None,
                },
            );
        }
    }

    assets
}

fn resolve(base: &Url, src: Option<&str>) -> Option<String> {
    let src = src?.trim();
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    base.join(src).ok().map(|u| u.to_string())
}

fn parse_dimensions(width: Option<&str>, height: Option<&str>) -> Option<Dimensions> {
    Some(Dimensions {
        width: width?.trim().parse().ok()?,
        height: height?.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[test]
    fn images_with_attrs() {
        let html = r#"<body>
            <img src="/a.png" alt="A picture" width="640" height="480" loading="lazy">
            <img src="/b.png" alt="">
            <img src="data:image/png;base64,xyz">
        </body>"#;
        let assets = extract_assets(html, &base());
        assert_eq!(assets.len(), 2);

        let a = &assets[0];
        assert_eq!(a.src, "https://example.com/a.png");
        assert!(a.has_alt);
        assert_eq!(a.dimensions.as_ref().unwrap().width, 640);
        assert_eq!(a.loading_attr.as_deref(), Some("lazy"));

        // Empty alt is present but does not count as having alt text.
        let b = &assets[1];
        assert!(!b.has_alt);
        assert_eq!(b.alt.as_deref(), Some(""));
    }

    #[test]
    fn scripts_styles_fonts_media() {
        let html = r#"<head>
            <script src="/app.js"></script>
            <link rel="stylesheet" href="/main.css">
            <link rel="preload" as="font" href="/f.woff2">
            <link rel="canonical" href="/page">
        </head><body>
            <video src="/v.mp4"></video>
            <audio><source src="/a.mp3"></audio>
        </body>"#;
        let assets = extract_assets(html, &base());
        let types: Vec<AssetType> = assets.iter().map(|a| a.asset_type).collect();
        assert!(types.contains(&AssetType::Script));
        assert!(types.contains(&AssetType::Style));
        assert!(types.contains(&AssetType::Font));
        assert!(types.contains(&AssetType::Video));
        assert!(types.contains(&AssetType::Audio));
        // canonical link is not an asset
        assert_eq!(assets.len(), 5);
    }

    #[test]
    fn cap_is_enforced() {
        let mut html = String::from("<body>");
        for i in 0..1200 {
            html.push_str(&format!("<img src=\"/i{i}.png\">"));
        }
        html.push_str("</body>");
        assert_eq!(extract_assets(&html, &base()).len(), MAX_ASSETS_PER_PAGE);
    }
}
