use globset::{Glob, GlobMatcher};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use url::Url;

use crate::error::CrawlError;

/// What happens to query strings during normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryParamPolicy {
    #[default]
    Keep,
    Strip,
    Whitelist(Vec<String>),
}

impl QueryParamPolicy {
    pub fn from_config(policy: &str, whitelist: &[String]) -> Self {
        match policy {
            "strip" => QueryParamPolicy::Strip,
            "whitelist" => QueryParamPolicy::Whitelist(whitelist.to_vec()),
            _ => QueryParamPolicy::Keep,
        }
    }
}

/// Canonical form of a URL plus its dedup key. Construction is the only
/// way to get one, so holding a `NormalizedUrl` means normalization ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    url: Url,
    key: String,
}

impl NormalizedUrl {
    /// Canonicalize: lowercase host, default port stripped (both courtesy of
    /// the url crate), fragment removed, optional trailing-slash removal,
    /// query policy applied. Deterministic for a fixed policy.
    pub fn parse(raw: &str, policy: &QueryParamPolicy, strip_trailing_slash: bool) -> Result<Self, CrawlError> {
        let mut url = Url::parse(raw.trim()).map_err(|e| CrawlError::InvalidUrl(format!("{raw}: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CrawlError::InvalidUrl(format!("{raw}: unsupported scheme")));
        }
        if url.host_str().is_none() {
            return Err(CrawlError::InvalidUrl(format!("{raw}: missing host")));
        }
        url.set_fragment(None);

        match policy {
            QueryParamPolicy::Keep => {}
            QueryParamPolicy::Strip => url.set_query(None),
            QueryParamPolicy::Whitelist(keep) => {
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| keep.iter().any(|w| w == k))
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                if kept.is_empty() {
                    url.set_query(None);
                } else {
                    let query = kept
                        .iter()
                        .map(|(k, v)| {
                            if v.is_empty() {
                                k.clone()
                            } else {
                                format!("{k}={v}")
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("&");
                    url.set_query(Some(&query));
                }
            }
        }

        if strip_trailing_slash {
            let path = url.path().to_string();
            if path.len() > 1 && path.ends_with('/') {
                url.set_path(&path[..path.len() - 1]);
            }
        }

        let key = url_key(url.as_str());
        Ok(Self { url, key })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// SHA-1 hex of the normalized URL string, 40 chars.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// scheme + host + port, the unit robots and favicons key on.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    pub fn same_origin(&self, other: &NormalizedUrl) -> bool {
        self.url.origin() == other.url.origin()
    }

    /// Resolve a possibly-relative href against this URL, then normalize it
    /// under the same policy.
    pub fn join(&self, href: &str, policy: &QueryParamPolicy, strip_trailing_slash: bool) -> Result<Self, CrawlError> {
        let resolved = self
            .url
            .join(href)
            .map_err(|e| CrawlError::InvalidUrl(format!("{href}: {e}")))?;
        Self::parse(resolved.as_str(), policy, strip_trailing_slash)
    }
}

impl std::fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// SHA-1 hex of an already-normalized URL string.
pub fn url_key(normalized: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable key for an origin, used for favicon file names.
pub fn origin_key(origin: &str) -> String {
    url_key(origin)
}

enum CompiledPattern {
    Glob(GlobMatcher),
    Regex(Regex),
    /// Fallback when neither compiles: match the pattern text verbatim.
    Literal(String),
}

impl CompiledPattern {
    /// `/pattern/flags` compiles as a regex (only the `i` flag is
    /// meaningful); anything else compiles as a glob. An invalid regex falls
    /// back to matching the pattern text literally instead of failing.
    fn compile(pattern: &str) -> Self {
        if pattern.len() >= 2 && pattern.starts_with('/') {
            if let Some(end) = pattern.rfind('/') {
                if end > 0 {
                    let body = &pattern[1..end];
                    let flags = &pattern[end + 1..];
                    let mut builder = RegexBuilder::new(body);
                    builder.case_insensitive(flags.contains('i'));
                    if let Ok(re) = builder.build() {
                        return CompiledPattern::Regex(re);
                    }
                    return CompiledPattern::Literal(pattern.to_string());
                }
            }
        }
        match Glob::new(pattern) {
            Ok(glob) => CompiledPattern::Glob(glob.compile_matcher()),
            Err(_) => CompiledPattern::Literal(pattern.to_string()),
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            CompiledPattern::Glob(g) => g.is_match(text),
            CompiledPattern::Regex(r) => r.is_match(text),
            CompiledPattern::Literal(p) => text == p,
        }
    }
}

/// Allow/deny gate over normalized URL strings. Deny wins; a non-empty
/// allow list is exhaustive.
pub struct UrlFilter {
    allow: Vec<CompiledPattern>,
    deny: Vec<CompiledPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecision {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

impl UrlFilter {
    pub fn new(allow: &[String], deny: &[String]) -> Self {
        Self {
            allow: allow.iter().map(|p| CompiledPattern::compile(p)).collect(),
            deny: deny.iter().map(|p| CompiledPattern::compile(p)).collect(),
        }
    }

    pub fn should_allow(&self, url: &str) -> FilterDecision {
        if self.deny.iter().any(|p| p.is_match(url)) {
            return FilterDecision {
                allowed: false,
                reason: Some("matched deny pattern"),
            };
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|p| p.is_match(url)) {
            return FilterDecision {
                allowed: false,
                reason: Some("not in allow list"),
            };
        }
        FilterDecision {
            allowed: true,
            reason: None,
        }
    }
}
