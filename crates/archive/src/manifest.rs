use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ATLAS_VERSION: &str = "1.0";
pub const FORMAT_VERSION: &str = "1.0.0";
pub const SPEC_VERSION: &str = "1.0";

/// The archive's self-description. Written provisionally during the crawl
/// with `incomplete=true` and finalized atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub atlas_version: String,
    pub format_version: String,
    pub spec_version: String,
    /// ISO date of the schema generation the datasets conform to.
    pub schema_version: String,
    pub owner: String,
    pub consumers: Vec<String>,
    pub identity: Identity,
    pub crawl_started_at: DateTime<Utc>,
    pub crawl_completed_at: Option<DateTime<Utc>>,
    pub producer: Producer,
    pub environment: Environment,
    pub privacy_policy: PrivacyPolicy,
    pub robots_policy: RobotsPolicy,
    pub crawl_config_hash: String,
    pub hashing: Hashing,
    pub datasets: BTreeMap<String, DatasetManifestEntry>,
    pub parts_index: Vec<PartIndexEntry>,
    pub coverage: Coverage,
    pub storage: Storage,
    pub packs: Vec<Pack>,
    pub integrity: Integrity,
    pub incomplete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub primary_origin: String,
    pub seed_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub device: String,
    pub viewport: Viewport,
    pub user_agent: String,
    pub locale: String,
    pub timezone: String,
    pub browser: BrowserInfo,
    pub platform: PlatformInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
    pub headless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyPolicy {
    pub strip_cookies: bool,
    pub strip_auth_headers: bool,
    pub redact_inputs: bool,
    pub redact_forms: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotsPolicy {
    pub respect: bool,
    pub overrides_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hashing {
    pub algorithm: String,
    pub url_key_algo: String,
    pub raw_html_hash: String,
    pub dom_hash: String,
}

impl Default for Hashing {
    fn default() -> Self {
        Self {
            algorithm: "sha256".into(),
            url_key_algo: "sha1".into(),
            raw_html_hash: "sha256 of raw body".into(),
            dom_hash: "sha256 of serialized live DOM".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetManifestEntry {
    pub present: bool,
    pub part_count: u64,
    pub record_count: u64,
    pub bytes: u64,
    pub schema: String,
    pub schema_version: String,
    pub schema_hash: String,
    pub integrity: DatasetIntegrity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetIntegrity {
    pub algorithm: String,
    pub checksums: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartIndexEntry {
    pub name: String,
    pub path: String,
    pub schema_ref: String,
    pub content_type: String,
    pub content_encoding: String,
    pub record_count: u64,
    pub bytes_uncompressed: u64,
    pub bytes_compressed: u64,
    pub sha256: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    pub matrix: Vec<CoverageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageEntry {
    pub part: String,
    pub expected: bool,
    pub present: bool,
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_if_absent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub compression: Compression,
    pub blob_format: String,
    pub replay_tier: String,
    pub content_addressing: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaStorage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compression {
    pub algorithm: String,
    pub level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStorage {
    pub screenshots: bool,
    pub favicons: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub name: String,
    pub version: String,
    /// embedded | sidecar | missing
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrity {
    /// relative path -> sha256 of file bytes, for every file in the archive
    /// except manifest.json itself.
    pub files: BTreeMap<String, String>,
    /// SHA-256 of the concatenated hash values, sorted by file name.
    pub archive_sha256: String,
}

impl Integrity {
    pub fn from_files(files: BTreeMap<String, String>) -> Self {
        // BTreeMap iterates in key (file name) order, which is the sort the
        // archive hash is defined over.
        let concatenated: String = files.values().cloned().collect();
        let archive_sha256 = crate::sha256_hex(concatenated.as_bytes());
        Self {
            files,
            archive_sha256,
        }
    }
}
