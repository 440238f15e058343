use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry per dataset describing who produced it, from what, and what
/// came out. Written as `provenance.v1.jsonl` and compressed like any part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub dataset_name: String,
    pub producer: ProvenanceProducer,
    pub created_at: DateTime<Utc>,
    pub inputs: Vec<ProvenanceInput>,
    pub parameters: Value,
    pub output: ProvenanceOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceProducer {
    pub app: String,
    pub version: String,
    pub module: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceInput {
    pub dataset: String,
    pub hash_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceOutput {
    pub record_count: u64,
    pub hash_sha256: String,
}
