mod blob;
mod dataset;
mod manifest;
mod provenance;
mod reader;
mod schema;
mod summary;
mod writer;

pub use blob::{BlobFormat, BlobStore, StoredBlob};
pub use dataset::{DatasetMeta, DatasetWriter, PartMeta};
pub use manifest::{
    CoverageEntry, DatasetManifestEntry, Environment, Identity, Integrity, Manifest, Pack,
    PartIndexEntry, PrivacyPolicy, Producer, RobotsPolicy, Storage,
};
pub use provenance::ProvenanceRecord;
pub use reader::{validate_archive, ValidationReport};
pub use schema::DatasetKind;
pub use summary::AtlasSummary;
pub use writer::{ArchiveWriter, ArchiveWriterOptions};

use sha2::{Digest, Sha256};

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub(crate) fn sha256_file(path: &std::path::Path) -> std::io::Result<String> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
