use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use atlas_core::CrawlError;

use crate::sha256_hex;

const PACK_FILE: &str = "pack.bin";
const PACK_INDEX: &str = "pack.idx.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFormat {
    /// One file per blob under blobs/<first2hex>/<sha256>.bin
    Individual,
    /// All blobs appended to one pack file with an offset index.
    Packed,
}

impl BlobFormat {
    pub fn from_config(s: &str) -> Self {
        match s {
            "packed" => BlobFormat::Packed,
            _ => BlobFormat::Individual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlobFormat::Individual => "individual",
            BlobFormat::Packed => "packed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackEntry {
    offset: u64,
    length: u64,
}

/// Content-addressed blob storage under `<staging>/blobs/`. Write-once per
/// hash: storing the same bytes twice returns the first ref without touching
/// disk again.
pub struct BlobStore {
    root: PathBuf,
    format: BlobFormat,
    /// sha256 -> ref, for dedup without re-reading disk.
    index: HashMap<String, String>,
    /// Packed layout bookkeeping.
    pack: HashMap<String, PackEntry>,
    pack_len: u64,
    blob_count: u64,
    bytes_stored: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub hash: String,
    pub blob_ref: String,
}

impl BlobStore {
    pub fn create(staging: &Path, format: BlobFormat) -> Result<Self, CrawlError> {
        let root = staging.join("blobs");
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            format,
            index: HashMap::new(),
            pack: HashMap::new(),
            pack_len: 0,
            blob_count: 0,
            bytes_stored: 0,
        })
    }

    /// Rebuild state from an existing staging directory on resume.
    pub fn resume(staging: &Path, format: BlobFormat) -> Result<Self, CrawlError> {
        let mut store = Self::create(staging, format)?;
        match format {
            BlobFormat::Individual => {
                for shard in fs::read_dir(&store.root)? {
                    let shard = shard?;
                    if !shard.file_type()?.is_dir() {
                        continue;
                    }
                    for entry in fs::read_dir(shard.path())? {
                        let entry = entry?;
                        let name = entry.file_name().to_string_lossy().to_string();
                        if let Some(hash) = name.strip_suffix(".bin") {
                            store.bytes_stored += entry.metadata()?.len();
                            store.blob_count += 1;
                            store
                                .index
                                .insert(hash.to_string(), format!("sha256:{hash}"));
                        }
                    }
                }
            }
            BlobFormat::Packed => {
                let index_path = store.root.join(PACK_INDEX);
                if index_path.exists() {
                    let raw = fs::read_to_string(&index_path)?;
                    store.pack = serde_json::from_str(&raw).map_err(|e| {
                        CrawlError::CorruptCheckpoint(format!("blob pack index: {e}"))
                    })?;
                    store.pack_len = store
                        .pack
                        .values()
                        .map(|e| e.offset + e.length)
                        .max()
                        .unwrap_or(0);
                    store.blob_count = store.pack.len() as u64;
                    store.bytes_stored = store.pack.values().map(|e| e.length).sum();
                    for (hash, entry) in &store.pack {
                        store.index.insert(
                            hash.clone(),
                            format!("pack:{hash}:{}:{}", entry.offset, entry.length),
                        );
                    }
                    // Drop any bytes written after the last indexed blob.
                    let pack_path = store.root.join(PACK_FILE);
                    if pack_path.exists() {
                        let file = OpenOptions::new().write(true).open(&pack_path)?;
                        file.set_len(store.pack_len)?;
                    }
                }
            }
        }
        debug!(blobs = store.blob_count, "blob store resumed");
        Ok(store)
    }

    /// Store bytes, returning their hash and an opaque ref. Byte-identical
    /// inputs always map to the same ref.
    pub fn store(&mut self, bytes: &[u8]) -> Result<StoredBlob, CrawlError> {
        let hash = sha256_hex(bytes);
        if let Some(existing) = self.index.get(&hash) {
            return Ok(StoredBlob {
                hash,
                blob_ref: existing.clone(),
            });
        }

        let blob_ref = match self.format {
            BlobFormat::Individual => {
                let shard = self.root.join(&hash[..2]);
                fs::create_dir_all(&shard)?;
                let path = shard.join(format!("{hash}.bin"));
                fs::write(&path, bytes)?;
                format!("sha256:{hash}")
            }
            BlobFormat::Packed => {
                let pack_path = self.root.join(PACK_FILE);
                let mut file = OpenOptions::new().create(true).append(true).open(&pack_path)?;
                let offset = self.pack_len;
                file.write_all(bytes)?;
                self.pack_len += bytes.len() as u64;
                self.pack.insert(
                    hash.clone(),
                    PackEntry {
                        offset,
                        length: bytes.len() as u64,
                    },
                );
                format!("pack:{hash}:{offset}:{}", bytes.len())
            }
        };

        self.blob_count += 1;
        self.bytes_stored += bytes.len() as u64;
        self.index.insert(hash.clone(), blob_ref.clone());
        Ok(StoredBlob { hash, blob_ref })
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.index.contains_key(hash)
    }

    pub fn get(&self, blob_ref: &str) -> Result<Vec<u8>, CrawlError> {
        if let Some(hash) = blob_ref.strip_prefix("sha256:") {
            let path = self.root.join(&hash[..2]).join(format!("{hash}.bin"));
            return Ok(fs::read(path)?);
        }
        if let Some(rest) = blob_ref.strip_prefix("pack:") {
            let mut parts = rest.split(':');
            let _hash = parts.next();
            let offset: u64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad_ref(blob_ref))?;
            let length: u64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad_ref(blob_ref))?;
            let mut file = File::open(self.root.join(PACK_FILE))?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; length as usize];
            file.read_exact(&mut buf)?;
            return Ok(buf);
        }
        Err(bad_ref(blob_ref))
    }

    /// Persist the pack index so a resumed crawl can pick up where it left
    /// off. No-op for the individual layout, which is self-describing.
    pub fn sync_index(&self) -> Result<(), CrawlError> {
        if self.format == BlobFormat::Packed {
            let tmp = self.root.join(format!("{PACK_INDEX}.tmp"));
            let json = serde_json::to_string(&self.pack)
                .map_err(|e| CrawlError::Config(format!("pack index serialize: {e}")))?;
            fs::write(&tmp, json)?;
            fs::rename(&tmp, self.root.join(PACK_INDEX))?;
        }
        Ok(())
    }

    pub fn blob_count(&self) -> u64 {
        self.blob_count
    }

    pub fn bytes_stored(&self) -> u64 {
        self.bytes_stored
    }

    pub fn format(&self) -> BlobFormat {
        self.format
    }
}

fn bad_ref(blob_ref: &str) -> CrawlError {
    CrawlError::Config(format!("undecodable blob ref: {blob_ref}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn individual_store_and_get() {
        let dir = TempDir::new().unwrap();
        let mut store = BlobStore::create(dir.path(), BlobFormat::Individual).unwrap();

        let stored = store.store(b"hello").unwrap();
        assert_eq!(stored.hash, crate::sha256_hex(b"hello"));
        assert!(store.exists(&stored.hash));
        assert_eq!(store.get(&stored.blob_ref).unwrap(), b"hello");
    }

    #[test]
    fn identical_bytes_one_blob() {
        let dir = TempDir::new().unwrap();
        let mut store = BlobStore::create(dir.path(), BlobFormat::Individual).unwrap();

        let a = store.store(b"same bytes").unwrap();
        let b = store.store(b"same bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.blob_count(), 1);

        let c = store.store(b"different").unwrap();
        assert_ne!(a.blob_ref, c.blob_ref);
        assert_eq!(store.blob_count(), 2);
    }

    #[test]
    fn packed_store_and_get() {
        let dir = TempDir::new().unwrap();
        let mut store = BlobStore::create(dir.path(), BlobFormat::Packed).unwrap();

        let a = store.store(b"first blob").unwrap();
        let b = store.store(b"second blob").unwrap();
        assert!(a.blob_ref.starts_with("pack:"));
        assert_eq!(store.get(&a.blob_ref).unwrap(), b"first blob");
        assert_eq!(store.get(&b.blob_ref).unwrap(), b"second blob");
    }

    #[test]
    fn packed_resume_round_trip() {
        let dir = TempDir::new().unwrap();
        let first_ref;
        {
            let mut store = BlobStore::create(dir.path(), BlobFormat::Packed).unwrap();
            first_ref = store.store(b"survives resume").unwrap();
            store.sync_index().unwrap();
        }
        let mut resumed = BlobStore::resume(dir.path(), BlobFormat::Packed).unwrap();
        assert_eq!(resumed.blob_count(), 1);
        assert_eq!(resumed.get(&first_ref.blob_ref).unwrap(), b"survives resume");
        // Re-storing the same bytes still dedups after resume.
        let again = resumed.store(b"survives resume").unwrap();
        assert_eq!(again.blob_ref, first_ref.blob_ref);
    }

    #[test]
    fn individual_resume_scans_shards() {
        let dir = TempDir::new().unwrap();
        let stored;
        {
            let mut store = BlobStore::create(dir.path(), BlobFormat::Individual).unwrap();
            stored = store.store(b"on disk").unwrap();
        }
        let resumed = BlobStore::resume(dir.path(), BlobFormat::Individual).unwrap();
        assert!(resumed.exists(&stored.hash));
        assert_eq!(resumed.blob_count(), 1);
    }
}
