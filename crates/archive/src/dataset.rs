use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use jsonschema::Validator;
use serde::Serialize;
use tracing::{debug, info};

use atlas_core::{CrawlError, PartPointer};

use crate::schema::DatasetKind;
use crate::sha256_file;

const ZSTD_LEVEL: i32 = 3;
pub const DATASET_VERSION: &str = "1.0.0";

/// What a finalized dataset contributed to the archive.
#[derive(Debug, Clone)]
pub struct DatasetMeta {
    pub name: &'static str,
    pub version: &'static str,
    pub record_count: u64,
    pub bytes_uncompressed: u64,
    pub bytes_compressed: u64,
    /// SHA-256 of the concatenated, sorted part hashes.
    pub dataset_hash: String,
    pub schema_uri: String,
    pub schema_hash: String,
    pub parts: Vec<PartMeta>,
}

#[derive(Debug, Clone)]
pub struct PartMeta {
    /// Path relative to the archive root, e.g. `pages/part-001.jsonl.zst`.
    pub rel_path: String,
    pub record_count: u64,
    pub bytes_uncompressed: u64,
    pub bytes_compressed: u64,
    pub sha256: String,
}

struct OpenPart {
    writer: BufWriter<File>,
    path: PathBuf,
    bytes: u64,
    records: u64,
}

/// Schema-validated, size-rotating JSONL part stream for one dataset.
/// Parts stay plain text during the crawl; `finalize` compresses them.
pub struct DatasetWriter {
    kind: DatasetKind,
    dir: PathBuf,
    validator: Validator,
    max_part_bytes: u64,
    flush_every: u64,
    part_index: u32,
    current: Option<OpenPart>,
    closed_parts: Vec<(PathBuf, u64, u64)>,
    records_total: u64,
    bytes_total: u64,
    records_since_flush: u64,
}

impl DatasetWriter {
    pub fn create(
        staging: &std::path::Path,
        kind: DatasetKind,
        max_part_bytes: u64,
        flush_every: u64,
    ) -> Result<Self, CrawlError> {
        let dir = staging.join(kind.name());
        fs::create_dir_all(&dir)?;
        Ok(Self {
            kind,
            dir,
            validator: kind.compile_validator()?,
            max_part_bytes,
            flush_every,
            part_index: 0,
            current: None,
            closed_parts: Vec::new(),
            records_total: 0,
            bytes_total: 0,
            records_since_flush: 0,
        })
    }

    /// Reopen after a crash, truncating the active part to the checkpointed
    /// offset and discarding any torn trailing line. Counters are rebuilt by
    /// scanning the surviving parts.
    pub fn resume(
        staging: &std::path::Path,
        kind: DatasetKind,
        max_part_bytes: u64,
        flush_every: u64,
        pointer: Option<&PartPointer>,
    ) -> Result<Self, CrawlError> {
        let mut writer = Self::create(staging, kind, max_part_bytes, flush_every)?;

        let mut part_paths: Vec<PathBuf> = fs::read_dir(&writer.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().map(|e| e == "jsonl").unwrap_or(false)
            })
            .collect();
        part_paths.sort();

        match pointer {
            Some(pointer) => {
                let active = writer.dir.join(&pointer.filename);
                truncate_to_clean_offset(&active, pointer.byte_offset)?;
                // Anything numbered after the checkpointed part is
                // post-checkpoint garbage from the crashed run.
                let checkpointed = part_number(Path::new(&pointer.filename));
                part_paths.retain(|p| {
                    let keep = matches!(
                        (part_number(p), checkpointed),
                        (Some(n), Some(c)) if n <= c
                    );
                    if !keep {
                        let _ = fs::remove_file(p);
                    }
                    keep
                });
            }
            None => {
                // The dataset was empty at checkpoint time; any parts on
                // disk were written after it.
                for path in part_paths.drain(..) {
                    let _ = fs::remove_file(path);
                }
            }
        }

        for (i, path) in part_paths.iter().enumerate() {
            let (records, bytes) = count_jsonl(path)?;
            writer.records_total += records;
            writer.bytes_total += bytes;
            let is_last = i == part_paths.len() - 1;
            writer.part_index = part_number(path).unwrap_or(writer.part_index + 1);
            if is_last {
                let file = OpenOptions::new().append(true).open(path)?;
                writer.current = Some(OpenPart {
                    writer: BufWriter::new(file),
                    path: path.clone(),
                    bytes,
                    records,
                });
            } else {
                writer.closed_parts.push((path.clone(), records, bytes));
            }
        }

        debug!(
            dataset = writer.kind.name(),
            records = writer.records_total,
            parts = part_paths.len(),
            "dataset writer resumed"
        );
        Ok(writer)
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn record_count(&self) -> u64 {
        self.records_total
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<(), CrawlError> {
        let value = serde_json::to_value(record).map_err(|e| CrawlError::Schema {
            dataset: self.kind.name().to_string(),
            message: format!("serialize: {e}"),
        })?;
        self.kind.validate(&self.validator, &value)?;

        let mut line = value.to_string();
        line.push('\n');
        let line_bytes = line.len() as u64;

        let needs_rotation = match &self.current {
            Some(part) => part.bytes + line_bytes > self.max_part_bytes && part.records > 0,
            None => false,
        };
        if needs_rotation {
            self.rotate()?;
        }
        if self.current.is_none() {
            self.open_next_part()?;
        }

        let part = self.current.as_mut().unwrap_or_else(|| unreachable!());
        part.writer.write_all(line.as_bytes())?;
        part.bytes += line_bytes;
        part.records += 1;
        self.records_total += 1;
        self.bytes_total += line_bytes;
        self.records_since_flush += 1;

        if self.records_since_flush >= self.flush_every {
            self.flush_and_sync()?;
        }
        Ok(())
    }

    /// Flush buffers and fsync the open descriptor. Called on cadence, before
    /// checkpoints and on shutdown.
    pub fn flush_and_sync(&mut self) -> Result<(), CrawlError> {
        if let Some(part) = self.current.as_mut() {
            part.writer.flush()?;
            part.writer.get_ref().sync_all()?;
        }
        self.records_since_flush = 0;
        Ok(())
    }

    /// Where the next record will land, for checkpoint part pointers.
    pub fn part_pointer(&mut self) -> Result<Option<PartPointer>, CrawlError> {
        self.flush_and_sync()?;
        Ok(self.current.as_ref().map(|part| PartPointer {
            filename: part
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            byte_offset: part.bytes,
        }))
    }

    fn open_next_part(&mut self) -> Result<(), CrawlError> {
        self.part_index += 1;
        let path = self.dir.join(format!("part-{:03}.jsonl", self.part_index));
        let file = File::create(&path)?;
        debug!(dataset = self.kind.name(), part = %path.display(), "opened part");
        self.current = Some(OpenPart {
            writer: BufWriter::new(file),
            path,
            bytes: 0,
            records: 0,
        });
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), CrawlError> {
        if let Some(mut part) = self.current.take() {
            part.writer.flush()?;
            part.writer.get_ref().sync_all()?;
            info!(
                dataset = self.kind.name(),
                part = %part.path.display(),
                records = part.records,
                bytes = part.bytes,
                "rotating part"
            );
            self.closed_parts.push((part.path, part.records, part.bytes));
        }
        Ok(())
    }

    /// Close the stream, compress every part with zstd, delete the plaintext
    /// files and return the dataset's contribution to the manifest.
    pub fn finalize(mut self) -> Result<DatasetMeta, CrawlError> {
        self.rotate()?;

        let mut parts: Vec<PartMeta> = Vec::new();
        let mut bytes_compressed_total = 0u64;

        for (path, records, bytes_uncompressed) in &self.closed_parts {
            let compressed_path = path.with_extension("jsonl.zst");
            {
                let input = File::open(path)?;
                let output = File::create(&compressed_path)?;
                let mut reader = BufReader::new(input);
                let mut encoder = zstd::stream::Encoder::new(BufWriter::new(output), ZSTD_LEVEL)
                    .map_err(CrawlError::WriteDisk)?;
                std::io::copy(&mut reader, &mut encoder)?;
                let mut writer = encoder.finish().map_err(CrawlError::WriteDisk)?;
                writer.flush()?;
            }
            // The plaintext part goes away even if later steps fail.
            fs::remove_file(path)?;

            let bytes_compressed = fs::metadata(&compressed_path)?.len();
            bytes_compressed_total += bytes_compressed;
            let sha256 = sha256_file(&compressed_path)?;
            let rel_path = format!(
                "{}/{}",
                self.kind.name(),
                compressed_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            );
            parts.push(PartMeta {
                rel_path,
                record_count: *records,
                bytes_uncompressed: *bytes_uncompressed,
                bytes_compressed,
                sha256,
            });
        }

        let mut sorted_hashes: Vec<&str> = parts.iter().map(|p| p.sha256.as_str()).collect();
        sorted_hashes.sort_unstable();
        let dataset_hash = crate::sha256_hex(sorted_hashes.concat().as_bytes());

        let schema_hash = crate::sha256_hex(self.kind.schema_json().as_bytes());

        Ok(DatasetMeta {
            name: self.kind.name(),
            version: DATASET_VERSION,
            record_count: self.records_total,
            bytes_uncompressed: self.bytes_total,
            bytes_compressed: bytes_compressed_total,
            dataset_hash,
            schema_uri: self.kind.schema_uri(),
            schema_hash,
            parts,
        })
    }
}

/// Truncate `path` to `offset`, then drop any trailing partial JSON line so
/// a resume never replays half a record.
fn truncate_to_clean_offset(path: &std::path::Path, offset: u64) -> Result<(), CrawlError> {
    if !path.exists() {
        return Ok(());
    }
    let len = fs::metadata(path)?.len();
    if len > offset {
        info!(path = %path.display(), from = len, to = offset, "truncating part past checkpoint offset");
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset)?;
    }

    // Scan backwards for the last newline; everything after it is torn.
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let tail_start = len.saturating_sub(64 * 1024);
    file.seek(SeekFrom::Start(tail_start))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;
    match tail.iter().rposition(|b| *b == b'\n') {
        Some(pos) => {
            let clean_len = tail_start + pos as u64 + 1;
            if clean_len < len {
                info!(path = %path.display(), "dropping torn trailing line");
                file.set_len(clean_len)?;
            }
        }
        None if tail_start == 0 => {
            // No newline at all: the single line is torn.
            file.set_len(0)?;
        }
        None => {}
    }
    Ok(())
}

fn count_jsonl(path: &std::path::Path) -> Result<(u64, u64), CrawlError> {
    let mut file = BufReader::new(File::open(path)?);
    let mut records = 0u64;
    let mut bytes = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        bytes += n as u64;
        records += buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
    }
    Ok((records, bytes))
}

fn part_number(path: &std::path::Path) -> Option<u32> {
    path.file_stem()?
        .to_string_lossy()
        .strip_prefix("part-")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::{ConsoleRecord, EventRecord};
    use tempfile::TempDir;

    fn writer(dir: &TempDir, max_part_bytes: u64) -> DatasetWriter {
        DatasetWriter::create(dir.path(), DatasetKind::Console, max_part_bytes, 1000).unwrap()
    }

    fn record(text: &str) -> ConsoleRecord {
        ConsoleRecord {
            page_url: "https://h/".into(),
            level: "log".into(),
            text: text.into(),
        }
    }

    #[test]
    fn write_validate_finalize() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 1024 * 1024);
        for i in 0..10 {
            w.write(&record(&format!("line {i}"))).unwrap();
        }
        let meta = w.finalize().unwrap();
        assert_eq!(meta.record_count, 10);
        assert_eq!(meta.parts.len(), 1);
        assert_eq!(meta.parts[0].rel_path, "console/part-001.jsonl.zst");
        assert!(meta.bytes_compressed > 0);

        // Plaintext is gone, only the compressed part remains.
        let entries: Vec<_> = fs::read_dir(dir.path().join("console"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["part-001.jsonl.zst"]);
    }

    #[test]
    fn schema_violation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 1024 * 1024);
        let err = w
            .write(&serde_json::json!({ "pageUrl": "https://h/" }))
            .unwrap_err();
        assert!(matches!(err, CrawlError::Schema { .. }));
        assert_eq!(w.record_count(), 0);
    }

    #[test]
    fn parts_rotate_at_size_threshold() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 256);
        for i in 0..10 {
            w.write(&record(&format!("padding padding padding {i}"))).unwrap();
        }
        let meta = w.finalize().unwrap();
        assert!(meta.parts.len() > 1, "expected rotation, got {} part(s)", meta.parts.len());
        assert_eq!(
            meta.parts.iter().map(|p| p.record_count).sum::<u64>(),
            10
        );
        // Every part respects the cap.
        for part in &meta.parts {
            assert!(part.bytes_uncompressed <= 256 + 128);
        }
    }

    #[test]
    fn dataset_hash_is_order_stable() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, 1024 * 1024);
        w.write(&record("a")).unwrap();
        let meta = w.finalize().unwrap();

        let mut hashes: Vec<&str> = meta.parts.iter().map(|p| p.sha256.as_str()).collect();
        hashes.sort_unstable();
        assert_eq!(
            meta.dataset_hash,
            crate::sha256_hex(hashes.concat().as_bytes())
        );
    }

    #[test]
    fn resume_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let pointer;
        {
            let mut w = DatasetWriter::create(dir.path(), DatasetKind::Events, 1024 * 1024, 1000)
                .unwrap();
            w.write(&EventRecord::new("one")).unwrap();
            w.write(&EventRecord::new("two")).unwrap();
            pointer = w.part_pointer().unwrap().unwrap();
            // Crash after the checkpoint: a torn half-record lands on disk.
            w.write(&EventRecord::new("three")).unwrap();
            w.flush_and_sync().unwrap();
        }
        let part_path = dir.path().join("events").join(&pointer.filename);
        let mut contents = fs::read(&part_path).unwrap();
        contents.extend_from_slice(b"{\"timestamp\":\"2026-");
        fs::write(&part_path, &contents).unwrap();

        let resumed = DatasetWriter::resume(
            dir.path(),
            DatasetKind::Events,
            1024 * 1024,
            1000,
            Some(&pointer),
        )
        .unwrap();
        // Record "three" and the torn tail are both gone.
        assert_eq!(resumed.record_count(), 2);
        let meta = resumed.finalize().unwrap();
        assert_eq!(meta.record_count, 2);
    }

    #[test]
    fn empty_dataset_finalizes_with_no_parts() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir, 1024 * 1024);
        let meta = w.finalize().unwrap();
        assert_eq!(meta.record_count, 0);
        assert!(meta.parts.is_empty());
    }
}
