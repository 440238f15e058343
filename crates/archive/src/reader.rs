use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;
use zip::ZipArchive;

use crate::manifest::{Integrity, Manifest};
use crate::schema::DatasetKind;

/// Outcome of validating a finished `.atls` file. Warnings never fail a
/// validation; errors do.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check integrity hashes, part counts, schema conformance and the
/// duplicate-urlKey invariant of a packed archive.
pub fn validate_archive(path: &Path) -> Result<ValidationReport, String> {
    let file = File::open(path).map_err(|e| format!("cannot open archive: {e}"))?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| format!("not a readable archive: {e}"))?;

    let manifest: Manifest = {
        let entry = archive
            .by_name("manifest.json")
            .map_err(|e| format!("manifest.json missing: {e}"))?;
        serde_json::from_reader(entry).map_err(|e| format!("manifest.json unreadable: {e}"))?
    };

    let mut report = ValidationReport::default();

    if manifest.incomplete {
        report
            .errors
            .push("manifest is marked incomplete".to_string());
    }

    verify_file_hashes(&mut archive, &manifest.integrity, &mut report);
    verify_archive_hash(&manifest.integrity, &mut report);
    verify_parts(&mut archive, &manifest, &mut report);
    verify_coverage(&manifest, &mut report);

    Ok(report)
}

fn verify_file_hashes<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    integrity: &Integrity,
    report: &mut ValidationReport,
) {
    for (rel_path, expected) in &integrity.files {
        let mut entry = match archive.by_name(rel_path) {
            Ok(entry) => entry,
            Err(_) => {
                report
                    .errors
                    .push(format!("file listed in integrity missing: {rel_path}"));
                continue;
            }
        };
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            match entry.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buf[..n]),
                Err(e) => {
                    report.errors.push(format!("cannot read {rel_path}: {e}"));
                    return;
                }
            }
        }
        let actual = hex::encode(hasher.finalize());
        if &actual != expected {
            report.errors.push(format!(
                "hash mismatch for {rel_path}: manifest {expected}, actual {actual}"
            ));
        }
    }
    debug!(files = integrity.files.len(), "file hashes checked");
}

fn verify_archive_hash(integrity: &Integrity, report: &mut ValidationReport) {
    let recomputed = Integrity::from_files(integrity.files.clone()).archive_sha256;
    if recomputed != integrity.archive_sha256 {
        report.errors.push(format!(
            "archiveSha256 mismatch: manifest {}, recomputed {recomputed}",
            integrity.archive_sha256
        ));
    }
}

fn verify_parts<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    manifest: &Manifest,
    report: &mut ValidationReport,
) {
    let mut page_keys: HashSet<String> = HashSet::new();

    for part in &manifest.parts_index {
        let kind = DatasetKind::ALL
            .into_iter()
            .find(|k| k.name() == part.name);
        let validator = kind.and_then(|k| k.compile_validator().ok().map(|v| (k, v)));

        let entry = match archive.by_name(&part.path) {
            Ok(entry) => entry,
            Err(_) => {
                report
                    .errors
                    .push(format!("part missing from archive: {}", part.path));
                continue;
            }
        };
        let decoder = match zstd::stream::Decoder::new(entry) {
            Ok(d) => d,
            Err(e) => {
                report
                    .errors
                    .push(format!("part not zstd-decodable: {}: {e}", part.path));
                continue;
            }
        };

        let mut lines = 0u64;
        for line in BufReader::new(decoder).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    report
                        .errors
                        .push(format!("read failure in {}: {e}", part.path));
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            lines += 1;

            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    report
                        .errors
                        .push(format!("invalid JSON in {} line {lines}: {e}", part.path));
                    continue;
                }
            };

            if let Some((kind, validator)) = &validator {
                if let Err(e) = kind.validate(validator, &value) {
                    report
                        .warnings
                        .push(format!("schema violation in {} line {lines}: {e}", part.path));
                }
            }

            if part.name == "pages" {
                if let Some(key) = value.get("urlKey").and_then(|k| k.as_str()) {
                    if !page_keys.insert(key.to_string()) {
                        report
                            .errors
                            .push(format!("duplicate urlKey in pages dataset: {key}"));
                    }
                }
            }
        }

        if lines != part.record_count {
            report.errors.push(format!(
                "record count mismatch in {}: manifest {}, counted {lines}",
                part.path, part.record_count
            ));
        }
    }
}

fn verify_coverage(manifest: &Manifest, report: &mut ValidationReport) {
    for entry in &manifest.coverage.matrix {
        if entry.expected && !entry.present {
            report.warnings.push(format!(
                "expected dataset absent: {} ({})",
                entry.part,
                entry
                    .reason_if_absent
                    .as_deref()
                    .unwrap_or("no reason recorded")
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{ArchiveWriter, ArchiveWriterOptions};
    use atlas_core::config::CrawlConfig;
    use atlas_core::{CompletionReason, EventRecord, NavEndReason, PageRecord, RenderMode};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn page(key: &str) -> PageRecord {
        PageRecord {
            page_id: Uuid::new_v4().to_string(),
            url: format!("https://example.com/{key}"),
            final_url: format!("https://example.com/{key}"),
            normalized_url: format!("https://example.com/{key}"),
            url_key: key.into(),
            status_code: 200,
            content_type: Some("text/html".into()),
            render_mode: RenderMode::Raw,
            depth: 0,
            discovered_from: None,
            raw_html_hash: "a".repeat(64),
            dom_hash: None,
            nav_end_reason: NavEndReason::Load,
            redirect_chain: vec![],
            fetch_ms: 5,
            render_ms: 0,
            internal_links_count: 0,
            external_links_count: 0,
            media_assets_count: 0,
            title: None,
            meta_description: None,
            meta_keywords: vec![],
            headings: vec![],
            canonical: None,
            meta_robots: None,
            hreflang: vec![],
            open_graph: BTreeMap::new(),
            twitter_card: BTreeMap::new(),
            technologies: vec![],
            seo: None,
            accessibility: None,
            media: None,
            fetched_at: Utc::now(),
        }
    }

    fn write_archive(dir: &TempDir) -> std::path::PathBuf {
        let mut writer = ArchiveWriter::create(ArchiveWriterOptions {
            out_path: dir.path().join("t.atls"),
            config: CrawlConfig::default(),
            seeds: vec!["https://example.com/".into()],
            primary_origin: "https://example.com".into(),
            command_line: None,
        })
        .unwrap();
        writer.write_page(&page(&"1".repeat(40))).unwrap();
        writer.write_page(&page(&"2".repeat(40))).unwrap();
        writer.write_event(&EventRecord::new("done")).unwrap();
        writer.finalize(CompletionReason::Finished).unwrap()
    }

    #[test]
    fn fresh_archive_validates_clean() {
        let dir = TempDir::new().unwrap();
        let out = write_archive(&dir);
        let report = validate_archive(&out).unwrap();
        assert!(report.is_ok(), "errors: {:?}", report.errors);
    }

    #[test]
    fn missing_file_fails() {
        let report = validate_archive(Path::new("/nonexistent/file.atls"));
        assert!(report.is_err());
    }

    #[test]
    fn tampered_archive_is_caught() {
        let dir = TempDir::new().unwrap();
        let out = write_archive(&dir);

        // Rewrite the archive with one part's bytes corrupted.
        let tampered_path = dir.path().join("tampered.atls");
        {
            let input = File::open(&out).unwrap();
            let mut src = ZipArchive::new(BufReader::new(input)).unwrap();
            let output = File::create(&tampered_path).unwrap();
            let mut dst = zip::ZipWriter::new(output);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for i in 0..src.len() {
                let mut entry = src.by_index(i).unwrap();
                let name = entry.name().to_string();
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).unwrap();
                if name == "summary.json" {
                    bytes.extend_from_slice(b" ");
                }
                dst.start_file(name, options).unwrap();
                std::io::Write::write_all(&mut dst, &bytes).unwrap();
            }
            dst.finish().unwrap();
        }

        let report = validate_archive(&tampered_path).unwrap();
        assert!(!report.is_ok());
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("hash mismatch") && e.contains("summary.json")));
    }
}
