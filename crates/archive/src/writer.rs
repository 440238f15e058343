use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use atlas_core::config::CrawlConfig;
use atlas_core::url::origin_key;
use atlas_core::{
    AccessibilityRecord, AssetRecord, Checkpoint, CompletionReason, ConsoleRecord, CrawlError,
    DomSnapshotRecord, EdgeRecord, ErrorRecord, EventRecord, PageRecord, PartPointer,
    RenderMode, ResponseRecord, Screenshots, StyleRecord,
};

use crate::blob::{BlobFormat, BlobStore, StoredBlob};
use crate::dataset::{DatasetMeta, DatasetWriter};
use crate::manifest::{
    self, BrowserInfo, Compression, Coverage, CoverageEntry, DatasetIntegrity,
    DatasetManifestEntry, Environment, Hashing, Identity, Integrity, Manifest, MediaStorage, Pack,
    PartIndexEntry, PlatformInfo, PrivacyPolicy, Producer, RobotsPolicy, Storage, Viewport,
};
use crate::provenance::{
    ProvenanceInput, ProvenanceOutput, ProvenanceProducer, ProvenanceRecord,
};
use crate::schema::DatasetKind;
use crate::summary::AtlasSummary;

const PRODUCER_NAME: &str = "atlas";
const ZSTD_LEVEL: i32 = 3;

/// Datasets that are joins over pages rather than direct extraction.
fn depends_on(kind: DatasetKind) -> Vec<String> {
    match kind {
        DatasetKind::Responses
        | DatasetKind::Accessibility
        | DatasetKind::DomSnapshots
        | DatasetKind::Console
        | DatasetKind::Styles => vec!["pages".to_string()],
        _ => Vec::new(),
    }
}

pub struct ArchiveWriterOptions {
    pub out_path: PathBuf,
    pub config: CrawlConfig,
    pub seeds: Vec<String>,
    pub primary_origin: String,
    pub command_line: Option<String>,
}

/// Owns the staging directory and the final `.atls` path. The only component
/// that renames into the final path, and the fan-out point for every record
/// the crawl produces.
pub struct ArchiveWriter {
    crawl_id: String,
    staging: PathBuf,
    out_path: PathBuf,
    options: ArchiveWriterOptions,
    datasets: BTreeMap<DatasetKind, DatasetWriter>,
    blobs: BlobStore,
    /// urlKey -> pageId, so ancillary datasets can join by page identity.
    page_ids: HashMap<String, String>,
    /// originKey -> media path, one favicon per origin.
    favicon_paths: HashMap<String, String>,
    summary: AtlasSummary,
    records_since_bulk_flush: u64,
}

impl ArchiveWriter {
    pub fn create(options: ArchiveWriterOptions) -> Result<Self, CrawlError> {
        let crawl_id = Uuid::new_v4().to_string();
        let staging = staging_root(&options.out_path).join(&crawl_id);
        fs::create_dir_all(&staging)?;
        info!(crawl_id = %crawl_id, staging = %staging.display(), "archive staging created");
        Self::build(options, crawl_id, staging, None)
    }

    /// Reattach to an existing staging directory, truncating parts past the
    /// checkpointed offsets.
    pub fn resume(
        options: ArchiveWriterOptions,
        checkpoint: &Checkpoint,
    ) -> Result<Self, CrawlError> {
        let staging = staging_root(&options.out_path).join(&checkpoint.crawl_id);
        if !staging.is_dir() {
            return Err(CrawlError::CorruptCheckpoint(format!(
                "staging directory missing: {}",
                staging.display()
            )));
        }
        info!(crawl_id = %checkpoint.crawl_id, "resuming archive staging");
        Self::build(
            options,
            checkpoint.crawl_id.clone(),
            staging,
            Some(&checkpoint.last_part_pointers),
        )
    }

    fn build(
        options: ArchiveWriterOptions,
        crawl_id: String,
        staging: PathBuf,
        pointers: Option<&BTreeMap<String, PartPointer>>,
    ) -> Result<Self, CrawlError> {
        let blob_format = BlobFormat::from_config(&options.config.archive.blob_format);
        let blobs = match pointers {
            None => BlobStore::create(&staging, blob_format)?,
            Some(_) => BlobStore::resume(&staging, blob_format)?,
        };

        let mut datasets = BTreeMap::new();
        for kind in DatasetKind::ALL {
            let writer = match pointers {
                None => DatasetWriter::create(
                    &staging,
                    kind,
                    options.config.archive.max_part_bytes,
                    options.config.archive.flush_every_records,
                )?,
                Some(map) => DatasetWriter::resume(
                    &staging,
                    kind,
                    options.config.archive.max_part_bytes,
                    options.config.archive.flush_every_records,
                    map.get(kind.name()),
                )?,
            };
            datasets.insert(kind, writer);
        }

        let summary = AtlasSummary::new(&crawl_id, &options.primary_origin, options.seeds.clone());

        let mut writer = Self {
            crawl_id,
            staging,
            out_path: options.out_path.clone(),
            options,
            datasets,
            blobs,
            page_ids: HashMap::new(),
            favicon_paths: HashMap::new(),
            summary,
            records_since_bulk_flush: 0,
        };
        writer.write_capabilities()?;
        writer.write_manifest(true, None)?;
        Ok(writer)
    }

    pub fn crawl_id(&self) -> &str {
        &self.crawl_id
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn page_id_for(&self, url_key: &str) -> Option<&String> {
        self.page_ids.get(url_key)
    }

    pub fn error_count(&self) -> u64 {
        self.datasets
            .get(&DatasetKind::Errors)
            .map(|w| w.record_count())
            .unwrap_or(0)
    }

    pub fn page_count(&self) -> u64 {
        self.datasets
            .get(&DatasetKind::Pages)
            .map(|w| w.record_count())
            .unwrap_or(0)
    }

    fn writer_mut(&mut self, kind: DatasetKind) -> &mut DatasetWriter {
        self.datasets
            .get_mut(&kind)
            .expect("all dataset writers are created at construction")
    }

    pub fn write_page(&mut self, page: &PageRecord) -> Result<(), CrawlError> {
        self.writer_mut(DatasetKind::Pages).write(page)?;
        self.page_ids
            .insert(page.url_key.clone(), page.page_id.clone());
        self.summary.record_page(page);
        self.tick(1)
    }

    pub fn write_edges(&mut self, edges: &[EdgeRecord]) -> Result<(), CrawlError> {
        let writer = self.writer_mut(DatasetKind::Edges);
        for edge in edges {
            writer.write(edge)?;
        }
        self.tick(edges.len() as u64)
    }

    pub fn write_assets(&mut self, assets: &[AssetRecord]) -> Result<(), CrawlError> {
        let writer = self.writer_mut(DatasetKind::Assets);
        for asset in assets {
            writer.write(asset)?;
        }
        self.tick(assets.len() as u64)
    }

    pub fn write_response(&mut self, response: &ResponseRecord) -> Result<(), CrawlError> {
        self.writer_mut(DatasetKind::Responses).write(response)?;
        self.tick(1)
    }

    pub fn write_error(&mut self, error: &ErrorRecord) -> Result<(), CrawlError> {
        self.writer_mut(DatasetKind::Errors).write(error)?;
        self.tick(1)
    }

    pub fn write_event(&mut self, event: &EventRecord) -> Result<(), CrawlError> {
        self.writer_mut(DatasetKind::Events).write(event)?;
        self.tick(1)
    }

    pub fn write_accessibility(&mut self, record: &AccessibilityRecord) -> Result<(), CrawlError> {
        self.writer_mut(DatasetKind::Accessibility).write(record)?;
        self.tick(1)
    }

    pub fn write_dom_snapshot(&mut self, record: &DomSnapshotRecord) -> Result<(), CrawlError> {
        self.writer_mut(DatasetKind::DomSnapshots).write(record)?;
        self.tick(1)
    }

    pub fn write_console(&mut self, records: &[ConsoleRecord]) -> Result<(), CrawlError> {
        let writer = self.writer_mut(DatasetKind::Console);
        for record in records {
            writer.write(record)?;
        }
        self.tick(records.len() as u64)
    }

    pub fn write_styles(&mut self, records: &[StyleRecord]) -> Result<(), CrawlError> {
        let writer = self.writer_mut(DatasetKind::Styles);
        for record in records {
            writer.write(record)?;
        }
        self.tick(records.len() as u64)
    }

    pub fn store_blob(&mut self, bytes: &[u8]) -> Result<StoredBlob, CrawlError> {
        self.blobs.store(bytes)
    }

    /// Screenshot files live outside the record streams, keyed by urlKey.
    pub fn store_screenshots(
        &mut self,
        url_key: &str,
        shots: &Screenshots,
    ) -> Result<(String, String), CrawlError> {
        let desktop_rel = format!("media/screenshots/desktop/{url_key}.jpg");
        let mobile_rel = format!("media/screenshots/mobile/{url_key}.jpg");
        for (rel, bytes) in [(&desktop_rel, &shots.desktop), (&mobile_rel, &shots.mobile)] {
            let path = self.staging.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes)?;
        }
        Ok((desktop_rel, mobile_rel))
    }

    /// At most one favicon file per origin; repeat calls return the first path.
    pub fn store_favicon(
        &mut self,
        origin: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, CrawlError> {
        let key = origin_key(origin);
        if let Some(existing) = self.favicon_paths.get(&key) {
            return Ok(existing.clone());
        }
        let ext = match mime_type {
            "image/png" => "png",
            "image/svg+xml" => "svg",
            "image/gif" => "gif",
            "image/jpeg" => "jpg",
            _ => "ico",
        };
        let rel = format!("media/favicons/{key}.{ext}");
        let path = self.staging.join(&rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        self.favicon_paths.insert(key, rel.clone());
        Ok(rel)
    }

    pub fn favicon_for_origin(&self, origin: &str) -> Option<String> {
        self.favicon_paths.get(&origin_key(origin)).cloned()
    }

    /// Bulk-flush cadence across all streams.
    fn tick(&mut self, records: u64) -> Result<(), CrawlError> {
        self.records_since_bulk_flush += records;
        if self.records_since_bulk_flush >= self.options.config.archive.flush_every_records {
            self.flush_all()?;
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<(), CrawlError> {
        for writer in self.datasets.values_mut() {
            writer.flush_and_sync()?;
        }
        self.blobs.sync_index()?;
        self.records_since_bulk_flush = 0;
        debug!("bulk flush complete");
        Ok(())
    }

    /// Flush everything and report where each dataset's next byte lands.
    pub fn part_pointers(&mut self) -> Result<BTreeMap<String, PartPointer>, CrawlError> {
        self.blobs.sync_index()?;
        let mut pointers = BTreeMap::new();
        for (kind, writer) in self.datasets.iter_mut() {
            if let Some(pointer) = writer.part_pointer()? {
                pointers.insert(kind.name().to_string(), pointer);
            }
        }
        Ok(pointers)
    }

    /// Refresh the provisional manifest; consumers must treat the archive as
    /// provisional until `incomplete` is false.
    pub fn update_provisional_manifest(&mut self) -> Result<(), CrawlError> {
        self.write_manifest(true, None)
    }

    /// The finalization protocol. On failure the staging directory is left
    /// intact for inspection and resume.
    pub fn finalize(mut self, reason: CompletionReason) -> Result<PathBuf, CrawlError> {
        info!(reason = reason.as_str(), "finalizing archive");

        // 1+2. Close every stream and compress its parts.
        let mut metas: Vec<DatasetMeta> = Vec::new();
        let mut datasets = std::mem::take(&mut self.datasets);
        for kind in DatasetKind::ALL {
            if let Some(writer) = datasets.remove(&kind) {
                metas.push(writer.finalize()?);
            }
        }

        // 3. Provenance, one record per dataset, itself compressed.
        self.write_provenance(&metas)?;

        // 4. Ship the schemas.
        let schemas_dir = self.staging.join("schemas");
        fs::create_dir_all(&schemas_dir)?;
        for kind in DatasetKind::ALL {
            fs::write(
                schemas_dir.join(format!("{}.schema.json", kind.name())),
                kind.schema_json(),
            )?;
        }

        // 5. Summary.
        self.summary.complete(reason);
        self.summary.stats.total_pages = meta_count(&metas, DatasetKind::Pages);
        self.summary.stats.total_edges = meta_count(&metas, DatasetKind::Edges);
        self.summary.stats.total_assets = meta_count(&metas, DatasetKind::Assets);
        self.summary.stats.total_errors = meta_count(&metas, DatasetKind::Errors);
        self.summary.stats.total_events = meta_count(&metas, DatasetKind::Events);
        self.summary.stats.total_blobs = self.blobs.blob_count();
        self.summary.stats.bytes_stored = self.blobs.bytes_stored();
        let summary_json = serde_json::to_string_pretty(&self.summary)
            .map_err(|e| CrawlError::Config(format!("summary serialize: {e}")))?;
        fs::write(self.staging.join("summary.json"), summary_json)?;

        // 6. Full manifest, still provisional.
        self.write_manifest(true, Some(&metas))?;

        // 7. Flip incomplete=false with an atomic rewrite.
        self.write_manifest(false, Some(&metas))?;

        // 8. Pack the staging directory into the final ZIP.
        let tmp_path = self.out_path.with_extension("atls.tmp");
        self.pack_zip(&tmp_path)?;
        fs::rename(&tmp_path, &self.out_path)?;
        info!(path = %self.out_path.display(), "archive written");

        // Staging (and the checkpoints inside it) has served its purpose.
        if let Err(e) = fs::remove_dir_all(staging_root(&self.out_path)) {
            warn!("could not remove staging directory: {e}");
        }

        Ok(self.out_path.clone())
    }

    fn write_capabilities(&self) -> Result<(), CrawlError> {
        let mode = self.options.config.render.mode;
        let a11y = self.options.config.accessibility.enabled;
        let mut capabilities = vec!["seo.core".to_string(), "seo.enhanced".to_string()];
        if mode != RenderMode::Raw {
            capabilities.push("render.dom".to_string());
        }
        if a11y {
            capabilities.push("a11y.light".to_string());
            if mode == RenderMode::Full {
                capabilities.push("a11y.full".to_string());
            }
        }
        if mode == RenderMode::Full {
            capabilities.push("perf.timings".to_string());
            capabilities.push("visual.screenshots".to_string());
        }

        let doc = json!({
            "version": "1.0",
            "renderMode": mode.as_str(),
            "replayTier": "response-bodies",
            "accessibilityEnabled": a11y,
            "seoEnhanced": true,
            "capabilities": capabilities,
        });
        let body = serde_json::to_string_pretty(&doc)
            .map_err(|e| CrawlError::Config(format!("capabilities serialize: {e}")))?;
        fs::write(self.staging.join("capabilities.v1.json"), body)?;
        Ok(())
    }

    fn write_provenance(&self, metas: &[DatasetMeta]) -> Result<(), CrawlError> {
        let pages_hash = metas
            .iter()
            .find(|m| m.name == "pages")
            .map(|m| m.dataset_hash.clone())
            .unwrap_or_default();

        let plain_path = self.staging.join("provenance.v1.jsonl");
        {
            let mut out = BufWriter::new(File::create(&plain_path)?);
            for meta in metas {
                let inputs = if depends_on(kind_by_name(meta.name)).is_empty() {
                    Vec::new()
                } else {
                    vec![ProvenanceInput {
                        dataset: "pages".to_string(),
                        hash_sha256: pages_hash.clone(),
                    }]
                };
                let record = ProvenanceRecord {
                    dataset_name: meta.name.to_string(),
                    producer: ProvenanceProducer {
                        app: PRODUCER_NAME.to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                        module: format!("dataset::{}", meta.name),
                    },
                    created_at: Utc::now(),
                    inputs,
                    parameters: json!({
                        "renderMode": self.options.config.render.mode.as_str(),
                        "maxPartBytes": self.options.config.archive.max_part_bytes,
                        "compression": { "algorithm": "zstd", "level": ZSTD_LEVEL },
                    }),
                    output: ProvenanceOutput {
                        record_count: meta.record_count,
                        hash_sha256: meta.dataset_hash.clone(),
                    },
                };
                let line = serde_json::to_string(&record)
                    .map_err(|e| CrawlError::Config(format!("provenance serialize: {e}")))?;
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }

        let compressed_path = self.staging.join("provenance.v1.jsonl.zst");
        {
            let input = File::open(&plain_path)?;
            let output = File::create(&compressed_path)?;
            let mut encoder = zstd::stream::Encoder::new(BufWriter::new(output), ZSTD_LEVEL)?;
            std::io::copy(&mut BufReader::new(input), &mut encoder)?;
            encoder.finish()?.flush()?;
        }
        fs::remove_file(&plain_path)?;
        Ok(())
    }

    fn write_manifest(
        &mut self,
        incomplete: bool,
        metas: Option<&[DatasetMeta]>,
    ) -> Result<(), CrawlError> {
        let manifest = self.build_manifest(incomplete, metas)?;
        let body = serde_json::to_string_pretty(&manifest)
            .map_err(|e| CrawlError::Config(format!("manifest serialize: {e}")))?;
        let tmp = self.staging.join("manifest.json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.staging.join("manifest.json"))?;
        Ok(())
    }

    fn build_manifest(
        &self,
        incomplete: bool,
        metas: Option<&[DatasetMeta]>,
    ) -> Result<Manifest, CrawlError> {
        let config = &self.options.config;
        let mode = config.render.mode;
        let a11y = config.accessibility.enabled;

        let mut datasets = BTreeMap::new();
        let mut parts_index = Vec::new();
        let mut coverage = Vec::new();

        for kind in DatasetKind::ALL {
            let expected = match kind.required_mode() {
                None => true,
                Some(modes) => {
                    let mode_ok = modes.contains(&mode.as_str());
                    if kind == DatasetKind::Accessibility {
                        mode_ok && a11y
                    } else {
                        mode_ok
                    }
                }
            };

            match metas.and_then(|m| m.iter().find(|meta| meta.name == kind.name())) {
                Some(meta) => {
                    let present = !meta.parts.is_empty();
                    let checksums: BTreeMap<String, String> = meta
                        .parts
                        .iter()
                        .map(|p| (p.rel_path.clone(), p.sha256.clone()))
                        .collect();
                    datasets.insert(
                        kind.name().to_string(),
                        DatasetManifestEntry {
                            present,
                            part_count: meta.parts.len() as u64,
                            record_count: meta.record_count,
                            bytes: meta.bytes_compressed,
                            schema: meta.schema_uri.clone(),
                            schema_version: meta.version.to_string(),
                            schema_hash: meta.schema_hash.clone(),
                            integrity: DatasetIntegrity {
                                algorithm: "sha256".into(),
                                checksums,
                            },
                        },
                    );
                    for part in &meta.parts {
                        parts_index.push(PartIndexEntry {
                            name: kind.name().to_string(),
                            path: part.rel_path.clone(),
                            schema_ref: meta.schema_uri.clone(),
                            content_type: "application/x-ndjson".into(),
                            content_encoding: "zstd".into(),
                            record_count: part.record_count,
                            bytes_uncompressed: part.bytes_uncompressed,
                            bytes_compressed: part.bytes_compressed,
                            sha256: part.sha256.clone(),
                            depends_on: depends_on(kind),
                        });
                    }
                    coverage.push(CoverageEntry {
                        part: kind.name().to_string(),
                        expected,
                        present,
                        row_count: meta.record_count,
                        reason_if_absent: if present {
                            None
                        } else if !expected {
                            Some(absence_reason(kind, mode, a11y))
                        } else {
                            Some("no records".into())
                        },
                    });
                }
                None => {
                    let record_count = self
                        .datasets
                        .get(&kind)
                        .map(|w| w.record_count())
                        .unwrap_or(0);
                    datasets.insert(
                        kind.name().to_string(),
                        DatasetManifestEntry {
                            present: record_count > 0,
                            part_count: 0,
                            record_count,
                            bytes: 0,
                            schema: kind.schema_uri(),
                            schema_version: crate::dataset::DATASET_VERSION.to_string(),
                            schema_hash: crate::sha256_hex(kind.schema_json().as_bytes()),
                            integrity: DatasetIntegrity {
                                algorithm: "sha256".into(),
                                checksums: BTreeMap::new(),
                            },
                        },
                    );
                    coverage.push(CoverageEntry {
                        part: kind.name().to_string(),
                        expected,
                        present: record_count > 0,
                        row_count: record_count,
                        reason_if_absent: None,
                    });
                }
            }
        }

        let integrity = if metas.is_some() {
            Integrity::from_files(self.collect_file_hashes()?)
        } else {
            Integrity {
                files: BTreeMap::new(),
                archive_sha256: String::new(),
            }
        };

        Ok(Manifest {
            atlas_version: manifest::ATLAS_VERSION.into(),
            format_version: manifest::FORMAT_VERSION.into(),
            spec_version: manifest::SPEC_VERSION.into(),
            schema_version: Utc::now().format("%Y-%m-%d").to_string(),
            owner: PRODUCER_NAME.into(),
            consumers: vec!["atlas-readers".into()],
            identity: Identity {
                primary_origin: self.options.primary_origin.clone(),
                seed_urls: self.options.seeds.clone(),
            },
            crawl_started_at: self.summary.started_at,
            crawl_completed_at: self.summary.completed_at,
            producer: Producer {
                name: PRODUCER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                build: option_env!("ATLAS_BUILD_TIMESTAMP").unwrap_or("dev").into(),
                git_hash: option_env!("ATLAS_GIT_HASH").map(str::to_string),
                command_line: self.options.command_line.clone(),
            },
            environment: Environment {
                device: "desktop".into(),
                viewport: Viewport {
                    width: config.render.desktop_viewport.0,
                    height: config.render.desktop_viewport.1,
                },
                user_agent: config.crawl.user_agent.clone(),
                locale: std::env::var("LANG").unwrap_or_else(|_| "en-US".into()),
                timezone: std::env::var("TZ").unwrap_or_else(|_| "UTC".into()),
                browser: BrowserInfo {
                    name: "chromium".into(),
                    version: "unknown".into(),
                    headless: true,
                },
                platform: PlatformInfo {
                    os: std::env::consts::OS.into(),
                    arch: std::env::consts::ARCH.into(),
                },
            },
            privacy_policy: PrivacyPolicy {
                strip_cookies: config.privacy.strip_cookies,
                strip_auth_headers: config.privacy.strip_auth_headers,
                redact_inputs: config.privacy.redact_inputs,
                redact_forms: config.privacy.redact_forms,
            },
            robots_policy: RobotsPolicy {
                respect: config.robots.respect,
                overrides_used: config.robots.override_used,
                override_reason: config.robots.override_reason.clone(),
            },
            crawl_config_hash: config.config_hash(),
            hashing: Hashing::default(),
            datasets,
            parts_index,
            coverage: Coverage { matrix: coverage },
            storage: Storage {
                compression: Compression {
                    algorithm: "zstd".into(),
                    level: ZSTD_LEVEL,
                },
                blob_format: self.blobs.format().as_str().into(),
                replay_tier: "response-bodies".into(),
                content_addressing: "sha256".into(),
                media: if mode == RenderMode::Full {
                    Some(MediaStorage {
                        screenshots: true,
                        favicons: true,
                    })
                } else {
                    None
                },
            },
            packs: self.build_packs(mode, a11y),
            integrity,
            incomplete,
        })
    }

    fn build_packs(&self, mode: RenderMode, a11y: bool) -> Vec<Pack> {
        let state = |embedded: bool| {
            if embedded {
                "embedded".to_string()
            } else {
                "missing".to_string()
            }
        };
        vec![
            Pack {
                name: "Core".into(),
                version: "1.0".into(),
                state: state(true),
                uri: None,
                sha256: None,
                notes: None,
            },
            Pack {
                name: "A11y-Light".into(),
                version: "1.0".into(),
                state: state(a11y && mode != RenderMode::Raw),
                uri: None,
                sha256: None,
                notes: None,
            },
            Pack {
                name: "A11y-Full".into(),
                version: "1.0".into(),
                state: state(a11y && mode == RenderMode::Full),
                uri: None,
                sha256: None,
                notes: None,
            },
            Pack {
                name: "Perf".into(),
                version: "1.0".into(),
                state: state(mode == RenderMode::Full),
                uri: None,
                sha256: None,
                notes: None,
            },
            Pack {
                name: "Visual".into(),
                version: "1.0".into(),
                state: state(mode == RenderMode::Full),
                uri: None,
                sha256: None,
                notes: None,
            },
        ]
    }

    /// Hash every file under staging except the manifest itself and the
    /// checkpoint directory, which never ships.
    fn collect_file_hashes(&self) -> Result<BTreeMap<String, String>, CrawlError> {
        let mut files = BTreeMap::new();
        let mut stack = vec![self.staging.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let rel = path
                    .strip_prefix(&self.staging)
                    .map_err(|e| CrawlError::Config(format!("path prefix: {e}")))?
                    .to_string_lossy()
                    .replace('\\', "/");
                if rel == "manifest.json" || rel == "manifest.json.tmp" || rel.starts_with("checkpoints") {
                    continue;
                }
                if entry.file_type()?.is_dir() {
                    stack.push(path);
                } else {
                    files.insert(rel, crate::sha256_file(&path)?);
                }
            }
        }
        Ok(files)
    }

    /// Stored method only: every part is already zstd-compressed.
    fn pack_zip(&self, tmp_path: &Path) -> Result<(), CrawlError> {
        let file = File::create(tmp_path)?;
        let mut zip = zip::ZipWriter::new(BufWriter::new(file));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .large_file(true);

        let mut paths: Vec<PathBuf> = Vec::new();
        let mut stack = vec![self.staging.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    stack.push(entry.path());
                } else {
                    paths.push(entry.path());
                }
            }
        }
        paths.sort();

        for path in paths {
            let rel = path
                .strip_prefix(&self.staging)
                .map_err(|e| CrawlError::Config(format!("path prefix: {e}")))?
                .to_string_lossy()
                .replace('\\', "/");
            if rel.starts_with("checkpoints") || rel == "manifest.json.tmp" {
                continue;
            }
            zip.start_file(rel, options)
                .map_err(|e| CrawlError::Config(format!("zip entry: {e}")))?;
            let mut input = BufReader::new(File::open(&path)?);
            std::io::copy(&mut input, &mut zip)?;
        }
        zip.finish()
            .map_err(|e| CrawlError::Config(format!("zip finish: {e}")))?
            .flush()?;
        Ok(())
    }
}

fn staging_root(out_path: &Path) -> PathBuf {
    let mut name = out_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out.atls".to_string());
    name.push_str(".staging");
    out_path.with_file_name(name)
}

fn kind_by_name(name: &str) -> DatasetKind {
    DatasetKind::ALL
        .into_iter()
        .find(|k| k.name() == name)
        .unwrap_or(DatasetKind::Pages)
}

fn meta_count(metas: &[DatasetMeta], kind: DatasetKind) -> u64 {
    metas
        .iter()
        .find(|m| m.name == kind.name())
        .map(|m| m.record_count)
        .unwrap_or(0)
}

fn absence_reason(kind: DatasetKind, mode: RenderMode, a11y: bool) -> String {
    if kind == DatasetKind::Accessibility && !a11y {
        "accessibility disabled".to_string()
    } else {
        format!("not collected in {} mode", mode.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::NavEndReason;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> ArchiveWriterOptions {
        ArchiveWriterOptions {
            out_path: dir.path().join("site.atls"),
            config: CrawlConfig::default(),
            seeds: vec!["https://example.com/".into()],
            primary_origin: "https://example.com".into(),
            command_line: Some("atlas crawl --seeds https://example.com/".into()),
        }
    }

    fn page(url: &str, key: &str) -> PageRecord {
        PageRecord {
            page_id: Uuid::new_v4().to_string(),
            url: url.into(),
            final_url: url.into(),
            normalized_url: url.into(),
            url_key: key.into(),
            status_code: 200,
            content_type: Some("text/html".into()),
            render_mode: RenderMode::Prerender,
            depth: 0,
            discovered_from: None,
            raw_html_hash: "a".repeat(64),
            dom_hash: Some("b".repeat(64)),
            nav_end_reason: NavEndReason::Networkidle,
            redirect_chain: vec![],
            fetch_ms: 12,
            render_ms: 34,
            internal_links_count: 1,
            external_links_count: 0,
            media_assets_count: 0,
            title: Some("t".into()),
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

    #[test]
    fn staging_has_provisional_manifest() {
        let dir = TempDir::new().unwrap();
        let writer = ArchiveWriter::create(options(&dir)).unwrap();
        let manifest_path = writer.staging_dir().join("manifest.json");
        let manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(manifest_path).unwrap()).unwrap();
        assert!(manifest.incomplete);
        assert_eq!(manifest.identity.primary_origin, "https://example.com");
        assert!(writer.staging_dir().join("capabilities.v1.json").exists());
    }

    #[test]
    fn page_id_join_map() {
        let dir = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::create(options(&dir)).unwrap();
        let key = "c".repeat(40);
        let record = page("https://example.com/", &key);
        writer.write_page(&record).unwrap();
        assert_eq!(writer.page_id_for(&key), Some(&record.page_id));
        assert_eq!(writer.page_count(), 1);
    }

    #[test]
    fn finalize_produces_complete_archive() {
        let dir = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::create(options(&dir)).unwrap();
        writer.write_page(&page("https://example.com/", &"d".repeat(40))).unwrap();
        writer
            .write_event(&EventRecord::new("crawl_started"))
            .unwrap();
        let blob = writer.store_blob(b"<html>body</html>").unwrap();
        assert!(blob.blob_ref.starts_with("sha256:"));

        let out = writer.finalize(CompletionReason::Finished).unwrap();
        assert!(out.exists());
        assert_eq!(out.extension().map(|e| e.to_string_lossy().to_string()).as_deref(), Some("atls"));

        // Staging is gone after a successful pack.
        assert!(!dir.path().join("site.atls.staging").exists());

        // The packed manifest is final and indexes the written parts.
        let file = File::open(&out).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let manifest: Manifest = {
            let entry = archive.by_name("manifest.json").unwrap();
            serde_json::from_reader(entry).unwrap()
        };
        assert!(!manifest.incomplete);
        assert_eq!(manifest.datasets["pages"].record_count, 1);
        assert!(manifest.datasets["pages"].present);
        assert!(!manifest.integrity.files.is_empty());
        assert!(!manifest.integrity.archive_sha256.is_empty());

        // Schemas and summary ship inside the archive.
        assert!(archive.by_name("schemas/pages.schema.json").is_ok());
        assert!(archive.by_name("summary.json").is_ok());
        assert!(archive.by_name("provenance.v1.jsonl.zst").is_ok());
    }

    #[test]
    fn favicon_dedup_per_origin() {
        let dir = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::create(options(&dir)).unwrap();
        let a = writer
            .store_favicon("https://example.com", b"icon-bytes", "image/png")
            .unwrap();
        let b = writer
            .store_favicon("https://example.com", b"other-bytes", "image/png")
            .unwrap();
        assert_eq!(a, b);
        let c = writer
            .store_favicon("https://other.example", b"icon-bytes", "image/x-icon")
            .unwrap();
        assert_ne!(a, c);
        assert!(c.ends_with(".ico"));
    }
}
