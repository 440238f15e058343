use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use atlas_core::{Checkpoint, CrawlError};
use atlas_frontier::FrontierSnapshot;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const VISITED_FILE: &str = "visited.idx";
const FRONTIER_FILE: &str = "frontier.json";

/// A fully-loaded checkpoint triplet.
#[derive(Debug)]
pub struct LoadedCheckpoint {
    pub checkpoint: Checkpoint,
    pub visited: Vec<String>,
    pub frontier: FrontierSnapshot,
}

/// Owns the `checkpoints/` directory inside the staging area. Every write is
/// temp-then-rename, so readers only ever see whole files.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(staging: &Path) -> Result<Self, CrawlError> {
        let dir = staging.join("checkpoints");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(
        &self,
        checkpoint: &Checkpoint,
        visited: &[String],
        frontier: &FrontierSnapshot,
    ) -> Result<(), CrawlError> {
        let checkpoint_json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CrawlError::Config(format!("checkpoint serialize: {e}")))?;
        let frontier_json = serde_json::to_string(frontier)
            .map_err(|e| CrawlError::Config(format!("frontier serialize: {e}")))?;
        let mut visited_lines = visited.join("\n");
        if !visited_lines.is_empty() {
            visited_lines.push('\n');
        }

        self.write_atomic(CHECKPOINT_FILE, checkpoint_json.as_bytes())?;
        self.write_atomic(VISITED_FILE, visited_lines.as_bytes())?;
        self.write_atomic(FRONTIER_FILE, frontier_json.as_bytes())?;

        info!(
            visited = checkpoint.visited_count,
            queue = checkpoint.queue_depth,
            "checkpoint written"
        );
        Ok(())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), CrawlError> {
        let tmp = self.dir.join(format!("{name}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(name))?;
        Ok(())
    }

    /// A missing or unparseable checkpoint.json means "no checkpoint". A
    /// readable checkpoint.json with missing companions is a torn triplet
    /// and surfaces as CorruptCheckpoint.
    pub fn load(&self) -> Result<Option<LoadedCheckpoint>, CrawlError> {
        let checkpoint_path = self.dir.join(CHECKPOINT_FILE);
        if !checkpoint_path.exists() {
            return Ok(None);
        }
        let checkpoint: Checkpoint = match fs::read_to_string(&checkpoint_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
        {
            Some(cp) => cp,
            None => {
                warn!("checkpoint.json unreadable, treating as absent");
                return Ok(None);
            }
        };

        let visited_path = self.dir.join(VISITED_FILE);
        let frontier_path = self.dir.join(FRONTIER_FILE);
        if !visited_path.exists() || !frontier_path.exists() {
            return Err(CrawlError::CorruptCheckpoint(
                "checkpoint.json present but visited.idx or frontier.json missing".into(),
            ));
        }

        let visited: Vec<String> = fs::read_to_string(&visited_path)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let frontier: FrontierSnapshot = serde_json::from_str(&fs::read_to_string(&frontier_path)?)
            .map_err(|e| CrawlError::CorruptCheckpoint(format!("frontier.json: {e}")))?;

        Ok(Some(LoadedCheckpoint {
            checkpoint,
            visited,
            frontier,
        }))
    }
}

/// Resolve a `--resume` argument to the checkpoint directory's staging dir.
/// Accepts the crawl's staging dir itself or the `<out>.atls.staging` root
/// that holds exactly one crawl.
pub fn find_staging_dir(resume_path: &Path) -> Option<PathBuf> {
    if resume_path.join("checkpoints").join(CHECKPOINT_FILE).exists() {
        return Some(resume_path.to_path_buf());
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(resume_path)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.join("checkpoints").join(CHECKPOINT_FILE).exists())
        .collect();
    candidates.sort();
    candidates.pop()
}

/// Resident set size in MB, recorded in checkpoints for operators.
pub fn current_rss_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                return Some(kb / 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::{FrontierEntry, PartPointer};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn checkpoint(crawl_id: &str) -> Checkpoint {
        let mut pointers = BTreeMap::new();
        pointers.insert(
            "pages".to_string(),
            PartPointer {
                filename: "part-001.jsonl".into(),
                byte_offset: 1234,
            },
        );
        Checkpoint {
            crawl_id: crawl_id.into(),
            visited_count: 4,
            enqueued_count: 9,
            queue_depth: 5,
            visited_index_file: VISITED_FILE.into(),
            frontier_snapshot: FRONTIER_FILE.into(),
            last_part_pointers: pointers,
            rss_mb: current_rss_mb(),
            timestamp: Utc::now(),
        }
    }

    fn snapshot() -> FrontierSnapshot {
        FrontierSnapshot {
            entries: vec![FrontierEntry {
                url: "https://h/next".into(),
                url_key: "k1".into(),
                depth: 1,
                discovered_from: Some("https://h/".into()),
                enqueued_at: Utc::now(),
            }],
            enqueued: vec!["k0".into(), "k1".into()],
        }
    }

    #[test]
    fn write_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store
            .write(&checkpoint("c-1"), &["k0".into()], &snapshot())
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.checkpoint.crawl_id, "c-1");
        assert_eq!(loaded.checkpoint.visited_count, 4);
        assert_eq!(loaded.visited, vec!["k0".to_string()]);
        assert_eq!(loaded.frontier.entries.len(), 1);
        assert_eq!(loaded.frontier.entries[0].url, "https://h/next");
        assert_eq!(
            loaded.checkpoint.last_part_pointers["pages"].byte_offset,
            1234
        );
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn torn_triplet_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.write(&checkpoint("c-1"), &[], &snapshot()).unwrap();
        fs::remove_file(store.dir().join(FRONTIER_FILE)).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, CrawlError::CorruptCheckpoint(_)));
    }

    #[test]
    fn unreadable_checkpoint_json_is_absent_not_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        fs::write(store.dir().join(CHECKPOINT_FILE), b"{ not json").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn no_tmp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.write(&checkpoint("c-1"), &[], &snapshot()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn find_staging_dir_from_root_or_child() {
        let dir = TempDir::new().unwrap();
        let crawl_dir = dir.path().join("crawl-abc");
        let store = CheckpointStore::new(&crawl_dir).unwrap();
        store.write(&checkpoint("c-1"), &[], &snapshot()).unwrap();

        assert_eq!(find_staging_dir(&crawl_dir).unwrap(), crawl_dir);
        assert_eq!(find_staging_dir(dir.path()).unwrap(), crawl_dir);
        assert!(find_staging_dir(&dir.path().join("nope")).is_none());
    }
}
