use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use board_logging::{board_debug, board_error, board_info, board_warn};
use jobboard_core::{Job, JobMap};
use serde::{Deserialize, Serialize};

use crate::persist::StateDir;

pub const CACHE_FILENAME: &str = "jobs_cache.ron";
const CACHE_VERSION: u32 = 1;

/// Durable store of last-known jobs, read once at startup.
///
/// Both operations are infallible from the caller's view: the cache only
/// shortens the time to first render, so failures are logged and swallowed.
pub trait JobCache: Send + Sync {
    /// Last saved jobs, or an empty map if nothing usable was saved.
    fn load(&self) -> JobMap;

    /// Replaces the saved jobs with `jobs` as one unit.
    fn save(&self, jobs: &JobMap);
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    jobs: Vec<Job>,
}

/// RON file in the state directory, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileJobCache {
    state: StateDir,
}

impl FileJobCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            state: StateDir::new(dir),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.state.file(CACHE_FILENAME)
    }
}

impl JobCache for FileJobCache {
    fn load(&self) -> JobMap {
        let doc = match self.state.read_ron::<CacheDocument>(CACHE_FILENAME) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                board_debug!("No job cache at {:?}", self.path());
                return JobMap::new();
            }
            Err(err) => {
                board_warn!("Ignoring unreadable job cache: {}", err);
                return JobMap::new();
            }
        };
        if doc.version != CACHE_VERSION {
            board_warn!(
                "Ignoring job cache with version {} (expected {})",
                doc.version,
                CACHE_VERSION
            );
            return JobMap::new();
        }

        let jobs: JobMap = doc
            .jobs
            .into_iter()
            .map(|job| (job.id.clone(), job))
            .collect();
        board_info!("Loaded {} cached jobs from {:?}", jobs.len(), self.path());
        jobs
    }

    fn save(&self, jobs: &JobMap) {
        let doc = CacheDocument {
            version: CACHE_VERSION,
            jobs: jobs.values().cloned().collect(),
        };
        match self.state.write_ron(CACHE_FILENAME, &doc) {
            Ok(path) => board_debug!("Saved {} jobs to {:?}", jobs.len(), path),
            Err(err) => board_error!("Failed to save job cache: {}", err),
        }
    }
}

/// Process-local cache for runs that should leave nothing on disk.
#[derive(Debug, Default)]
pub struct MemoryJobCache {
    jobs: Mutex<JobMap>,
    saves: AtomicUsize,
}

impl MemoryJobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(jobs: JobMap) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl JobCache for MemoryJobCache {
    fn load(&self) -> JobMap {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, jobs: &JobMap) {
        *self.jobs.lock().unwrap_or_else(PoisonError::into_inner) = jobs.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
    }
}
