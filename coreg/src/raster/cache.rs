//! LRU cache of open raster handles with an open-file ceiling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{Raster, RawFileRaster};
use crate::error::Result;

/// Fraction of the open-file soft limit the cache may use.
const CEILING_FRACTION: f64 = 0.6;
const FALLBACK_FILE_LIMIT: usize = 1024;

/// Opens a raster for a path. Implemented for closures so tests and callers
/// can plug in their own sources.
pub trait RasterOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn Raster>>;
}

impl<F> RasterOpener for F
where
    F: Fn(&Path) -> Result<Arc<dyn Raster>> + Send + Sync,
{
    fn open(&self, path: &Path) -> Result<Arc<dyn Raster>> {
        self(path)
    }
}

/// Opens [`RawFileRaster`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFileOpener;

impl RasterOpener for RawFileOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn Raster>> {
        Ok(Arc::new(RawFileRaster::open(path)?))
    }
}

/// Default ceiling: 60% of the process open-file soft limit.
pub fn default_ceiling() -> usize {
    let limit = open_file_soft_limit().unwrap_or(FALLBACK_FILE_LIMIT);
    ((limit as f64 * CEILING_FRACTION) as usize).max(1)
}

/// Reads the `Max open files` soft limit from `/proc/self/limits`.
fn open_file_soft_limit() -> Option<usize> {
    let limits = std::fs::read_to_string("/proc/self/limits").ok()?;
    parse_open_file_limit(&limits)
}

pub(super) fn parse_open_file_limit(limits: &str) -> Option<usize> {
    let line = limits.lines().find(|l| l.starts_with("Max open files"))?;
    line["Max open files".len()..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

struct Entry {
    raster: Arc<dyn Raster>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathBuf, Entry>,
    clock: u64,
    opens: u64,
    hits: u64,
    evictions: u64,
}

/// Counters for one cache lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub opens: u64,
    pub hits: u64,
    pub evictions: u64,
}

/// Explicit cache of open rasters for one registration run.
///
/// Handles are reference counted, so an evicted raster stays usable by any
/// chip still holding it; the next [`RasterCache::get`] simply reopens it.
pub struct RasterCache {
    ceiling: usize,
    opener: Box<dyn RasterOpener>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for RasterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RasterCache")
            .field("ceiling", &self.ceiling)
            .field("open", &state.entries.len())
            .finish()
    }
}

impl Default for RasterCache {
    fn default() -> Self {
        Self::new(default_ceiling())
    }
}

impl RasterCache {
    /// Cache of raw raster files holding at most `ceiling` open handles.
    pub fn new(ceiling: usize) -> Self {
        Self::with_opener(ceiling, RawFileOpener)
    }

    pub fn with_opener(ceiling: usize, opener: impl RasterOpener + 'static) -> Self {
        assert!(ceiling > 0, "cache ceiling must be positive");
        Self {
            ceiling,
            opener: Box::new(opener),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            opens: state.opens,
            hits: state.hits,
            evictions: state.evictions,
        }
    }

    /// Returns an open handle for `path`, opening it (and evicting the least
    /// recently used handle when at the ceiling) if needed.
    pub fn get(&self, path: &Path) -> Result<Arc<dyn Raster>> {
        let mut state = self.state.lock();
        state.clock += 1;
        let now = state.clock;

        if let Some(entry) = state.entries.get_mut(path) {
            entry.last_used = now;
            let raster = Arc::clone(&entry.raster);
            state.hits += 1;
            return Ok(raster);
        }

        while state.entries.len() >= self.ceiling {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(p, _)| p.clone());
            let Some(oldest) = oldest else { break };
            state.entries.remove(&oldest);
            state.evictions += 1;
            tracing::debug!("Evicted raster {} from cache", oldest.display());
        }

        let raster = self.opener.open(path)?;
        state.opens += 1;
        state.entries.insert(
            path.to_path_buf(),
            Entry {
                raster: Arc::clone(&raster),
                last_used: now,
            },
        );
        Ok(raster)
    }

    /// Drops the handle for `path` if cached.
    pub fn release(&self, path: &Path) -> bool {
        self.state.lock().entries.remove(path).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }
}
