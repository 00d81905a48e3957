// crates/bfsht-plan/src/context.rs

//! Library context: resource root plus the per-Nside resource cache.
//!
//! Replaces process-global state; every planning call takes a `&SynthContext`
//! and plans sharing an Nside share one mapping through `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use bfsht_resource::{resource_path, ResourceError, ResourceFile};

/// Owner of the resource root and the open-file cache.
#[derive(Debug)]
pub struct SynthContext {
    root: PathBuf,
    cache: Mutex<HashMap<usize, Arc<ResourceFile>>>,
}

impl SynthContext {
    /// Context rooted at `root` (files live at `root/rev<V>/<Nside>.dat`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The configured resource root.
    #[must_use]
    pub fn resource_root(&self) -> &Path {
        &self.root
    }

    /// Fetch (and cache) the resource file for `nside`.
    ///
    /// # Errors
    ///
    /// Propagates loader failures; nothing is cached on error.
    pub fn fetch(&self, nside: usize) -> Result<Arc<ResourceFile>, ResourceError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&nside) {
            return Ok(Arc::clone(hit));
        }
        let path = resource_path(&self.root, nside);
        let res = Arc::new(ResourceFile::open(&path)?);
        debug!(nside, path = %path.display(), "cached resource file");
        cache.insert(nside, Arc::clone(&res));
        Ok(res)
    }
}
