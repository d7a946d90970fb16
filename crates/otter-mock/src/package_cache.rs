//! Nearest `package.json` lookup with path compression.
//!
//! A lookup walks upward from a directory until it finds a memoized
//! directory or a manifest on disk. Every directory visited on the way is
//! then mapped to the same shared entry, so a later query for any of them is
//! a single map hit. Entries are never evicted; the map is bounded by the
//! number of directories actually queried.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{MockError, MockResult};

/// Manifest file name
pub const MANIFEST_FILE: &str = "package.json";

static GLOBAL: Lazy<PackageMetadataCache> = Lazy::new(PackageMetadataCache::new);

/// Module format declared by a manifest's `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Module,
    CommonJs,
}

/// The subset of `package.json` the mocking layer cares about
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "type")]
    pub module_type: Option<String>,
    /// Directory containing the manifest; `None` for the empty root entry
    #[serde(skip)]
    pub dir: Option<PathBuf>,
}

impl PackageManifest {
    /// The declared package type, if it is one of the two known values.
    pub fn package_type(&self) -> Option<PackageType> {
        match self.module_type.as_deref() {
            Some("module") => Some(PackageType::Module),
            Some("commonjs") => Some(PackageType::CommonJs),
            _ => None,
        }
    }

    /// Whether this entry stands for "no manifest up to the filesystem root".
    pub fn is_empty(&self) -> bool {
        self.dir.is_none()
    }
}

/// Memoized upward manifest search
#[derive(Debug, Default)]
pub struct PackageMetadataCache {
    entries: RwLock<HashMap<PathBuf, Arc<PackageManifest>>>,
    manifest_reads: AtomicUsize,
}

impl PackageMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache instance
    pub fn global() -> &'static PackageMetadataCache {
        &GLOBAL
    }

    /// Find the manifest governing `dir`.
    ///
    /// Returns an empty manifest when the filesystem root is reached without
    /// finding one.
    pub fn find_nearest_manifest(&self, dir: &Path) -> MockResult<Arc<PackageManifest>> {
        let mut visited: Vec<PathBuf> = Vec::new();
        let mut current = Some(dir);

        while let Some(candidate) = current {
            let hit = self.entries.read().get(candidate).cloned();
            if let Some(hit) = hit {
                self.backfill(&visited, &hit);
                return Ok(hit);
            }

            visited.push(candidate.to_path_buf());

            let manifest_path = candidate.join(MANIFEST_FILE);
            if manifest_path.is_file() {
                let manifest = Arc::new(self.read_manifest(&manifest_path, candidate)?);
                self.backfill(&visited, &manifest);
                return Ok(manifest);
            }

            current = candidate.parent();
        }

        let empty = Arc::new(PackageManifest::default());
        self.backfill(&visited, &empty);
        Ok(empty)
    }

    /// Package type for a module file, looked up from its directory.
    pub fn package_type_for(&self, file: &Path) -> MockResult<Option<PackageType>> {
        let Some(dir) = file.parent() else {
            return Ok(None);
        };
        Ok(self.find_nearest_manifest(dir)?.package_type())
    }

    /// Number of memoized directories
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// How many manifest files were read from disk so far
    pub fn manifest_reads(&self) -> usize {
        self.manifest_reads.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn backfill(&self, visited: &[PathBuf], entry: &Arc<PackageManifest>) {
        if visited.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        for dir in visited {
            entries.insert(dir.clone(), Arc::clone(entry));
        }
    }

    fn read_manifest(&self, path: &Path, dir: &Path) -> MockResult<PackageManifest> {
        tracing::trace!("Reading package manifest {:?}", path);
        self.manifest_reads.fetch_add(1, Ordering::Relaxed);

        let content = std::fs::read_to_string(path)?;
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        let mut manifest: PackageManifest =
            serde_json::from_str(content).map_err(|e| MockError::Manifest {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        manifest.dir = Some(dir.to_path_buf());
        Ok(manifest)
    }
}
