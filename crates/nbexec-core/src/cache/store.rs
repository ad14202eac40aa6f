//! On-disk cache store.
//!
//! Layout, next to the notebook:
//!
//! ```text
//! .jupyter_cache/
//! ├── index.json          # notebook path -> bundle key
//! └── bundles/
//!     └── <key>.json      # executed notebook, canonical form
//! ```
//!
//! The key hashes the kernel spec name and the source of every code cell,
//! so a notebook matches a stored run exactly when its code is unchanged.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::document::Notebook;
use crate::error::{Error, Result};

use super::{BundleRef, CacheBundle, CacheProvider, CacheStore};

/// Directory name of the cache, relative to the notebook directory.
pub const CACHE_DIR_NAME: &str = ".jupyter_cache";

/// File-backed [`CacheStore`].
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    /// Open a cache rooted at `root`. Directories are created on first store.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache key of a notebook.
    pub fn key_for(notebook: &Notebook) -> String {
        let mut hasher = blake3::Hasher::new();
        let kernel = notebook
            .kernelspec()
            .map(|spec| spec.name)
            .unwrap_or_default();
        hasher.update(kernel.as_bytes());
        hasher.update(&[0]);
        for cell in notebook.cells.iter().filter(|c| c.is_code()) {
            hasher.update(cell.source.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    fn bundles_dir(&self) -> PathBuf {
        self.root.join("bundles")
    }

    fn bundle_path(&self, key: &str) -> PathBuf {
        self.bundles_dir().join(format!("{}.json", key))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn load_index(&self) -> Result<BTreeMap<String, String>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Cache(format!("corrupt cache index {}: {}", path.display(), e)))
    }

    fn save_index(&self, index: &BTreeMap<String, String>) -> Result<()> {
        let path = self.index_path();
        let json = serde_json::to_string_pretty(index)?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))
    }
}

impl CacheStore for FileCacheStore {
    fn match_notebook(&self, notebook: &Notebook) -> Result<Option<BundleRef>> {
        let key = Self::key_for(notebook);
        if self.bundle_path(&key).is_file() {
            Ok(Some(BundleRef(key)))
        } else {
            Ok(None)
        }
    }

    fn fetch(&self, bundle: &BundleRef) -> Result<CacheBundle> {
        let path = self.bundle_path(&bundle.0);
        let notebook = Notebook::read(&path)
            .map_err(|e| Error::Cache(format!("unreadable cache record {}: {}", path.display(), e)))?;
        Ok(CacheBundle::from_notebook(&notebook))
    }

    fn store(&mut self, path: &Path, notebook: &Notebook) -> Result<()> {
        let bundles = self.bundles_dir();
        fs::create_dir_all(&bundles).map_err(|e| Error::io(&bundles, e))?;

        let key = Self::key_for(notebook);
        notebook.write(self.bundle_path(&key))?;

        let mut index = self.load_index().unwrap_or_else(|e| {
            tracing::warn!("Rebuilding cache index: {}", e);
            BTreeMap::new()
        });
        let entry = path.to_string_lossy().to_string();
        if let Some(previous) = index.insert(entry, key.clone()) {
            let still_used = index.values().any(|k| *k == previous);
            if previous != key && !still_used {
                let stale = self.bundle_path(&previous);
                if let Err(e) = fs::remove_file(&stale) {
                    tracing::debug!("Could not remove {}: {}", stale.display(), e);
                }
            }
        }
        self.save_index(&index)?;

        tracing::debug!("Cached {} as {}", path.display(), key);
        Ok(())
    }
}

/// Opens a [`FileCacheStore`] in each notebook's directory.
#[derive(Debug, Clone)]
pub struct FileCacheProvider {
    dir_name: String,
}

impl FileCacheProvider {
    pub fn new(dir_name: impl Into<String>) -> Self {
        Self {
            dir_name: dir_name.into(),
        }
    }
}

impl Default for FileCacheProvider {
    fn default() -> Self {
        Self::new(CACHE_DIR_NAME)
    }
}

impl CacheProvider for FileCacheProvider {
    fn open(&self, notebook_dir: &Path) -> Result<Box<dyn CacheStore>> {
        Ok(Box::new(FileCacheStore::open(
            notebook_dir.join(&self.dir_name),
        )))
    }
}
