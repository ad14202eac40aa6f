//! Execution cache.
//!
//! A cache hit replays a previous run: the current document keeps its own
//! markdown and raw cells, while every code cell and a small allow-list of
//! execution-related metadata come from the stored run.
//!
//! Lookups never fail a request. Any error while matching or reading a stored
//! run counts as a miss.

mod store;

pub use store::{CACHE_DIR_NAME, FileCacheProvider, FileCacheStore};

use std::path::Path;

use serde_json::{Map, Value};

use crate::document::{Cell, Notebook};
use crate::error::Result;

/// Metadata keys copied from a stored run on a cache hit.
pub const CACHED_METADATA_KEYS: [&str; 3] = ["kernelspec", "language_info", "widgets"];

/// Identifies a stored run inside a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleRef(pub String);

/// The reusable part of a stored run.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheBundle {
    /// Code cells of the stored run, in order.
    pub code_cells: Vec<Cell>,
    /// Allow-listed metadata of the stored run.
    pub metadata: Map<String, Value>,
}

impl CacheBundle {
    /// Extract the bundle from an executed notebook.
    pub fn from_notebook(notebook: &Notebook) -> Self {
        Self {
            code_cells: notebook
                .cells
                .iter()
                .filter(|c| c.is_code())
                .cloned()
                .collect(),
            metadata: allow_listed(&notebook.metadata),
        }
    }
}

fn allow_listed(metadata: &Map<String, Value>) -> Map<String, Value> {
    CACHED_METADATA_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

/// Storage backend for executed notebooks.
pub trait CacheStore: Send {
    /// Find the stored run matching a notebook.
    fn match_notebook(&self, notebook: &Notebook) -> Result<Option<BundleRef>>;

    /// Load a stored run.
    fn fetch(&self, bundle: &BundleRef) -> Result<CacheBundle>;

    /// Store an executed notebook, replacing the previous entry for `path`.
    fn store(&mut self, path: &Path, notebook: &Notebook) -> Result<()>;
}

/// Opens the cache store responsible for a notebook directory.
pub trait CacheProvider: Send {
    fn open(&self, notebook_dir: &Path) -> Result<Box<dyn CacheStore>>;
}

/// Cache operations used by the orchestrator.
pub struct CacheAdapter {
    store: Box<dyn CacheStore>,
}

impl CacheAdapter {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// The notebook rebuilt from a matching stored run, if there is one.
    pub fn lookup(&self, notebook: &Notebook) -> Option<Notebook> {
        let bundle = match self.find_bundle(notebook) {
            Ok(Some(bundle)) => bundle,
            Ok(None) => {
                tracing::debug!("Cache miss");
                return None;
            }
            Err(e) => {
                tracing::debug!("Cache lookup failed, executing instead: {}", e);
                return None;
            }
        };
        let merged = merge_bundle(notebook, bundle);
        if merged.is_none() {
            tracing::debug!("Cached code cells do not line up with the notebook");
        }
        merged
    }

    fn find_bundle(&self, notebook: &Notebook) -> Result<Option<CacheBundle>> {
        match self.store.match_notebook(notebook)? {
            Some(bundle_ref) => self.store.fetch(&bundle_ref).map(Some),
            None => Ok(None),
        }
    }

    /// Store an executed notebook under `path`.
    pub fn store(&mut self, path: &Path, notebook: &Notebook) -> Result<()> {
        self.store.store(path, notebook)
    }
}

/// Overlay a stored run onto a notebook.
///
/// Only [`CACHED_METADATA_KEYS`] present in the bundle overwrite the
/// notebook's metadata. Code cells are replaced in order; `None` if the
/// number of code cells differs.
pub fn merge_bundle(notebook: &Notebook, bundle: CacheBundle) -> Option<Notebook> {
    if bundle.code_cells.len() != notebook.code_cell_count() {
        return None;
    }

    let mut metadata = notebook.metadata.clone();
    for key in CACHED_METADATA_KEYS {
        if let Some(value) = bundle.metadata.get(key) {
            metadata.insert(key.to_string(), value.clone());
        }
    }

    let mut cached = bundle.code_cells.into_iter();
    let mut cells = Vec::with_capacity(notebook.cells.len());
    for cell in &notebook.cells {
        if cell.is_code() {
            cells.push(cached.next()?);
        } else {
            cells.push(cell.clone());
        }
    }

    Some(Notebook {
        cells,
        metadata,
        nbformat: notebook.nbformat,
        nbformat_minor: notebook.nbformat_minor,
    })
}
