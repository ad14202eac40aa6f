//! Registry of kernel commands.
//!
//! Maps kernel spec names to the command that starts a kernel bridge:
//!
//! ```json
//! {
//!   "python3": { "argv": ["python3", "-m", "nbexec_bridge"], "language": "python" },
//!   "ir": { "argv": ["Rscript", "bridge.R"], "language": "R", "env": { "R_LIBS": "/opt/r" } }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding the registry location.
pub const KERNELS_ENV: &str = "NBEXEC_KERNELS";

/// One registered kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelEntry {
    /// Command line of the kernel bridge. The first element is the program.
    pub argv: Vec<String>,

    /// Language the kernel runs.
    #[serde(default)]
    pub language: Option<String>,

    /// Extra environment for the kernel process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Kernel spec name -> kernel command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelRegistry {
    kernels: BTreeMap<String, KernelEntry>,
}

impl KernelRegistry {
    /// Load a registry file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let registry: Self = serde_json::from_str(&content)?;
        for (name, entry) in &registry.kernels {
            if entry.argv.is_empty() {
                return Err(Error::Kernel(format!(
                    "kernel '{}' in {} has an empty argv",
                    name,
                    path.display()
                )));
            }
        }
        Ok(registry)
    }

    /// Load the registry from `$NBEXEC_KERNELS` or the user config directory.
    ///
    /// A missing file yields an empty registry.
    pub fn from_default_location() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading kernel registry from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Location consulted by [`from_default_location`](Self::from_default_location).
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(KERNELS_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("nbexec").join("kernels.json"))
    }

    /// Register a kernel.
    pub fn insert(&mut self, name: impl Into<String>, entry: KernelEntry) {
        self.kernels.insert(name.into(), entry);
    }

    /// Look up the kernel registered for a spec name.
    pub fn get(&self, name: &str) -> Result<&KernelEntry> {
        self.kernels
            .get(name)
            .ok_or_else(|| Error::KernelNotFound(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
