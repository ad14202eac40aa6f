//! Notebook document model (nbformat v4).
//!
//! Only the parts of the format the coordinator touches are typed. Metadata
//! stays a JSON object so that keys written by other tools survive a
//! read/execute/write cycle untouched.
//!
//! # Canonical form
//!
//! Documents are written the way nbformat writes them: object keys sorted,
//! one-space indentation, multi-line strings split into a list of lines, and
//! exactly one trailing newline. Text values of mime bundles are split too;
//! JSON mime types (`application/json`, `application/*+json`) keep their
//! value as is.

mod cell;
mod output;

pub use cell::{Cell, CellType};
pub use output::Output;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Major format version this crate reads and writes.
pub const NB_FORMAT_VERSION: u32 = 4;

/// A notebook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// Ordered cells. Order is significant and rewritten in place.
    pub cells: Vec<Cell>,

    /// Document-level metadata (`kernelspec`, `language_info`, `widgets`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Format version (always 4).
    pub nbformat: u32,

    /// Minor format version.
    pub nbformat_minor: u32,
}

/// The `kernelspec` entry of a notebook's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Kernel spec name (e.g. `python3`).
    pub name: String,

    /// Kernel language (e.g. `python`).
    #[serde(default)]
    pub language: String,

    /// Human readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Notebook {
    /// Create an empty notebook bound to a kernel spec.
    pub fn new(kernelspec: &KernelSpec) -> Self {
        let mut metadata = Map::new();
        // KernelSpec only holds strings, so conversion cannot fail.
        if let Ok(value) = serde_json::to_value(kernelspec) {
            metadata.insert("kernelspec".to_string(), value);
        }
        Self {
            cells: Vec::new(),
            metadata,
            nbformat: NB_FORMAT_VERSION,
            nbformat_minor: 5,
        }
    }

    /// Read a notebook from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&content)
    }

    /// Parse a notebook from its JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        let notebook: Self = serde_json::from_str(content)?;
        if notebook.nbformat != NB_FORMAT_VERSION {
            return Err(Error::InvalidNotebook(format!(
                "unsupported nbformat version {} (expected {})",
                notebook.nbformat, NB_FORMAT_VERSION
            )));
        }
        Ok(notebook)
    }

    /// Serialize to canonical form, ending in exactly one newline.
    pub fn to_canonical_string(&self) -> Result<String> {
        // Going through `Value` sorts every object's keys.
        let value = serde_json::to_value(self)?;

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut serializer)?;

        let mut text = String::from_utf8(buf)
            .map_err(|e| Error::InvalidNotebook(format!("non UTF-8 output: {}", e)))?;
        let trimmed = text.trim_end_matches('\n').len();
        text.truncate(trimmed);
        text.push('\n');
        Ok(text)
    }

    /// Write the notebook to disk in canonical form.
    ///
    /// The content goes to a sibling temporary file first and is renamed over
    /// the target, so a crash mid-write never leaves a truncated notebook.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_canonical_string()?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "notebook.ipynb".to_string());
        let tmp_path = path.with_file_name(format!(".{}.nbexec-tmp", file_name));

        fs::write(&tmp_path, text).map_err(|e| Error::io(&tmp_path, e))?;
        fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
        Ok(())
    }

    /// The document's kernel spec.
    ///
    /// Falls back to `language_info.name` when the kernelspec omits a language.
    pub fn kernelspec(&self) -> Result<KernelSpec> {
        let raw = self
            .metadata
            .get("kernelspec")
            .cloned()
            .ok_or_else(|| Error::InvalidNotebook("notebook has no kernelspec".to_string()))?;
        let mut spec: KernelSpec = serde_json::from_value(raw)
            .map_err(|e| Error::InvalidNotebook(format!("malformed kernelspec: {}", e)))?;

        if spec.language.is_empty() {
            if let Some(lang) = self
                .metadata
                .get("language_info")
                .and_then(|info| info.get("name"))
                .and_then(Value::as_str)
            {
                spec.language = lang.to_string();
            }
        }
        Ok(spec)
    }

    /// Number of code cells.
    pub fn code_cell_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_code()).count()
    }

    /// Index of the first cell carrying `tag`.
    pub fn find_tagged(&self, tag: &str) -> Option<usize> {
        self.cells.iter().position(|c| c.has_tag(tag))
    }

    /// Whether new cells should carry an `id` (nbformat 4.5+).
    pub fn uses_cell_ids(&self) -> bool {
        self.nbformat_minor >= 5
    }
}

/// Serde helpers for nbformat's "multiline string" fields.
///
/// On disk such a field is either a string or a list of lines; in memory it
/// is always a single string. Writing splits after every newline.
pub(crate) mod multiline {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(text: &str, serializer: S) -> Result<S::Ok, S::Error> {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        lines.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Lines(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text,
            Repr::Lines(lines) => lines.concat(),
        })
    }
}

/// Serde helpers for mime bundles (`data` of rich outputs, attachments).
///
/// String values are multiline strings, except JSON mime types whose values
/// are stored as is.
pub(crate) mod mimebundle {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::{Map, Value};

    /// `application/json` and `application/*+json`.
    fn is_json_mime(mime: &str) -> bool {
        mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
    }

    /// The bundle as written to disk: text values split into lines.
    pub fn split(bundle: &Map<String, Value>) -> Map<String, Value> {
        bundle
            .iter()
            .map(|(mime, value)| {
                let value = match value {
                    Value::String(text) if !is_json_mime(mime) => Value::Array(
                        text.split_inclusive('\n')
                            .map(|line| Value::String(line.to_string()))
                            .collect(),
                    ),
                    other => other.clone(),
                };
                (mime.clone(), value)
            })
            .collect()
    }

    /// The bundle as held in memory: line lists joined back into strings.
    pub fn join(bundle: Map<String, Value>) -> Map<String, Value> {
        bundle
            .into_iter()
            .map(|(mime, value)| {
                let value = match value {
                    Value::Array(lines)
                        if !is_json_mime(&mime) && lines.iter().all(Value::is_string) =>
                    {
                        Value::String(lines.iter().filter_map(Value::as_str).collect())
                    }
                    other => other,
                };
                (mime, value)
            })
            .collect()
    }

    pub fn serialize<S: Serializer>(
        bundle: &Map<String, Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        split(bundle).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Map<String, Value>, D::Error> {
        Map::deserialize(deserializer).map(join)
    }
}
