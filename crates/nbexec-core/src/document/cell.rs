//! Notebook cells.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::{mimebundle, multiline};
use super::output::Output;

/// Metadata fields describing stale view state, dropped when outputs are cleared.
const VIEW_STATE_METADATA: [&str; 2] = ["collapsed", "scrolled"];

/// Kind of notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

/// A notebook cell.
///
/// `execution_count` and `outputs` are only meaningful for code cells and are
/// only written for them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default, deserialize_with = "multiline::deserialize")]
    pub source: String,

    #[serde(default)]
    pub execution_count: Option<u32>,

    #[serde(default)]
    pub outputs: Vec<Output>,

    #[serde(default)]
    pub attachments: Option<Value>,
}

impl Cell {
    /// Create a code cell.
    pub fn code(source: impl Into<String>) -> Self {
        Self::new(CellType::Code, source)
    }

    /// Create a markdown cell.
    pub fn markdown(source: impl Into<String>) -> Self {
        Self::new(CellType::Markdown, source)
    }

    fn new(cell_type: CellType, source: impl Into<String>) -> Self {
        Self {
            cell_type,
            id: None,
            metadata: Map::new(),
            source: source.into(),
            execution_count: None,
            outputs: Vec::new(),
            attachments: None,
        }
    }

    /// Give the cell a fresh random id.
    pub fn with_generated_id(mut self) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.id = Some(id[..8].to_string());
        self
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// Whether the source contains nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.source.trim().is_empty()
    }

    /// The cell's tags, in order. Non-string entries are ignored.
    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(tag)))
    }

    /// Replace the cell's tags.
    pub fn set_tags(&mut self, tags: Vec<String>) {
        let tags = tags.into_iter().map(Value::String).collect();
        self.metadata.insert("tags".to_string(), Value::Array(tags));
    }

    /// Append a tag.
    pub fn add_tag(&mut self, tag: &str) {
        let mut tags = self.tags();
        tags.push(tag.to_string());
        self.set_tags(tags);
    }

    /// Remove the first occurrence of a tag. Returns whether it was present.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let Some(Value::Array(tags)) = self.metadata.get_mut("tags") else {
            return false;
        };
        match tags.iter().position(|t| t.as_str() == Some(tag)) {
            Some(index) => {
                tags.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop outputs, execution count and view state of a code cell.
    ///
    /// Markdown and raw cells are left untouched.
    pub fn clear_outputs(&mut self) {
        if !self.is_code() {
            return;
        }
        self.outputs.clear();
        self.execution_count = None;
        for field in VIEW_STATE_METADATA {
            self.metadata.remove(field);
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Lines<'a>(&'a str);

        impl Serialize for Lines<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                multiline::serialize(self.0, serializer)
            }
        }

        let is_code = self.is_code();
        let mut map = serializer.serialize_map(None)?;
        if let Some(attachments) = &self.attachments {
            map.serialize_entry("attachments", &split_attachments(attachments))?;
        }
        map.serialize_entry("cell_type", &self.cell_type)?;
        if is_code {
            map.serialize_entry("execution_count", &self.execution_count)?;
        }
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        map.serialize_entry("metadata", &self.metadata)?;
        if is_code {
            map.serialize_entry("outputs", &self.outputs)?;
        }
        map.serialize_entry("source", &Lines(&self.source))?;
        map.end()
    }
}

/// Attachments are `{filename: mimebundle}`; each bundle is written in line form.
fn split_attachments(attachments: &Value) -> Value {
    match attachments {
        Value::Object(files) => Value::Object(
            files
                .iter()
                .map(|(name, bundle)| {
                    let bundle = match bundle {
                        Value::Object(bundle) => Value::Object(mimebundle::split(bundle)),
                        other => other.clone(),
                    };
                    (name.clone(), bundle)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip() {
        let mut cell = Cell::code("x = 1");
        assert!(cell.tags().is_empty());
        assert!(!cell.has_tag("a"));

        cell.add_tag("a");
        cell.add_tag("b");
        assert_eq!(cell.tags(), vec!["a", "b"]);
        assert!(cell.has_tag("b"));

        assert!(cell.remove_tag("a"));
        assert!(!cell.remove_tag("a"));
        assert_eq!(cell.tags(), vec!["b"]);
    }

    #[test]
    fn test_clear_outputs() {
        let mut cell = Cell::code("print(1)");
        cell.execution_count = Some(4);
        cell.outputs.push(Output::stream("stdout", "1\n"));
        cell.metadata.insert("collapsed".to_string(), Value::Bool(true));
        cell.metadata.insert("scrolled".to_string(), Value::Bool(false));
        cell.metadata.insert("keep".to_string(), Value::Bool(true));

        cell.clear_outputs();

        assert!(cell.outputs.is_empty());
        assert_eq!(cell.execution_count, None);
        assert!(!cell.metadata.contains_key("collapsed"));
        assert!(!cell.metadata.contains_key("scrolled"));
        assert!(cell.metadata.contains_key("keep"));
    }

    #[test]
    fn test_clear_outputs_ignores_markdown() {
        let mut cell = Cell::markdown("# hi");
        cell.metadata.insert("collapsed".to_string(), Value::Bool(true));
        cell.clear_outputs();
        assert!(cell.metadata.contains_key("collapsed"));
    }

    #[test]
    fn test_markdown_serialization_has_no_code_fields() {
        let value = serde_json::to_value(Cell::markdown("a\nb")).unwrap();
        assert!(value.get("outputs").is_none());
        assert!(value.get("execution_count").is_none());
        assert_eq!(value["source"], serde_json::json!(["a\n", "b"]));
    }

    #[test]
    fn test_code_serialization_writes_null_count() {
        let value = serde_json::to_value(Cell::code("")).unwrap();
        assert_eq!(value["execution_count"], Value::Null);
        assert_eq!(value["outputs"], serde_json::json!([]));
        assert_eq!(value["source"], serde_json::json!([]));
    }

    #[test]
    fn test_attachment_text_split_into_lines() {
        let mut cell = Cell::markdown("![img](attachment:a.txt)");
        cell.attachments = Some(serde_json::json!({
            "a.txt": { "text/plain": "one\ntwo", "application/json": { "k": 1 } }
        }));

        let value = serde_json::to_value(&cell).unwrap();
        assert_eq!(
            value["attachments"]["a.txt"]["text/plain"],
            serde_json::json!(["one\n", "two"])
        );
        assert_eq!(
            value["attachments"]["a.txt"]["application/json"],
            serde_json::json!({ "k": 1 })
        );
    }

    #[test]
    fn test_generated_id() {
        let cell = Cell::code("").with_generated_id();
        assert_eq!(cell.id.as_deref().map(str::len), Some(8));
    }
}
