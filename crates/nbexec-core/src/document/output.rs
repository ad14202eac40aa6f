//! Cell outputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{mimebundle, multiline};

/// A single output of a code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Standard output/error.
    Stream {
        name: String,
        #[serde(with = "multiline")]
        text: String,
    },

    /// Value of the cell's last expression.
    ExecuteResult {
        execution_count: Option<u32>,
        #[serde(default, with = "mimebundle")]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    /// Rich display data.
    DisplayData {
        #[serde(default, with = "mimebundle")]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    /// Raised error.
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// Create a stream output.
    pub fn stream(name: &str, text: impl Into<String>) -> Self {
        Self::Stream {
            name: name.to_string(),
            text: text.into(),
        }
    }

    /// Create an `execute_result` with a `text/plain` representation.
    pub fn text_result(text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text/plain".to_string(), Value::String(text.into()));
        Self::ExecuteResult {
            execution_count: None,
            data,
            metadata: Map::new(),
        }
    }

    /// Text of a `stdout` stream output.
    pub fn stdout_text(&self) -> Option<&str> {
        match self {
            Self::Stream { name, text } if name == "stdout" => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_accepts_line_list() {
        let output: Output = serde_json::from_value(serde_json::json!({
            "output_type": "stream",
            "name": "stdout",
            "text": ["a\n", "b\n"]
        }))
        .unwrap();
        assert_eq!(output.stdout_text(), Some("a\nb\n"));
    }

    #[test]
    fn test_stderr_is_not_stdout() {
        assert_eq!(Output::stream("stderr", "x").stdout_text(), None);
        assert_eq!(Output::text_result("2").stdout_text(), None);
    }

    #[test]
    fn test_execute_result_json_shape() {
        let value = serde_json::to_value(Output::text_result("2")).unwrap();
        assert_eq!(value["output_type"], "execute_result");
        assert_eq!(value["data"]["text/plain"], serde_json::json!(["2"]));
        assert_eq!(value["execution_count"], Value::Null);
    }

    #[test]
    fn test_data_text_split_into_lines() {
        let mut output = Output::text_result("line1\nline2");
        if let Output::ExecuteResult { data, .. } = &mut output {
            data.insert(
                "application/json".to_string(),
                serde_json::json!({ "a": "x\ny" }),
            );
            data.insert(
                "application/vnd.plotly.v1+json".to_string(),
                Value::String("raw\ntext".to_string()),
            );
        }

        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value["data"]["text/plain"],
            serde_json::json!(["line1\n", "line2"])
        );
        assert_eq!(value["data"]["application/json"], serde_json::json!({ "a": "x\ny" }));
        assert_eq!(
            value["data"]["application/vnd.plotly.v1+json"],
            serde_json::json!("raw\ntext")
        );

        let back: Output = serde_json::from_value(value).unwrap();
        assert_eq!(back, output);
    }
}
