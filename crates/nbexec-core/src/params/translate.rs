//! Parameter translation into kernel languages.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::INJECTED_PARAMETERS_COMMENT;

/// Turns a parameter mapping into source code for a kernel.
pub trait ParameterTranslator: Send {
    fn translate(
        &self,
        kernel_name: &str,
        language: &str,
        params: &Map<String, Value>,
    ) -> Result<String>;
}

/// Built-in translator for Python, R and Julia kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageTranslator;

#[derive(Debug, Clone, Copy)]
enum Language {
    Python,
    R,
    Julia,
}

impl Language {
    fn from_name(language: &str) -> Option<Self> {
        match language.to_ascii_lowercase().as_str() {
            "python" | "python3" => Some(Self::Python),
            "r" => Some(Self::R),
            "julia" => Some(Self::Julia),
            _ => None,
        }
    }

    fn comment(self, text: &str) -> String {
        format!("# {}", text)
    }

    fn assign(self, name: &str, value: &str) -> String {
        format!("{} = {}", name, value)
    }

    fn literal(self, value: &Value) -> String {
        match value {
            Value::Null => match self {
                Self::Python => "None".to_string(),
                Self::R => "NULL".to_string(),
                Self::Julia => "nothing".to_string(),
            },
            Value::Bool(b) => match (self, b) {
                (Self::Python, true) => "True".to_string(),
                (Self::Python, false) => "False".to_string(),
                (Self::R, true) => "TRUE".to_string(),
                (Self::R, false) => "FALSE".to_string(),
                (Self::Julia, b) => b.to_string(),
            },
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.string(s),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|v| self.literal(v)).collect();
                match self {
                    Self::R => format!("list({})", items.join(", ")),
                    Self::Python | Self::Julia => format!("[{}]", items.join(", ")),
                }
            }
            Value::Object(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| {
                        let key = self.string(k);
                        let value = self.literal(v);
                        match self {
                            Self::Python => format!("{}: {}", key, value),
                            Self::R => format!("{} = {}", key, value),
                            Self::Julia => format!("{} => {}", key, value),
                        }
                    })
                    .collect();
                match self {
                    Self::Python => format!("{{{}}}", entries.join(", ")),
                    Self::R => format!("list({})", entries.join(", ")),
                    Self::Julia => format!("Dict({})", entries.join(", ")),
                }
            }
        }
    }

    fn string(self, s: &str) -> String {
        let (quote, escaped_quote) = match self {
            Self::Python => ('\'', "\\'"),
            Self::R | Self::Julia => ('"', "\\\""),
        };
        let mut out = String::with_capacity(s.len() + 2);
        out.push(quote);
        for ch in s.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '$' if matches!(self, Self::Julia) => out.push_str("\\$"),
                c if c == quote => out.push_str(escaped_quote),
                c => out.push(c),
            }
        }
        out.push(quote);
        out
    }
}

impl ParameterTranslator for LanguageTranslator {
    fn translate(
        &self,
        kernel_name: &str,
        language: &str,
        params: &Map<String, Value>,
    ) -> Result<String> {
        let lang = Language::from_name(language)
            .or_else(|| Language::from_name(kernel_name))
            .ok_or_else(|| Error::UnsupportedLanguage(language.to_string()))?;

        let mut source = lang.comment(INJECTED_PARAMETERS_COMMENT);
        source.push('\n');
        for (name, value) in params {
            source.push_str(&lang.assign(name, &lang.literal(value)));
            source.push('\n');
        }
        Ok(source)
    }
}
