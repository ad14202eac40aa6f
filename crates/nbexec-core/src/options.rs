//! Execution request and options.

use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// One execution request, as received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub target: Target,
    #[serde(default)]
    pub format: Format,
    /// Parameters to inject before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    /// Working directory of the kernel. Defaults to the notebook's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Suppress informational status lines.
    #[serde(default)]
    pub quiet: bool,
}

impl ExecuteRequest {
    /// A request for `input` with default execution options.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            target: Target {
                input: input.into(),
            },
            format: Format::default(),
            params: None,
            cwd: None,
            quiet: false,
        }
    }

    pub fn execution(&self) -> &ExecutionOptions {
        &self.format.execution
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Path of the notebook to execute.
    pub input: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Format {
    #[serde(default)]
    pub execution: ExecutionOptions,
}

/// Options controlling a run (`format.execution`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionOptions {
    /// Keep going when a cell raises.
    #[serde(default)]
    pub allow_errors: bool,
    /// Figure width in inches.
    #[serde(default = "default_fig_width")]
    pub fig_width: f64,
    /// Figure height in inches.
    #[serde(default = "default_fig_height")]
    pub fig_height: f64,
    #[serde(default = "default_fig_format")]
    pub fig_format: String,
    #[serde(default = "default_fig_dpi")]
    pub fig_dpi: f64,
    #[serde(default)]
    pub cache: CacheMode,
}

fn default_fig_width() -> f64 {
    7.0
}

fn default_fig_height() -> f64 {
    5.0
}

fn default_fig_format() -> String {
    "png".to_string()
}

fn default_fig_dpi() -> f64 {
    96.0
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            allow_errors: false,
            fig_width: default_fig_width(),
            fig_height: default_fig_height(),
            fig_format: default_fig_format(),
            fig_dpi: default_fig_dpi(),
            cache: CacheMode::Off,
        }
    }
}

/// Whether the execution cache is consulted and written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Never read or write the cache.
    #[default]
    Off,
    /// Reuse a matching stored run, otherwise execute and store.
    On,
    /// Always execute, then store.
    Refresh,
}

impl CacheMode {
    /// Whether executed results are written to the cache.
    pub fn writes(self) -> bool {
        !matches!(self, CacheMode::Off)
    }

    /// Whether a stored run may satisfy the request.
    pub fn reads(self) -> bool {
        matches!(self, CacheMode::On)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::Off => "off",
            CacheMode::On => "on",
            CacheMode::Refresh => "refresh",
        }
    }
}

impl Serialize for CacheMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CacheMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CacheModeVisitor;

        impl<'de> Visitor<'de> for CacheModeVisitor {
            type Value = CacheMode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a boolean, null, or one of \"off\", \"on\", \"user\", \"refresh\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<CacheMode, E> {
                Ok(if v { CacheMode::On } else { CacheMode::Off })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CacheMode, E> {
                match v {
                    "off" => Ok(CacheMode::Off),
                    "on" | "user" => Ok(CacheMode::On),
                    "refresh" => Ok(CacheMode::Refresh),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }

            fn visit_unit<E: de::Error>(self) -> Result<CacheMode, E> {
                Ok(CacheMode::Off)
            }

            fn visit_none<E: de::Error>(self) -> Result<CacheMode, E> {
                Ok(CacheMode::Off)
            }
        }

        deserializer.deserialize_any(CacheModeVisitor)
    }
}
