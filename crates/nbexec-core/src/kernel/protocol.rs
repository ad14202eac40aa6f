//! Wire protocol between [`ProcessKernel`](super::ProcessKernel) and a kernel bridge.
//!
//! One JSON object per line in each direction. Every command gets exactly one
//! response.

use std::io::{BufRead, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Output;
use crate::error::{Error, Result};

/// Largest accepted message line.
const MAX_MESSAGE_BYTES: u64 = 256 * 1024 * 1024;

/// Command sent to the kernel bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelCommand {
    /// Ask for the kernel's `language_info`.
    KernelInfo,

    /// Run code.
    Execute {
        code: String,
        store_history: bool,
        execution_count: u32,
    },

    /// Ask for the current widget state.
    WidgetState,

    /// Stop the kernel.
    Shutdown,
}

/// Status of an execute reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Response sent by the kernel bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelResponse {
    KernelInfo {
        language_info: Value,
    },

    ExecuteReply {
        status: ReplyStatus,
        #[serde(default)]
        outputs: Vec<Output>,
        #[serde(default)]
        ename: Option<String>,
        #[serde(default)]
        evalue: Option<String>,
        #[serde(default)]
        traceback: Vec<String>,
    },

    WidgetState {
        #[serde(default)]
        state: Option<Value>,
    },

    ShuttingDown,

    /// The bridge could not process the command.
    Error {
        message: String,
    },
}

/// Write one message followed by a newline and flush.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .map_err(|e| Error::Kernel(format!("Failed to write kernel message: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Kernel(format!("Failed to flush kernel stream: {}", e)))?;
    Ok(())
}

/// Read one message line.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut line = String::new();
    let read = reader
        .by_ref()
        .take(MAX_MESSAGE_BYTES)
        .read_line(&mut line)
        .map_err(|e| Error::Kernel(format!("Failed to read kernel message: {}", e)))?;

    if read == 0 {
        return Err(Error::Kernel("kernel closed its output stream".to_string()));
    }
    if !line.ends_with('\n') && read as u64 == MAX_MESSAGE_BYTES {
        return Err(Error::Kernel(format!(
            "kernel message exceeds {} bytes",
            MAX_MESSAGE_BYTES
        )));
    }

    serde_json::from_str(line.trim_end())
        .map_err(|e| Error::Kernel(format!("Malformed kernel message: {}", e)))
}
