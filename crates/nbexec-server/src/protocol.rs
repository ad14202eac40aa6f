//! Wire protocol.
//!
//! A client connects, sends one execution request as a single JSON line and
//! reads response lines until the server closes the connection:
//!
//! ```text
//! -> {"target":{"input":"doc.ipynb"},"format":{"execution":{...}}}
//! <- {"type":"status","data":"\nExecuting 'doc.ipynb'\n"}
//! <- {"type":"status","data":"  Cell 1/1..."}
//! <- {"type":"status","data":"Done\n"}
//! <- {"type":"error","data":"..."}        (only on failure)
//! ```
//!
//! A successful run ends with the connection closing and no terminal line.

use serde::{Deserialize, Serialize};

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Progress text, to be shown as is.
    Status(String),

    /// The request failed. Carries the rendered error.
    Error(String),

    /// The request needs a fresh process; resubmit it after restarting.
    Restart(String),
}

impl ServerMessage {
    /// Restart message as sent on the wire (empty payload).
    pub fn restart() -> Self {
        Self::Restart(String::new())
    }

    /// Whether the message ends the response.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Status(_))
    }

    /// Encode as one newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
