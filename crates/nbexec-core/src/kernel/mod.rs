//! Kernel sessions and the execution engine seam.
//!
//! The coordinator talks to interpreters through two traits:
//!
//! - [`KernelLauncher`] starts a kernel for a kernel spec.
//! - [`KernelClient`] runs code on a started kernel and blocks for the reply.
//!
//! [`ProcessLauncher`] is the built-in engine: it starts the command
//! registered for a kernel spec in the [`KernelRegistry`] and speaks
//! newline-delimited JSON with it over stdin/stdout.
//!
//! ```text
//! KernelSessionManager (one per process)
//!     │
//!     └── KernelSession (bound to one kernel spec name)
//!             │
//!             └── Box<dyn KernelClient>
//!                     │
//!                     └── ProcessKernel ── stdin/stdout JSON lines ── kernel bridge
//! ```

pub mod protocol;
mod process;
mod registry;
mod session;

pub use process::{ProcessKernel, ProcessLauncher};
pub use registry::{KernelEntry, KernelRegistry};
pub use session::{Acquired, KernelSession, KernelSessionManager, RAISES_EXCEPTION_TAG};

use std::path::PathBuf;

use serde_json::Value;

use crate::document::{KernelSpec, Output};
use crate::error::Result;

/// Per-request resources handed to the kernel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelResources {
    /// Working directory the kernel runs in.
    pub cwd: Option<PathBuf>,
    /// Environment exported to the kernel process.
    pub env: Vec<(String, String)>,
}

/// Error raised by code running in a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelFault {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

/// Result of running one piece of code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteReply {
    pub outputs: Vec<Output>,
    pub error: Option<KernelFault>,
}

/// A live connection to a kernel.
///
/// Calls block until the kernel replies. There is no cancellation: a kernel
/// that never answers blocks the caller.
pub trait KernelClient: Send {
    /// The kernel's `language_info` record.
    fn kernel_info(&mut self) -> Result<Value>;

    /// Run `code` and collect its outputs.
    fn execute(&mut self, code: &str, store_history: bool, execution_count: u32)
    -> Result<ExecuteReply>;

    /// Current widget state, if the kernel tracks any.
    fn widget_state(&mut self) -> Result<Option<Value>>;

    /// Stop the kernel. Must be safe to call more than once.
    fn shutdown(&mut self) -> Result<()>;
}

/// Starts kernels.
pub trait KernelLauncher: Send {
    fn launch(&self, spec: &KernelSpec, resources: &KernelResources)
    -> Result<Box<dyn KernelClient>>;
}
