//! nbexec execution server.
//!
//! Serves one execution request at a time over TCP and keeps the kernel
//! session warm between requests while that is safe.
//!
//! # Architecture
//!
//! - **Protocol**: response message types
//! - **Listener**: accept loop with idle timeout and deferred exit
//!
//! The process exits (the loop returns) after any request that could not
//! leave a reusable session behind: failures, restarts, and runs whose
//! session has no dependencies to validate.

pub mod error;
pub mod listener;
pub mod protocol;

use std::net::SocketAddr;
use std::time::Duration;

use nbexec_core::Orchestrator;

pub use error::{ServerError, ServerResult};
pub use listener::Listener;
pub use protocol::ServerMessage;

/// Default port of the debug server.
pub const DEFAULT_PORT: u16 = 5555;

/// Default idle timeout of the debug server, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// How long to wait for the next connection before exiting.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Socket address to bind.
    pub fn addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

/// Serve requests until exit is requested, the idle timeout expires, or the
/// process receives Ctrl+C.
pub async fn serve(config: ServerConfig, orchestrator: Orchestrator) -> ServerResult<()> {
    Listener::bind(config, orchestrator).await?.run().await
}
