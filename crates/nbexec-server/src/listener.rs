//! Request listener.
//!
//! Accepts one connection at a time. Each request runs on a blocking worker
//! that owns the [`Orchestrator`] for the duration of the run; status lines
//! are streamed to the client as the worker produces them.
//!
//! A request that leaves no reusable session behind marks the listener for
//! exit. The flag is checked before waiting for the next connection, so the
//! response of the current request is always written out in full first.

use std::net::SocketAddr;
use std::sync::Arc;

use nbexec_core::{ExecuteRequest, Orchestrator, RunOutcome};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};

use crate::error::{ServerError, ServerResult};
use crate::protocol::ServerMessage;
use crate::ServerConfig;

/// TCP listener owning the process's orchestrator.
pub struct Listener {
    listener: TcpListener,
    config: ServerConfig,
    orchestrator: Option<Orchestrator>,
}

impl Listener {
    /// Bind the configured address.
    pub async fn bind(config: ServerConfig, orchestrator: Orchestrator) -> ServerResult<Self> {
        let addr = config.addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            orchestrator: Some(orchestrator),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until exit. Shuts the kernel session down on return.
    pub async fn run(mut self) -> ServerResult<()> {
        let shutdown = Arc::new(Notify::new());
        let signal_task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received shutdown signal");
                    shutdown.notify_one();
                }
            })
        };

        let mut exit_pending = false;
        loop {
            if exit_pending || self.orchestrator.is_none() {
                tracing::debug!("Exit requested by previous request");
                break;
            }

            let accepted = tokio::select! {
                result = tokio::time::timeout(self.config.idle_timeout, self.listener.accept()) => result,
                _ = shutdown.notified() => break,
            };

            let (stream, peer) = match accepted {
                Err(_) => {
                    tracing::info!(
                        "No request within {}s, exiting",
                        self.config.idle_timeout.as_secs()
                    );
                    break;
                }
                Ok(Err(e)) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                }
                Ok(Ok(conn)) => conn,
            };

            tracing::debug!("Connection from {}", peer);
            exit_pending = match self.handle(stream).await {
                Ok(exit) => exit,
                Err(e) => {
                    tracing::error!("Request from {} failed: {}", peer, e);
                    true
                }
            };
        }

        signal_task.abort();
        self.shutdown().await;
        Ok(())
    }

    /// Serve one connection. Returns whether the listener should exit.
    async fn handle(&mut self, stream: TcpStream) -> ServerResult<bool> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let request: ExecuteRequest = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed request: {}", e);
                let message = ServerMessage::Error(format!("Invalid request: {}", e));
                send(&mut writer, &message).await?;
                return Ok(true);
            }
        };

        let input = request.target.input.clone();
        tracing::info!("Executing {}", input.display());

        let mut orchestrator = self
            .orchestrator
            .take()
            .ok_or_else(|| ServerError::Worker("orchestrator unavailable".to_string()))?;

        let (status_tx, mut status_rx) = mpsc::unbounded_channel::<String>();
        let worker = tokio::task::spawn_blocking(move || {
            let outcome = orchestrator.execute(&request, &mut |status| {
                let _ = status_tx.send(status.to_string());
            });
            (orchestrator, outcome)
        });

        let mut client_gone = false;
        while let Some(status) = status_rx.recv().await {
            if client_gone {
                continue;
            }
            if let Err(e) = send(&mut writer, &ServerMessage::Status(status)).await {
                tracing::warn!("Client disconnected during run: {}", e);
                client_gone = true;
            }
        }

        let (orchestrator, outcome) = worker
            .await
            .map_err(|e| ServerError::Worker(e.to_string()))?;
        self.orchestrator = Some(orchestrator);

        let (terminal, exit) = match outcome {
            Ok(RunOutcome::Completed { persist }) => {
                tracing::info!("Executed {} (keep session: {})", input.display(), persist);
                (None, !persist)
            }
            Ok(RunOutcome::RestartRequired(reason)) => {
                tracing::info!("Restart required: {}", reason);
                (Some(ServerMessage::restart()), true)
            }
            Err(e) => {
                tracing::warn!("Execution of {} failed: {}", input.display(), e);
                (Some(ServerMessage::Error(e.to_string())), true)
            }
        };

        if let Some(message) = terminal {
            if !client_gone {
                send(&mut writer, &message).await?;
            }
        }
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Failed to close connection: {}", e);
        }

        Ok(exit)
    }

    async fn shutdown(&mut self) {
        let Some(mut orchestrator) = self.orchestrator.take() else {
            return;
        };
        let stopped = tokio::task::spawn_blocking(move || orchestrator.shutdown()).await;
        if let Err(e) = stopped {
            tracing::warn!("Kernel shutdown did not complete: {}", e);
        }
    }
}

async fn send<W>(writer: &mut W, message: &ServerMessage) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.to_line()?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
