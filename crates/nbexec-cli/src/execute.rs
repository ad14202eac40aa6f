//! One-shot execution: run a single request in this process.

use std::io::Write;

use nbexec_core::{ExecuteRequest, RunOutcome};

/// Execute a notebook, streaming progress to stderr.
pub fn run(request: &ExecuteRequest) -> anyhow::Result<()> {
    let mut orchestrator = crate::orchestrator()?;
    let mut stderr = std::io::stderr();

    let outcome = orchestrator.execute(request, &mut |status| {
        let _ = stderr.write_all(status.as_bytes());
        let _ = stderr.flush();
    });
    orchestrator.shutdown();

    match outcome? {
        RunOutcome::Completed { .. } => Ok(()),
        RunOutcome::RestartRequired(reason) => {
            anyhow::bail!("Kernel restart required: {}", reason)
        }
    }
}
