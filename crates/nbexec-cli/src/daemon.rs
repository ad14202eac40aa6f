//! Background server startup.
//!
//! The server is a copy of this executable started with `--serve`, detached
//! into its own session with all standard streams closed.

use std::process::{Command, Stdio};

use anyhow::Context;

/// Start a detached server. Returns its process id.
pub fn spawn(port: u16, timeout: u64, verbose: bool) -> anyhow::Result<u32> {
    let exe = std::env::current_exe().context("Failed to locate nbexec executable")?;
    let cwd = std::env::current_dir().context("Failed to read working directory")?;

    let mut command = Command::new(exe);
    command
        .arg("--serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--timeout")
        .arg(timeout.to_string())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if verbose {
        command.arg("--verbose");
    }
    detach(&mut command);

    let child = command.spawn().context("Failed to start server process")?;
    Ok(child.id())
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach(_command: &mut Command) {}
