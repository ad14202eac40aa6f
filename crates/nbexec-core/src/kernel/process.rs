//! Kernel bridge running as a child process.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::Value;

use crate::document::KernelSpec;
use crate::error::{Error, Result};

use super::protocol::{KernelCommand, KernelResponse, ReplyStatus, read_message, write_message};
use super::registry::{KernelEntry, KernelRegistry};
use super::{ExecuteReply, KernelClient, KernelFault, KernelLauncher, KernelResources};

/// Handle to a kernel bridge process.
pub struct ProcessKernel {
    /// The child process.
    child: Child,
    /// Buffered stdin writer.
    stdin: BufWriter<ChildStdin>,
    /// Buffered stdout reader.
    stdout: BufReader<ChildStdout>,
    /// Whether the process has been stopped.
    stopped: bool,
}

impl ProcessKernel {
    /// Start a kernel bridge.
    pub fn spawn(argv: &[String], resources: &KernelResources) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Kernel("empty kernel command".to_string()))?;
        let program = resolve_program(program);

        let mut command = Command::new(&program);
        command
            .args(args)
            .envs(resources.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &resources.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Kernel(format!(
                "Failed to spawn kernel process '{}': {}",
                program.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Kernel("Failed to get kernel stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Kernel("Failed to get kernel stdout".to_string()))?;

        tracing::info!("Started kernel process {} ({})", child.id(), program.display());

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            stopped: false,
        })
    }

    /// Send a command and wait for its response.
    fn request(&mut self, cmd: &KernelCommand) -> Result<KernelResponse> {
        if self.stopped {
            return Err(Error::Kernel("Kernel has been shut down".to_string()));
        }
        write_message(&mut self.stdin, cmd)?;
        match read_message(&mut self.stdout)? {
            KernelResponse::Error { message } => Err(Error::Kernel(message)),
            response => Ok(response),
        }
    }

    /// Process ID of the kernel.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Whether the kernel process is still running.
    pub fn is_alive(&mut self) -> bool {
        !self.stopped && matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill kernel: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}

/// Resolve a bare program name through `PATH`; leave paths alone.
fn resolve_program(program: &str) -> PathBuf {
    let path = PathBuf::from(program);
    if path.components().count() > 1 {
        return path;
    }
    which::which(program).unwrap_or(path)
}

fn unexpected(context: &str, response: KernelResponse) -> Error {
    Error::Kernel(format!(
        "Unexpected response when {}: {:?}",
        context, response
    ))
}

impl KernelClient for ProcessKernel {
    fn kernel_info(&mut self) -> Result<Value> {
        match self.request(&KernelCommand::KernelInfo)? {
            KernelResponse::KernelInfo { language_info } => Ok(language_info),
            other => Err(unexpected("requesting kernel info", other)),
        }
    }

    fn execute(
        &mut self,
        code: &str,
        store_history: bool,
        execution_count: u32,
    ) -> Result<ExecuteReply> {
        let cmd = KernelCommand::Execute {
            code: code.to_string(),
            store_history,
            execution_count,
        };
        match self.request(&cmd)? {
            KernelResponse::ExecuteReply {
                status,
                outputs,
                ename,
                evalue,
                traceback,
            } => {
                let error = (status == ReplyStatus::Error).then(|| KernelFault {
                    ename: ename.unwrap_or_else(|| "Error".to_string()),
                    evalue: evalue.unwrap_or_default(),
                    traceback,
                });
                Ok(ExecuteReply { outputs, error })
            }
            other => Err(unexpected("executing", other)),
        }
    }

    fn widget_state(&mut self) -> Result<Option<Value>> {
        match self.request(&KernelCommand::WidgetState)? {
            KernelResponse::WidgetState { state } => Ok(state),
            other => Err(unexpected("requesting widget state", other)),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        // Best effort: a dead bridge cannot acknowledge.
        if let Err(e) = self.request(&KernelCommand::Shutdown) {
            tracing::debug!("Kernel did not acknowledge shutdown: {}", e);
        }
        self.stopped = true;
        self.kill();
        tracing::info!("Stopped kernel process {}", self.child.id());
        Ok(())
    }
}

impl Drop for ProcessKernel {
    fn drop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.kill();
        }
    }
}

/// Launches kernels registered in a [`KernelRegistry`].
pub struct ProcessLauncher {
    registry: KernelRegistry,
}

impl ProcessLauncher {
    pub fn new(registry: KernelRegistry) -> Self {
        Self { registry }
    }
}

impl KernelLauncher for ProcessLauncher {
    fn launch(
        &self,
        spec: &KernelSpec,
        resources: &KernelResources,
    ) -> Result<Box<dyn KernelClient>> {
        let entry = self.registry.get(&spec.name)?;
        if let Some(language) = mismatched_language(entry, spec) {
            tracing::warn!(
                "Kernel '{}' is registered for {} but the notebook declares {}",
                spec.name,
                language,
                spec.language
            );
        }

        let mut resources = resources.clone();
        resources
            .env
            .extend(entry.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let kernel = ProcessKernel::spawn(&entry.argv, &resources)?;
        tracing::debug!("Started kernel '{}' (pid {})", spec.name, kernel.pid());
        Ok(Box::new(kernel))
    }
}

/// The registered language, when it disagrees with the notebook's.
fn mismatched_language<'a>(entry: &'a KernelEntry, spec: &KernelSpec) -> Option<&'a str> {
    let language = entry.language.as_deref()?;
    if spec.language.is_empty() || language.eq_ignore_ascii_case(&spec.language) {
        None
    } else {
        Some(language)
    }
}
