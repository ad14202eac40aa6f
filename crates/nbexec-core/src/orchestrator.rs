//! Execution orchestrator.
//!
//! Runs one request end to end: load the notebook, inject parameters, try
//! the cache, execute every cell on the process's kernel session and write
//! the result back. The returned [`RunOutcome`] tells the caller whether
//! the session is worth keeping warm.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::cache::{CacheAdapter, CacheProvider, FileCacheProvider};
use crate::deps::{self, StaleDependency};
use crate::document::{Cell, Notebook};
use crate::error::{Error, Result};
use crate::instrument;
use crate::kernel::{
    Acquired, KernelLauncher, KernelResources, KernelSession, KernelSessionManager,
    RAISES_EXCEPTION_TAG,
};
use crate::options::ExecuteRequest;
use crate::params::{self, LanguageTranslator, ParameterTranslator};

/// Cells with this tag are left exactly as they are.
pub const NO_EXECUTE_TAG: &str = "no-execute";

/// Cells with this tag may raise without failing the run.
pub const ALLOW_ERRORS_TAG: &str = "allow-errors";

/// Why the process has to restart before it can serve a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RestartReason {
    /// The live kernel runs a different kernel spec.
    KernelMismatch { current: String, requested: String },
    /// A file loaded by the kernel changed on disk.
    DependencyChanged(StaleDependency),
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::KernelMismatch { current, requested } => write!(
                f,
                "kernel '{}' is running but '{}' was requested",
                current, requested
            ),
            RestartReason::DependencyChanged(stale) => {
                write!(f, "dependency '{}' changed", stale.path)
            }
        }
    }
}

/// Result of a request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The notebook was written. `persist` is true when the session has
    /// dependencies to validate on the next request.
    Completed { persist: bool },
    /// Nothing was written; the process must restart.
    RestartRequired(RestartReason),
}

/// Optional capabilities, resolved once at startup.
#[derive(Default)]
pub struct Collaborators {
    pub cache: Option<Box<dyn CacheProvider>>,
    pub translator: Option<Box<dyn ParameterTranslator>>,
}

impl Collaborators {
    /// The capabilities compiled into this build.
    pub fn detect() -> Self {
        let cache: Option<Box<dyn CacheProvider>> = if cfg!(feature = "cache") {
            Some(Box::new(FileCacheProvider::default()))
        } else {
            None
        };
        let translator: Option<Box<dyn ParameterTranslator>> = if cfg!(feature = "params") {
            Some(Box::new(LanguageTranslator))
        } else {
            None
        };
        if cache.is_none() {
            tracing::debug!("Execution cache unavailable");
        }
        if translator.is_none() {
            tracing::debug!("Parameter injection unavailable");
        }
        Self { cache, translator }
    }
}

/// Drives notebook runs against the process's kernel session.
pub struct Orchestrator {
    sessions: KernelSessionManager,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(launcher: Box<dyn KernelLauncher>, collaborators: Collaborators) -> Self {
        Self {
            sessions: KernelSessionManager::new(launcher),
            collaborators,
        }
    }

    /// The live kernel session, if one was started.
    pub fn session(&self) -> Option<&KernelSession> {
        self.sessions.session()
    }

    /// Stop the kernel session.
    pub fn shutdown(&mut self) {
        self.sessions.shutdown();
    }

    /// Execute a notebook.
    ///
    /// `status` receives progress text meant for the client. On any error or
    /// restart the notebook on disk is left as it was.
    pub fn execute(
        &mut self,
        request: &ExecuteRequest,
        status: &mut dyn FnMut(&str),
    ) -> Result<RunOutcome> {
        let mut emit = |message: &str| {
            if !request.quiet {
                status(message);
            }
        };

        let (dir, file_name) = split_input(&request.target.input)?;
        let path = dir.join(&file_name);
        let options = request.execution();

        let resources = KernelResources {
            cwd: Some(request.cwd.clone().unwrap_or_else(|| dir.clone())),
            env: vec![
                ("JUPYTER_FIG_WIDTH".to_string(), options.fig_width.to_string()),
                ("JUPYTER_FIG_HEIGHT".to_string(), options.fig_height.to_string()),
            ],
        };

        let mut notebook = Notebook::read(&path)?;
        let spec = notebook.kernelspec()?;

        if let Some(params) = request.params.as_ref().filter(|p| !p.is_empty()) {
            let translator = self.collaborators.translator.as_deref().ok_or_else(|| {
                Error::MissingCollaborator(
                    "parameters were supplied but parameter injection is not available"
                        .to_string(),
                )
            })?;
            params::inject_parameters(&mut notebook, params, translator)?;
        }

        notebook
            .cells
            .insert(0, instrument::setup_cell(&spec, options));

        let mut cache = if options.cache.writes() {
            let provider = self.collaborators.cache.as_deref().ok_or_else(|| {
                Error::MissingCollaborator(
                    "cached execution was requested but the execution cache is not available"
                        .to_string(),
                )
            })?;
            Some(CacheAdapter::new(provider.open(&dir)?))
        } else {
            None
        };

        if options.cache.reads() {
            if let Some(mut cached) = cache.as_ref().and_then(|c| c.lookup(&notebook)) {
                cached.cells.remove(0);
                cached.write(&path)?;
                tracing::info!("Read {} from cache", path.display());
                emit("(Notebook read from cache)\n\n");
                return Ok(RunOutcome::Completed { persist: false });
            }
        }

        let session = match self
            .sessions
            .acquire(&spec, &resources, options.allow_errors)?
        {
            Acquired::Ready(session) => session,
            Acquired::RestartRequired { current, requested } => {
                tracing::info!("Kernel '{}' cannot serve '{}'", current, requested);
                return Ok(RunOutcome::RestartRequired(RestartReason::KernelMismatch {
                    current,
                    requested,
                }));
            }
        };

        if let Some(info) = session.language_info() {
            notebook
                .metadata
                .insert("language_info".to_string(), info.clone());
        }

        let total_code_cells = notebook.code_cell_count().saturating_sub(1);
        let mut code_cell = 0u32;

        for index in 0..notebook.cells.len() {
            let cell = &mut notebook.cells[index];
            let is_code = cell.is_code();
            let progress = is_code && index > 0;

            if progress {
                emit(&format!("  Cell {}/{}...", code_cell, total_code_cells));
            }

            if !cell.has_tag(NO_EXECUTE_TAG) {
                cell.clear_outputs();
                run_cell(session, cell, code_cell, index > 0)?;
            }

            if index == 0 {
                let report = deps::extract(cell);
                if let Some(stale) = session.dependencies_mut().observe(report) {
                    tracing::info!(
                        "Dependency {} changed ({} -> {})",
                        stale.path,
                        stale.previous,
                        stale.current
                    );
                    return Ok(RunOutcome::RestartRequired(
                        RestartReason::DependencyChanged(stale),
                    ));
                }
                tracing::info!("Executing {}", path.display());
                emit(&format!("\nExecuting '{}'\n", file_name.display()));
            }

            if is_code {
                code_cell += 1;
            }
            if progress {
                emit("Done\n");
            }
        }

        session.capture_widget_state(&mut notebook)?;

        if let Some(cache) = cache.as_mut() {
            if let Err(e) = cache.store(Path::new(&file_name), &notebook) {
                tracing::warn!("Failed to cache {}: {}", path.display(), e);
            }
        }

        notebook.cells.remove(0);
        notebook.write(&path)?;

        let mut cleanup = instrument::cleanup_cell(&spec);
        session.execute_cell(&mut cleanup, code_cell, false)?;

        emit("\n");

        Ok(RunOutcome::Completed {
            persist: session.dependencies().has_entries(),
        })
    }
}

/// Split the input path into its directory and file name.
fn split_input(input: &Path) -> Result<(PathBuf, PathBuf)> {
    let absolute = std::path::absolute(input).map_err(|e| Error::io(input, e))?;
    let file_name = absolute
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| Error::InvalidNotebook(format!("not a file: {}", input.display())))?;
    let dir = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((dir, file_name))
}

/// Execute one cell, honoring its `allow-errors` tag.
fn run_cell(
    session: &mut KernelSession,
    cell: &mut Cell,
    execution_count: u32,
    store_history: bool,
) -> Result<()> {
    let tolerate = cell.has_tag(ALLOW_ERRORS_TAG) && !cell.has_tag(RAISES_EXCEPTION_TAG);
    if tolerate {
        cell.add_tag(RAISES_EXCEPTION_TAG);
    }

    let result = session.execute_cell(cell, execution_count, store_history);

    if tolerate {
        cell.remove_tag(RAISES_EXCEPTION_TAG);
    }
    result?;

    if cell
        .metadata
        .get("lines_to_next_cell")
        .and_then(Value::as_i64)
        == Some(0)
    {
        cell.metadata
            .insert("lines_to_next_cell".to_string(), Value::from(1));
    }
    if cell.is_code() {
        cell.execution_count = Some(execution_count);
    }
    Ok(())
}
