//! The process-wide kernel session.
//!
//! A process owns at most one kernel. It is reused across requests while the
//! requested kernel spec name stays the same; any other spec requires a fresh
//! process, so a mismatch is reported back instead of swapping kernels.

use serde_json::{Map, Value, json};

use crate::deps::DependencyTracking;
use crate::document::{Cell, KernelSpec, Notebook, Output};
use crate::error::{Error, Result};

use super::{KernelClient, KernelFault, KernelLauncher, KernelResources};

/// Tag telling the session that a cell is expected to raise.
pub const RAISES_EXCEPTION_TAG: &str = "raises-exception";

/// MIME type under which widget state is stored in notebook metadata.
const WIDGET_STATE_MIMETYPE: &str = "application/vnd.jupyter.widget-state+json";

/// A live kernel bound to one kernel spec.
pub struct KernelSession {
    spec: KernelSpec,
    client: Box<dyn KernelClient>,
    language_info: Option<Value>,
    resources: KernelResources,
    allow_errors: bool,
    dependencies: DependencyTracking,
}

impl KernelSession {
    fn start(
        launcher: &dyn KernelLauncher,
        spec: &KernelSpec,
        resources: &KernelResources,
        allow_errors: bool,
    ) -> Result<Self> {
        tracing::info!("Starting kernel for spec '{}'", spec.name);
        let mut client = launcher.launch(spec, resources)?;
        let language_info = match client.kernel_info() {
            Ok(info) => Some(info),
            Err(e) => {
                let _ = client.shutdown();
                return Err(e);
            }
        };

        Ok(Self {
            spec: spec.clone(),
            client,
            language_info,
            resources: resources.clone(),
            allow_errors,
            dependencies: DependencyTracking::default(),
        })
    }

    /// Point the session at a new request.
    fn rebind(&mut self, resources: &KernelResources, allow_errors: bool) {
        if self.resources.cwd != resources.cwd {
            tracing::debug!(
                "Kernel '{}' keeps working directory {:?} (requested {:?})",
                self.spec.name,
                self.resources.cwd,
                resources.cwd
            );
        }
        self.resources = resources.clone();
        self.allow_errors = allow_errors;
    }

    /// Kernel spec the session is bound to.
    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    /// The kernel's `language_info`, as reported at startup.
    pub fn language_info(&self) -> Option<&Value> {
        self.language_info.as_ref()
    }

    pub fn allow_errors(&self) -> bool {
        self.allow_errors
    }

    pub fn dependencies(&self) -> &DependencyTracking {
        &self.dependencies
    }

    pub fn dependencies_mut(&mut self) -> &mut DependencyTracking {
        &mut self.dependencies
    }

    /// Run a cell and store its outputs on it.
    ///
    /// Non-code and blank cells are not sent to the kernel. A kernel error
    /// fails the call unless errors are allowed for the session or the cell
    /// is tagged `raises-exception`; in that case the error stays in the
    /// cell's outputs.
    pub fn execute_cell(
        &mut self,
        cell: &mut Cell,
        execution_count: u32,
        store_history: bool,
    ) -> Result<()> {
        if !cell.is_code() || cell.is_blank() {
            return Ok(());
        }

        let reply = self
            .client
            .execute(&cell.source, store_history, execution_count)?;

        cell.outputs = reply
            .outputs
            .into_iter()
            .map(|output| match output {
                Output::ExecuteResult { data, metadata, .. } => Output::ExecuteResult {
                    execution_count: Some(execution_count),
                    data,
                    metadata,
                },
                other => other,
            })
            .collect();

        if let Some(fault) = reply.error {
            if !cell.outputs.iter().any(|o| matches!(o, Output::Error { .. })) {
                cell.outputs.push(Output::Error {
                    ename: fault.ename.clone(),
                    evalue: fault.evalue.clone(),
                    traceback: fault.traceback.clone(),
                });
            }
            if !self.allow_errors && !cell.has_tag(RAISES_EXCEPTION_TAG) {
                return Err(Error::Execution(render_fault(&cell.source, &fault)));
            }
            tracing::debug!("Tolerated {} in cell: {}", fault.ename, fault.evalue);
        }

        Ok(())
    }

    /// Store the kernel's widget state in the notebook metadata.
    pub fn capture_widget_state(&mut self, notebook: &mut Notebook) -> Result<()> {
        let state = match self.client.widget_state()? {
            Some(Value::Object(state)) if !state.is_empty() => state,
            _ => return Ok(()),
        };

        let mut widgets = Map::new();
        widgets.insert(
            WIDGET_STATE_MIMETYPE.to_string(),
            json!({
                "state": state,
                "version_major": 2,
                "version_minor": 0,
            }),
        );
        notebook
            .metadata
            .insert("widgets".to_string(), Value::Object(widgets));
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.client.shutdown() {
            tracing::warn!("Failed to shut down kernel '{}': {}", self.spec.name, e);
        }
    }
}

/// Format an execution fault the way it is reported to clients.
fn render_fault(source: &str, fault: &KernelFault) -> String {
    let rule = "-".repeat(18);
    let mut message = format!(
        "An error occurred while executing the following cell:\n{rule}\n{}\n{rule}\n\n",
        source.trim_end()
    );
    for line in &fault.traceback {
        message.push_str(line);
        message.push('\n');
    }
    message.push_str(&format!("{}: {}\n", fault.ename, fault.evalue));
    message
}

/// Outcome of [`KernelSessionManager::acquire`].
pub enum Acquired<'a> {
    /// The session is bound to the requested spec and ready.
    Ready(&'a mut KernelSession),
    /// The live session runs a different kernel; the process must restart.
    RestartRequired { current: String, requested: String },
}

/// Owner of the single kernel session of a process.
pub struct KernelSessionManager {
    launcher: Box<dyn KernelLauncher>,
    session: Option<KernelSession>,
}

impl KernelSessionManager {
    pub fn new(launcher: Box<dyn KernelLauncher>) -> Self {
        Self {
            launcher,
            session: None,
        }
    }

    /// Create the session on first use, or rebind the existing one.
    ///
    /// A spec name mismatch leaves the existing session untouched.
    pub fn acquire(
        &mut self,
        spec: &KernelSpec,
        resources: &KernelResources,
        allow_errors: bool,
    ) -> Result<Acquired<'_>> {
        if self.session.is_none() {
            let session =
                KernelSession::start(self.launcher.as_ref(), spec, resources, allow_errors)?;
            self.session = Some(session);
        }

        let Some(session) = self.session.as_mut() else {
            return Err(Error::Kernel("kernel session unavailable".to_string()));
        };

        if session.spec.name != spec.name {
            return Ok(Acquired::RestartRequired {
                current: session.spec.name.clone(),
                requested: spec.name.clone(),
            });
        }

        session.rebind(resources, allow_errors);
        Ok(Acquired::Ready(session))
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<&KernelSession> {
        self.session.as_ref()
    }

    /// Stop the kernel. The manager keeps no session afterwards.
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
    }
}

impl Drop for KernelSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ExecuteReply;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Counters {
        launches: usize,
        executed: Vec<(String, bool, u32)>,
        shutdowns: usize,
    }

    struct FakeClient {
        counters: Arc<Mutex<Counters>>,
        widgets: Option<Value>,
    }

    impl KernelClient for FakeClient {
        fn kernel_info(&mut self) -> Result<Value> {
            Ok(json!({"name": "python", "version": "3.12"}))
        }

        fn execute(
            &mut self,
            code: &str,
            store_history: bool,
            execution_count: u32,
        ) -> Result<ExecuteReply> {
            self.counters.lock().unwrap().executed.push((
                code.to_string(),
                store_history,
                execution_count,
            ));
            if code.contains("raise") {
                return Ok(ExecuteReply {
                    outputs: vec![],
                    error: Some(KernelFault {
                        ename: "ValueError".to_string(),
                        evalue: "boom".to_string(),
                        traceback: vec!["Traceback".to_string()],
                    }),
                });
            }
            Ok(ExecuteReply {
                outputs: vec![Output::text_result("2")],
                error: None,
            })
        }

        fn widget_state(&mut self) -> Result<Option<Value>> {
            Ok(self.widgets.clone())
        }

        fn shutdown(&mut self) -> Result<()> {
            self.counters.lock().unwrap().shutdowns += 1;
            Ok(())
        }
    }

    struct FakeLauncher {
        counters: Arc<Mutex<Counters>>,
        widgets: Option<Value>,
    }

    impl KernelLauncher for FakeLauncher {
        fn launch(
            &self,
            _spec: &KernelSpec,
            _resources: &KernelResources,
        ) -> Result<Box<dyn KernelClient>> {
            self.counters.lock().unwrap().launches += 1;
            Ok(Box::new(FakeClient {
                counters: self.counters.clone(),
                widgets: self.widgets.clone(),
            }))
        }
    }

    fn manager(widgets: Option<Value>) -> (KernelSessionManager, Arc<Mutex<Counters>>) {
        let counters = Arc::new(Mutex::new(Counters::default()));
        let launcher = FakeLauncher {
            counters: counters.clone(),
            widgets,
        };
        (KernelSessionManager::new(Box::new(launcher)), counters)
    }

    fn spec(name: &str) -> KernelSpec {
        KernelSpec {
            name: name.to_string(),
            language: "python".to_string(),
            display_name: None,
        }
    }

    #[test]
    fn test_acquire_reuses_session() {
        let (mut manager, counters) = manager(None);
        let resources = KernelResources::default();

        assert!(matches!(
            manager.acquire(&spec("python3"), &resources, false).unwrap(),
            Acquired::Ready(_)
        ));
        let other = KernelResources {
            cwd: Some("/tmp".into()),
            env: vec![],
        };
        match manager.acquire(&spec("python3"), &other, true).unwrap() {
            Acquired::Ready(session) => {
                assert!(session.allow_errors());
                assert_eq!(session.resources, other);
                assert!(session.language_info().is_some());
            }
            Acquired::RestartRequired { .. } => panic!("expected reuse"),
        }
        assert_eq!(counters.lock().unwrap().launches, 1);
    }

    #[test]
    fn test_acquire_mismatch_requires_restart() {
        let (mut manager, counters) = manager(None);
        let resources = KernelResources::default();
        manager.acquire(&spec("python3"), &resources, false).unwrap();

        match manager.acquire(&spec("ir"), &resources, true).unwrap() {
            Acquired::RestartRequired { current, requested } => {
                assert_eq!(current, "python3");
                assert_eq!(requested, "ir");
            }
            Acquired::Ready(_) => panic!("expected restart"),
        }

        let session = manager.session().unwrap();
        assert_eq!(session.spec().name, "python3");
        assert!(!session.allow_errors());
        assert_eq!(counters.lock().unwrap().launches, 1);
    }

    #[test]
    fn test_execute_cell_sets_result_count() {
        let (mut manager, _) = manager(None);
        let Acquired::Ready(session) = manager
            .acquire(&spec("python3"), &KernelResources::default(), false)
            .unwrap()
        else {
            panic!("expected session");
        };

        let mut cell = Cell::code("1+1");
        session.execute_cell(&mut cell, 4, true).unwrap();

        let mut data = Map::new();
        data.insert("text/plain".to_string(), json!("2"));
        assert_eq!(
            cell.outputs,
            vec![Output::ExecuteResult {
                execution_count: Some(4),
                data,
                metadata: Map::new(),
            }]
        );
    }

    #[test]
    fn test_blank_and_markdown_cells_skip_kernel() {
        let (mut manager, counters) = manager(None);
        let Acquired::Ready(session) = manager
            .acquire(&spec("python3"), &KernelResources::default(), false)
            .unwrap()
        else {
            panic!("expected session");
        };

        session.execute_cell(&mut Cell::code("  \n"), 0, false).unwrap();
        session.execute_cell(&mut Cell::markdown("1+1"), 1, true).unwrap();
        assert!(counters.lock().unwrap().executed.is_empty());
    }

    #[test]
    fn test_error_handling() {
        let (mut manager, _) = manager(None);
        let Acquired::Ready(session) = manager
            .acquire(&spec("python3"), &KernelResources::default(), false)
            .unwrap()
        else {
            panic!("expected session");
        };

        let mut failing = Cell::code("raise ValueError('boom')");
        let err = session.execute_cell(&mut failing, 1, true).unwrap_err();
        match err {
            Error::Execution(message) => {
                assert!(message.contains("raise ValueError('boom')"));
                assert!(message.contains("ValueError: boom"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut tolerated = Cell::code("raise ValueError('boom')");
        tolerated.add_tag(RAISES_EXCEPTION_TAG);
        session.execute_cell(&mut tolerated, 2, true).unwrap();
        assert!(matches!(tolerated.outputs[0], Output::Error { .. }));
    }

    #[test]
    fn test_capture_widget_state() {
        let (mut manager, _) = manager(Some(json!({"model-1": {"value": 3}})));
        let Acquired::Ready(session) = manager
            .acquire(&spec("python3"), &KernelResources::default(), false)
            .unwrap()
        else {
            panic!("expected session");
        };

        let mut nb = Notebook::new(&spec("python3"));
        session.capture_widget_state(&mut nb).unwrap();
        let widgets = &nb.metadata["widgets"][WIDGET_STATE_MIMETYPE];
        assert_eq!(widgets["state"]["model-1"]["value"], 3);
        assert_eq!(widgets["version_major"], 2);
    }

    #[test]
    fn test_no_widget_state_leaves_metadata() {
        let (mut manager, _) = manager(Some(json!({})));
        let Acquired::Ready(session) = manager
            .acquire(&spec("python3"), &KernelResources::default(), false)
            .unwrap()
        else {
            panic!("expected session");
        };

        let mut nb = Notebook::new(&spec("python3"));
        session.capture_widget_state(&mut nb).unwrap();
        assert!(!nb.metadata.contains_key("widgets"));
    }

    #[test]
    fn test_shutdown_on_drop() {
        let (mut manager, counters) = manager(None);
        manager
            .acquire(&spec("python3"), &KernelResources::default(), false)
            .unwrap();
        drop(manager);
        assert_eq!(counters.lock().unwrap().shutdowns, 1);
    }
}
