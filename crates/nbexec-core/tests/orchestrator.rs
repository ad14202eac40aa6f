//! Integration tests for the execution orchestrator.
//!
//! Runs real notebooks on disk against a scripted in-memory kernel.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use nbexec_core::document::{Cell, KernelSpec, Notebook, Output};
use nbexec_core::kernel::{ExecuteReply, KernelClient, KernelFault, KernelLauncher, KernelResources};
use nbexec_core::options::{CacheMode, ExecuteRequest};
use nbexec_core::orchestrator::{Collaborators, Orchestrator, RestartReason, RunOutcome};
use nbexec_core::{Error, Result};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

// =============================================================================
// Scripted kernel
// =============================================================================

#[derive(Default)]
struct KernelLog {
    launches: Vec<String>,
    executed: Vec<String>,
    /// Manifest printed by the python setup cell.
    manifest: Option<Value>,
    resources: Vec<KernelResources>,
}

impl KernelLog {
    fn user_cells(&self) -> Vec<&str> {
        self.executed
            .iter()
            .map(String::as_str)
            .filter(|code| !code.starts_with("# nbexec"))
            .collect()
    }
}

struct ScriptedKernel {
    log: Arc<Mutex<KernelLog>>,
}

impl KernelClient for ScriptedKernel {
    fn kernel_info(&mut self) -> Result<Value> {
        Ok(json!({ "name": "python", "version": "3.12.1" }))
    }

    fn execute(&mut self, code: &str, _store_history: bool, _count: u32) -> Result<ExecuteReply> {
        let mut log = self.log.lock().unwrap();
        log.executed.push(code.to_string());

        if code.starts_with("# nbexec setup") {
            let outputs = match &log.manifest {
                Some(manifest) => vec![Output::stream("stdout", &format!("{}\n", manifest))],
                None => vec![],
            };
            return Ok(ExecuteReply {
                outputs,
                error: None,
            });
        }
        if code.starts_with("raise") {
            return Ok(ExecuteReply {
                outputs: vec![],
                error: Some(KernelFault {
                    ename: "ValueError".to_string(),
                    evalue: "boom".to_string(),
                    traceback: vec!["Traceback (most recent call last):".to_string()],
                }),
            });
        }
        let result = match code {
            "1+1" => "2".to_string(),
            other => other.to_string(),
        };
        Ok(ExecuteReply {
            outputs: vec![Output::text_result(&result)],
            error: None,
        })
    }

    fn widget_state(&mut self) -> Result<Option<Value>> {
        Ok(None)
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ScriptedLauncher {
    log: Arc<Mutex<KernelLog>>,
}

impl KernelLauncher for ScriptedLauncher {
    fn launch(
        &self,
        spec: &KernelSpec,
        resources: &KernelResources,
    ) -> Result<Box<dyn KernelClient>> {
        let mut log = self.log.lock().unwrap();
        log.launches.push(spec.name.clone());
        log.resources.push(resources.clone());
        Ok(Box::new(ScriptedKernel {
            log: self.log.clone(),
        }))
    }
}

fn orchestrator(collaborators: Collaborators) -> (Orchestrator, Arc<Mutex<KernelLog>>) {
    let log = Arc::new(Mutex::new(KernelLog {
        manifest: Some(json!({ "/lib/util.py": 1.0 })),
        ..KernelLog::default()
    }));
    let launcher = ScriptedLauncher { log: log.clone() };
    (Orchestrator::new(Box::new(launcher), collaborators), log)
}

// =============================================================================
// Test Helpers
// =============================================================================

struct TestNotebook {
    _dir: TempDir,
    path: PathBuf,
}

impl TestNotebook {
    fn new(kernel: &str, language: &str, cells: Vec<Cell>) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.ipynb");
        let mut notebook = Notebook::new(&KernelSpec {
            name: kernel.to_string(),
            language: language.to_string(),
            display_name: None,
        });
        notebook.cells = cells;
        notebook.write(&path).unwrap();
        Self { _dir: dir, path }
    }

    fn python(cells: Vec<Cell>) -> Self {
        Self::new("python3", "python", cells)
    }

    fn read(&self) -> Notebook {
        Notebook::read(&self.path).unwrap()
    }

    fn raw(&self) -> String {
        fs::read_to_string(&self.path).unwrap()
    }

    fn request(&self) -> ExecuteRequest {
        ExecuteRequest::new(&self.path)
    }
}

fn tagged(source: &str, tags: &[&str]) -> Cell {
    let mut cell = Cell::code(source);
    cell.set_tags(tags.iter().map(|t| t.to_string()).collect());
    cell
}

fn run(
    orchestrator: &mut Orchestrator,
    request: &ExecuteRequest,
) -> (Result<RunOutcome>, Vec<String>) {
    let mut status = Vec::new();
    let outcome = orchestrator.execute(request, &mut |line| status.push(line.to_string()));
    (outcome, status)
}

fn params(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_single_cell_run() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());

    let (outcome, status) = run(&mut orch, &nb.request());

    assert_eq!(outcome.unwrap(), RunOutcome::Completed { persist: true });
    let written = nb.read();
    assert_eq!(written.cells.len(), 1);
    assert_eq!(written.cells[0].execution_count, Some(1));
    assert_eq!(written.cells[0].outputs.len(), 1);
    match &written.cells[0].outputs[0] {
        Output::ExecuteResult {
            execution_count,
            data,
            ..
        } => {
            assert_eq!(*execution_count, Some(1));
            assert_eq!(data["text/plain"], json!("2"));
        }
        other => panic!("unexpected output {:?}", other),
    }
    assert!(!nb.raw().contains("nbexec setup"));
    assert!(!nb.raw().contains("nbexec cleanup"));
    assert!(nb.raw().ends_with("}\n"));
    assert!(!nb.raw().ends_with("\n\n"));
    assert_eq!(written.metadata["language_info"]["name"], json!("python"));

    assert_eq!(
        status,
        vec![
            "\nExecuting 'doc.ipynb'\n".to_string(),
            "  Cell 1/1...".to_string(),
            "Done\n".to_string(),
            "\n".to_string(),
        ]
    );

    let log = log.lock().unwrap();
    assert!(log.executed[0].starts_with("# nbexec setup"));
    assert_eq!(log.executed[1], "1+1");
    assert!(log.executed[2].starts_with("# nbexec cleanup"));
}

#[test]
fn test_kernel_environment() {
    let nb = TestNotebook::python(vec![Cell::code("x")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());

    run(&mut orch, &nb.request()).0.unwrap();

    let log = log.lock().unwrap();
    let resources = &log.resources[0];
    assert_eq!(resources.cwd.as_deref(), nb.path.parent());
    assert!(
        resources
            .env
            .contains(&("JUPYTER_FIG_WIDTH".to_string(), "7".to_string()))
    );
    assert!(
        resources
            .env
            .contains(&("JUPYTER_FIG_HEIGHT".to_string(), "5".to_string()))
    );
}

#[test]
fn test_cache_hit_skips_execution() {
    let nb = TestNotebook::python(vec![Cell::markdown("# Title"), Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());
    let mut request = nb.request();
    request.format.execution.cache = CacheMode::On;

    let (first, _) = run(&mut orch, &request);
    first.unwrap();
    let after_first = nb.raw();
    let executed = log.lock().unwrap().executed.len();

    let (second, status) = run(&mut orch, &request);

    assert_eq!(second.unwrap(), RunOutcome::Completed { persist: false });
    assert_eq!(status, vec!["(Notebook read from cache)\n\n".to_string()]);
    assert_eq!(log.lock().unwrap().executed.len(), executed);
    assert_eq!(nb.raw(), after_first);
    assert!(nb.path.parent().unwrap().join(".jupyter_cache").is_dir());
}

#[test]
fn test_user_cache_value_reads_cache() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());
    let request: ExecuteRequest = serde_json::from_value(json!({
        "target": { "input": nb.path },
        "format": { "execution": {
            "allow-errors": false,
            "fig-width": 7,
            "fig-height": 5,
            "fig-format": "png",
            "fig-dpi": 96,
            "cache": "user"
        }}
    }))
    .unwrap();

    run(&mut orch, &request).0.unwrap();
    let executed = log.lock().unwrap().executed.len();
    let (_, status) = run(&mut orch, &request);

    assert_eq!(log.lock().unwrap().executed.len(), executed);
    assert!(status.contains(&"(Notebook read from cache)\n\n".to_string()));
}

#[test]
fn test_refresh_executes_and_stores() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());
    let mut request = nb.request();
    request.format.execution.cache = CacheMode::Refresh;

    run(&mut orch, &request).0.unwrap();
    run(&mut orch, &request).0.unwrap();
    assert_eq!(log.lock().unwrap().user_cells(), vec!["1+1", "1+1"]);

    request.format.execution.cache = CacheMode::On;
    let (_, status) = run(&mut orch, &request);
    assert_eq!(status, vec!["(Notebook read from cache)\n\n".to_string()]);
}

#[test]
fn test_kernel_mismatch_requires_restart() {
    let python = TestNotebook::python(vec![Cell::code("1+1")]);
    let r = TestNotebook::new("ir", "R", vec![Cell::code("print(1)")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());

    run(&mut orch, &python.request()).0.unwrap();
    let executed = log.lock().unwrap().executed.len();
    let before = r.raw();

    let (outcome, status) = run(&mut orch, &r.request());

    assert_eq!(
        outcome.unwrap(),
        RunOutcome::RestartRequired(RestartReason::KernelMismatch {
            current: "python3".to_string(),
            requested: "ir".to_string(),
        })
    );
    assert!(status.is_empty());
    assert_eq!(log.lock().unwrap().executed.len(), executed);
    assert_eq!(log.lock().unwrap().launches, vec!["python3".to_string()]);
    assert_eq!(r.raw(), before);
    assert_eq!(orch.session().unwrap().spec().name, "python3");
}

#[test]
fn test_dependency_change_requires_restart() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());

    run(&mut orch, &nb.request()).0.unwrap();
    let before = nb.raw();
    let executed = {
        let mut log = log.lock().unwrap();
        log.manifest = Some(json!({ "/lib/util.py": 2.0 }));
        log.executed.len()
    };

    let (outcome, status) = run(&mut orch, &nb.request());

    match outcome.unwrap() {
        RunOutcome::RestartRequired(RestartReason::DependencyChanged(stale)) => {
            assert_eq!(stale.path, "/lib/util.py");
            assert_eq!(stale.previous, json!(1.0));
            assert_eq!(stale.current, json!(2.0));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let log = log.lock().unwrap();
    assert_eq!(log.executed.len(), executed + 1);
    assert!(log.executed[executed].starts_with("# nbexec setup"));
    assert!(status.is_empty());
    assert_eq!(nb.raw(), before);
}

#[test]
fn test_new_dependency_keeps_session() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());

    run(&mut orch, &nb.request()).0.unwrap();
    log.lock().unwrap().manifest = Some(json!({ "/lib/util.py": 1.0, "/lib/new.py": 5.0 }));

    let (outcome, _) = run(&mut orch, &nb.request());
    assert_eq!(outcome.unwrap(), RunOutcome::Completed { persist: true });
    assert_eq!(log.lock().unwrap().launches.len(), 1);
}

#[test]
fn test_untracked_language_does_not_persist() {
    let nb = TestNotebook::new("ir", "R", vec![Cell::code("x <- 1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());

    let (outcome, _) = run(&mut orch, &nb.request());

    assert_eq!(outcome.unwrap(), RunOutcome::Completed { persist: false });
    assert_eq!(log.lock().unwrap().executed, vec!["x <- 1".to_string()]);
}

#[test]
fn test_parameters_injected_after_parameters_cell() {
    let nb = TestNotebook::python(vec![
        Cell::markdown("intro"),
        tagged("x = 1", &["parameters"]),
        Cell::code("x"),
    ]);
    let (mut orch, log) = orchestrator(Collaborators::detect());
    let mut request = nb.request();
    request.params = params(json!({ "x": 5 }));

    run(&mut orch, &request).0.unwrap();

    let written = nb.read();
    assert_eq!(written.cells.len(), 4);
    let injected = &written.cells[2];
    assert!(injected.has_tag("injected-parameters"));
    assert!(injected.source.contains("x = 5"));
    assert_eq!(written.metadata["papermill"]["parameters"], json!({ "x": 5 }));
    assert_eq!(
        log.lock().unwrap().user_cells(),
        vec!["x = 1", injected.source.as_str(), "x"]
    );
}

#[test]
fn test_parameters_injected_once() {
    let nb = TestNotebook::python(vec![tagged("x = 1", &["parameters"]), Cell::code("x")]);
    let (mut orch, _log) = orchestrator(Collaborators::detect());
    let mut request = nb.request();
    request.params = params(json!({ "x": 5 }));
    run(&mut orch, &request).0.unwrap();

    request.params = params(json!({ "x": 6 }));
    run(&mut orch, &request).0.unwrap();

    let written = nb.read();
    let injected: Vec<&Cell> = written
        .cells
        .iter()
        .filter(|c| c.has_tag("injected-parameters"))
        .collect();
    assert_eq!(injected.len(), 1);
    assert!(injected[0].source.contains("x = 6"));
}

// =============================================================================
// Cell handling
// =============================================================================

#[test]
fn test_markdown_only_notebook_unchanged() {
    let cells = vec![Cell::markdown("# Title"), Cell::markdown("Some *text*.")];
    let nb = TestNotebook::python(cells.clone());
    let (mut orch, _log) = orchestrator(Collaborators::detect());

    run(&mut orch, &nb.request()).0.unwrap();

    let written = nb.read();
    assert_eq!(written.cells, cells);
    assert!(!nb.raw().contains("execution_count"));
    assert!(!nb.raw().contains("outputs"));
}

#[test]
fn test_no_execute_cell_untouched() {
    let mut frozen = tagged("expensive()", &["no-execute"]);
    frozen.execution_count = Some(42);
    frozen.outputs.push(Output::text_result("old result"));
    let nb = TestNotebook::python(vec![frozen.clone(), Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::detect());

    for _ in 0..3 {
        run(&mut orch, &nb.request()).0.unwrap();
        assert_eq!(nb.read().cells[0], frozen);
    }
    assert!(!log.lock().unwrap().executed.contains(&"expensive()".to_string()));
}

#[test]
fn test_allow_errors_tag_restores_tags() {
    let nb = TestNotebook::python(vec![
        tagged("raise ValueError('boom')", &["allow-errors", "slow"]),
        Cell::code("1+1"),
    ]);
    let (mut orch, _log) = orchestrator(Collaborators::detect());

    let (outcome, _) = run(&mut orch, &nb.request());

    outcome.unwrap();
    let written = nb.read();
    assert_eq!(written.cells[0].tags(), vec!["allow-errors", "slow"]);
    assert!(
        written.cells[0]
            .outputs
            .iter()
            .any(|o| matches!(o, Output::Error { ename, .. } if ename == "ValueError"))
    );
    assert_eq!(written.cells[1].execution_count, Some(2));
}

#[test]
fn test_cell_error_fails_without_writing() {
    let nb = TestNotebook::python(vec![Cell::code("raise ValueError('boom')")]);
    let (mut orch, _log) = orchestrator(Collaborators::detect());
    let before = nb.raw();

    let (outcome, _) = run(&mut orch, &nb.request());

    match outcome {
        Err(Error::Execution(message)) => {
            assert!(message.contains("raise ValueError('boom')"));
            assert!(message.contains("ValueError: boom"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(nb.raw(), before);
}

#[test]
fn test_allow_errors_option_tolerates_errors() {
    let nb = TestNotebook::python(vec![Cell::code("raise ValueError('boom')"), Cell::code("1+1")]);
    let (mut orch, _log) = orchestrator(Collaborators::detect());
    let mut request = nb.request();
    request.format.execution.allow_errors = true;

    run(&mut orch, &request).0.unwrap();
    assert_eq!(nb.read().cells[1].execution_count, Some(2));
}

#[test]
fn test_lines_to_next_cell_normalized() {
    let mut cell = Cell::code("1+1");
    cell.metadata.insert("lines_to_next_cell".to_string(), json!(0));
    let nb = TestNotebook::python(vec![cell]);
    let (mut orch, _log) = orchestrator(Collaborators::detect());

    run(&mut orch, &nb.request()).0.unwrap();
    assert_eq!(nb.read().cells[0].metadata["lines_to_next_cell"], json!(1));
}

#[test]
fn test_quiet_suppresses_status() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, _log) = orchestrator(Collaborators::detect());
    let mut request = nb.request();
    request.quiet = true;

    let (outcome, status) = run(&mut orch, &request);
    outcome.unwrap();
    assert!(status.is_empty());
}

// =============================================================================
// Missing collaborators
// =============================================================================

#[test]
fn test_cache_without_provider_fails() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, log) = orchestrator(Collaborators::default());
    let mut request = nb.request();
    request.format.execution.cache = CacheMode::On;

    let (outcome, _) = run(&mut orch, &request);

    assert!(matches!(outcome, Err(Error::MissingCollaborator(_))));
    assert!(log.lock().unwrap().launches.is_empty());
}

#[test]
fn test_params_without_translator_fails() {
    let nb = TestNotebook::python(vec![Cell::code("1+1")]);
    let (mut orch, _log) = orchestrator(Collaborators::default());
    let mut request = nb.request();
    request.params = params(json!({ "x": 1 }));

    let (outcome, _) = run(&mut orch, &request);
    assert!(matches!(outcome, Err(Error::MissingCollaborator(_))));
}

#[test]
fn test_missing_notebook_fails() {
    let dir = TempDir::new().unwrap();
    let (mut orch, _log) = orchestrator(Collaborators::detect());

    let (outcome, _) = run(&mut orch, &ExecuteRequest::new(dir.path().join("nope.ipynb")));
    assert!(matches!(outcome, Err(Error::Io { .. })));
}
