//! Parameter injection.
//!
//! Request parameters become an `injected-parameters` code cell written in
//! the notebook's language. Placement follows the papermill convention:
//!
//! 1. an existing `injected-parameters` cell is replaced in place;
//! 2. otherwise the cell goes right after the `parameters` cell, inheriting
//!    that cell's other tags;
//! 3. otherwise it goes to the top of the notebook.

mod translate;

pub use translate::{LanguageTranslator, ParameterTranslator};

use serde_json::{Map, Value};

use crate::document::{Cell, Notebook};
use crate::error::Result;

/// Tag marking the cell that declares a notebook's default parameters.
pub const PARAMETERS_TAG: &str = "parameters";

/// Tag marking the generated parameter override cell.
pub const INJECTED_PARAMETERS_TAG: &str = "injected-parameters";

/// Comment placed at the top of generated parameter cells.
pub const INJECTED_PARAMETERS_COMMENT: &str = "Injected Parameters";

/// Metadata key under which the raw parameters are recorded.
const PROVENANCE_KEY: &str = "papermill";

/// Insert or replace the injected parameters cell.
pub fn inject_parameters(
    notebook: &mut Notebook,
    params: &Map<String, Value>,
    translator: &dyn ParameterTranslator,
) -> Result<()> {
    let spec = notebook.kernelspec()?;
    let source = translator.translate(&spec.name, &spec.language, params)?;

    let params_index = notebook.find_tagged(PARAMETERS_TAG);
    let mut tags = vec![INJECTED_PARAMETERS_TAG.to_string()];
    if let Some(index) = params_index {
        tags.extend(
            notebook.cells[index]
                .tags()
                .into_iter()
                .filter(|t| t != PARAMETERS_TAG),
        );
    }

    let mut cell = Cell::code(source);
    if notebook.uses_cell_ids() {
        cell = cell.with_generated_id();
    }
    cell.set_tags(tags);

    match (notebook.find_tagged(INJECTED_PARAMETERS_TAG), params_index) {
        (Some(index), _) => {
            tracing::debug!("Replacing injected parameters cell at {}", index);
            notebook.cells[index] = cell;
        }
        (None, Some(index)) => {
            tracing::debug!("Injecting parameters after cell {}", index);
            notebook.cells.insert(index + 1, cell);
        }
        (None, None) => {
            tracing::debug!("Injecting parameters at top of notebook");
            notebook.cells.insert(0, cell);
        }
    }

    record_provenance(notebook, params);
    Ok(())
}

fn record_provenance(notebook: &mut Notebook, params: &Map<String, Value>) {
    let entry = notebook
        .metadata
        .entry(PROVENANCE_KEY.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(provenance) = entry {
        provenance.insert("parameters".to_string(), Value::Object(params.clone()));
    }
}
