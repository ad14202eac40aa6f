//! Setup and cleanup cells wrapped around every run.
//!
//! The setup cell configures figure output and prints the dependency manifest
//! read by [`crate::deps`]. Neither cell is ever written to disk.

use crate::document::{Cell, KernelSpec};
use crate::options::ExecutionOptions;

const PYTHON_SETUP: &str = include_str!("../resources/lang/python/setup.py");
const PYTHON_CLEANUP: &str = include_str!("../resources/lang/python/cleanup.py");

/// Source of the setup cell for a kernel. Empty for languages without a template.
pub fn setup_source(spec: &KernelSpec, options: &ExecutionOptions) -> String {
    match spec.language.as_str() {
        "python" => PYTHON_SETUP
            .replace("{fig_width}", &options.fig_width.to_string())
            .replace("{fig_height}", &options.fig_height.to_string())
            .replace("{fig_format}", &options.fig_format)
            .replace("{fig_dpi}", &options.fig_dpi.to_string()),
        _ => String::new(),
    }
}

/// Source of the cleanup cell for a kernel.
pub fn cleanup_source(spec: &KernelSpec) -> String {
    match spec.language.as_str() {
        "python" => PYTHON_CLEANUP.to_string(),
        _ => String::new(),
    }
}

pub fn setup_cell(spec: &KernelSpec, options: &ExecutionOptions) -> Cell {
    Cell::code(setup_source(spec, options))
}

pub fn cleanup_cell(spec: &KernelSpec) -> Cell {
    Cell::code(cleanup_source(spec))
}
