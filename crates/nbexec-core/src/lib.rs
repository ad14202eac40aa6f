//! Core of the nbexec notebook execution coordinator.
//!
//! This crate provides:
//! - nbformat v4 document model with canonical serialization
//! - Kernel session management and the process kernel bridge
//! - Execution cache with an on-disk store
//! - Dependency tracking for warm kernels
//! - Parameter injection
//! - The execution orchestrator tying it together

pub mod cache;
pub mod deps;
pub mod document;
pub mod error;
pub mod instrument;
pub mod kernel;
pub mod options;
pub mod orchestrator;
pub mod params;

pub use cache::{
    CacheAdapter, CacheBundle, CacheProvider, CacheStore, FileCacheProvider, FileCacheStore,
};
pub use deps::{DependencyManifest, DependencyTracking, StaleDependency};
pub use document::{Cell, CellType, KernelSpec, Notebook, Output};
pub use error::{Error, Result};
pub use kernel::{
    ExecuteReply, KernelClient, KernelFault, KernelLauncher, KernelRegistry, KernelResources,
    KernelSession, KernelSessionManager, ProcessKernel, ProcessLauncher,
};
pub use options::{CacheMode, ExecuteRequest, ExecutionOptions};
pub use orchestrator::{Collaborators, Orchestrator, RestartReason, RunOutcome};
pub use params::{LanguageTranslator, ParameterTranslator, inject_parameters};
