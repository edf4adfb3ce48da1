//! Collaborator interfaces of the ideals core and their in-tree implementations.
//!
//! The language server never analyzes text itself. It talks to:
//! - an [`AnalysisEngine`], which produces [`Finding`]s for a resource and owns the
//!   [`ModelLock`] every access must hold,
//! - a [`Workspace`], which resolves an [`ideals_core::LspPath`] to its current
//!   [`ResourceState`].
//!
//! [`MemoryWorkspace`] and [`PlainTextEngine`] are small real implementations used by the
//! `ideals-lsp` binary.

mod document;
mod engine;
mod plain;
mod workspace;

pub use document::{ContentChange, Document, DocumentError, TextSnapshot};
pub use engine::{
    AnalysisEngine, AnalysisProgress, EngineError, Finding, Fix, FixDescriptor, FormatOptions,
    ModelLock, Occurrence, Severity,
};
pub use plain::PlainTextEngine;
pub use workspace::{MemoryWorkspace, ResourceState, Workspace};
