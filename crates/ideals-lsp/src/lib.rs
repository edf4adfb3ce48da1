//! The ideals language server.
//!
//! The heart of this crate is the per-resource diagnostics machinery in [`diagnostics`]:
//! one debounced analysis session per document, superseded by every edit, with a quick-fix
//! registry that is only ever answered from the current session. Every other
//! protocol-facing operation goes through the [`Command`] / [`CommandRunner`] contract.

mod cancellation;
mod client;
mod code_action;
mod command;
pub mod diagnostics;
mod formatting;
mod progress;
mod quick_fix;
mod references;
mod rename;
mod server;
mod to_lsp;

pub use cancellation::{cancel_id_from_request_id, RequestCancellation};
pub use client::{LanguageClient, LspClient};
pub use code_action::{quick_fix_actions, ActionData, ResolveCodeActionCommand};
pub use command::{Command, CommandError, CommandRunner, CommandTask, ExecutionContext};
pub use diagnostics::{DiagnosticsService, SessionState};
pub use formatting::FormattingCommand;
pub use quick_fix::QuickFixRegistry;
pub use references::{DocumentHighlightCommand, ReferencesCommand};
pub use rename::RenameCommand;
pub use server::{serve, server_capabilities};
