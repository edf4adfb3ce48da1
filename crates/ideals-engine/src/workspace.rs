use std::collections::HashMap;

use ideals_core::LspPath;
use parking_lot::RwLock;

use crate::{ContentChange, Document, DocumentError, TextSnapshot};

/// The authoritative state of one resource at the moment it was resolved.
#[derive(Debug, Clone)]
pub struct ResourceState {
    path: LspPath,
    text: Option<TextSnapshot>,
}

impl ResourceState {
    pub fn new(path: LspPath, text: Option<TextSnapshot>) -> Self {
        Self { path, text }
    }

    pub fn path(&self) -> &LspPath {
        &self.path
    }

    /// The text buffer, if the resource has one (binary files do not).
    pub fn text(&self) -> Option<&TextSnapshot> {
        self.text.as_ref()
    }
}

/// Resolves resource identities to their current state.
pub trait Workspace: Send + Sync {
    fn resolve(&self, path: &LspPath) -> Option<ResourceState>;
}

/// Open editor buffers, falling back to the file system for closed `file:` resources.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    documents: RwLock<HashMap<LspPath, Document>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an editor buffer. Reopening replaces the previous buffer.
    pub fn open(&self, path: LspPath, text: impl Into<String>, version: i32) {
        self.documents
            .write()
            .insert(path, Document::new(text, version));
    }

    pub fn change(
        &self,
        path: &LspPath,
        version: i32,
        changes: &[ContentChange],
    ) -> Result<(), DocumentError> {
        let mut documents = self.documents.write();
        let document = documents
            .get_mut(path)
            .ok_or(DocumentError::DocumentNotOpen)?;
        document.apply_changes(version, changes)
    }

    /// Stop tracking the buffer. Returns `false` if it was not open.
    pub fn close(&self, path: &LspPath) -> bool {
        self.documents.write().remove(path).is_some()
    }

    pub fn document_version(&self, path: &LspPath) -> Option<i32> {
        self.documents.read().get(path).map(Document::version)
    }

    pub fn open_paths(&self) -> Vec<LspPath> {
        let mut paths: Vec<_> = self.documents.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn read_from_disk(path: &LspPath) -> Option<ResourceState> {
        let local = path.to_path().ok()?;
        let bytes = std::fs::read(&local).ok()?;
        let text = String::from_utf8(bytes).ok();
        if text.is_none() {
            tracing::debug!(
                target = "ideals.engine",
                path = %path,
                "resource is not valid UTF-8; resolving without text"
            );
        }
        Some(ResourceState::new(
            path.clone(),
            text.map(|text| TextSnapshot::new(text, None)),
        ))
    }
}

impl Workspace for MemoryWorkspace {
    fn resolve(&self, path: &LspPath) -> Option<ResourceState> {
        if let Some(document) = self.documents.read().get(path) {
            return Some(ResourceState::new(path.clone(), Some(document.snapshot())));
        }
        Self::read_from_disk(path)
    }
}
