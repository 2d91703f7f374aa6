//! Outline document access and task-tree extraction.
//!
//! The outline holds one page per month and one toggle section per day.
//! This module exposes the read-only capability the supervisor needs
//! (`NoteSource`), a Notion implementation, and the extractor that turns a
//! day's section into a [`TaskNode`] tree.

mod notion;
mod tree;

pub use notion::NotionClient;
pub use tree::{clean_marker_text, extract_today, TaskNode, DONE_MARKER, STATUS_MARKERS};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the note source.
#[derive(Debug, Error)]
pub enum NotesError {
    #[error("no outline page configured for month {0}")]
    PageNotConfigured(String),

    #[error("block {0} not found")]
    NotFound(String),

    #[error("note source returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("note source request failed: {0}")]
    Network(String),

    #[error("failed to parse note source response: {0}")]
    Parse(String),
}

/// One block of the outline, reduced to what the extractor needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// Collapsible section with nested children
    Toggle { text: String },
    /// Checkable item
    ToDo { text: String, checked: bool },
    /// Free text (paragraphs, list items, quotes)
    Text { text: String },
    /// Anything else; ignored by the extractor
    Unsupported(String),
}

impl Block {
    pub fn toggle(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::Toggle { text: text.into() },
        }
    }

    pub fn to_do(id: impl Into<String>, text: impl Into<String>, checked: bool) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::ToDo {
                text: text.into(),
                checked,
            },
        }
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::Text { text: text.into() },
        }
    }
}

/// Read-only access to the outline document.
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// List the direct children of a block (or page), in document order.
    async fn list_children(&self, block_id: &str) -> Result<Vec<Block>, NotesError>;

    /// Retrieve a single block by id.
    async fn retrieve_block(&self, block_id: &str) -> Result<Block, NotesError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// In-memory outline keyed by parent id.
    #[derive(Default)]
    pub struct FakeNotes {
        pub children: HashMap<String, Vec<Block>>,
        pub offline: AtomicBool,
    }

    impl FakeNotes {
        pub fn with(mut self, parent: &str, blocks: Vec<Block>) -> Self {
            self.children.insert(parent.to_string(), blocks);
            self
        }

        pub fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl NoteSource for FakeNotes {
        async fn list_children(&self, block_id: &str) -> Result<Vec<Block>, NotesError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(NotesError::Network("connection refused".to_string()));
            }
            Ok(self.children.get(block_id).cloned().unwrap_or_default())
        }

        async fn retrieve_block(&self, block_id: &str) -> Result<Block, NotesError> {
            self.children
                .values()
                .flatten()
                .find(|b| b.id == block_id)
                .cloned()
                .ok_or_else(|| NotesError::NotFound(block_id.to_string()))
        }
    }
}
