use std::io;

/// Errors reported by session, content model and change log operations.
///
/// `NothingToUndo` and `NothingToRedo` are ordinary steady states rather than
/// failures; `InvalidHandle` is a caller bug.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("offset {offset} is outside the content (length {length})")]
    InvalidOffset { offset: u64, length: u64 },

    #[error("range {offset}+{len} extends past the content (length {length})")]
    RangeOutOfBounds { offset: u64, len: u64, length: u64 },

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("handle does not refer to a live viewport or search context")]
    InvalidHandle,

    #[error("failed to read from byte source: {0}")]
    SourceRead(#[from] io::Error),

    #[error("edit has zero length and would not change anything")]
    EmptyEdit,

    #[error("changes to this session are paused")]
    ChangesPaused,

    #[error("viewport capacity {capacity} must be between 1 and {max}")]
    InvalidCapacity { capacity: u64, max: u64 },

    #[error("search pattern is empty")]
    EmptyPattern,

    #[error("search pattern of {len} bytes exceeds the limit of {max}")]
    PatternTooLong { len: usize, max: usize },

    #[error("transaction error: {0}")]
    TransactionState(&'static str),
}

impl EditError {
    /// True for the "nothing happened" outcomes of undo/redo.
    pub fn is_steady_state(&self) -> bool {
        matches!(self, Self::NothingToUndo | Self::NothingToRedo)
    }
}

pub type Result<T> = std::result::Result<T, EditError>;
