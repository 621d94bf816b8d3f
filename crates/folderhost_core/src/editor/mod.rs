//! Live text editing of open files.

mod engine;
mod ops;

use std::path::PathBuf;

use thiserror::Error;

use crate::error::ErrorClass;

pub use engine::EditEngine;
pub use ops::{EditKind, EditOperation, EditRange, MAX_EDITABLE_SIZE, apply_edit};

#[derive(Debug, Error)]
pub enum EditError {
    #[error("line number out of range: {0}")]
    LineOutOfRange(i64),

    #[error("line numbers out of range: {start}-{end}")]
    RangeOutOfBounds { start: i64, end: i64 },

    #[error("invalid range: start is after end")]
    InvalidRange,

    #[error("file size exceeds 200 KB: {0} bytes")]
    TooLarge(usize),

    #[error("file is not open for editing: {0:?}")]
    NotWatched(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EditError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EditError::Read { .. } | EditError::Write { .. } => ErrorClass::TransientIo,
            _ => ErrorClass::Validation,
        }
    }
}
