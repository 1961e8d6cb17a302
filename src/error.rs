//! Error handling for survey reduction.
//!
//! Two classes of failure propagate through `Result`: fatal I/O errors that
//! abort the whole run, and the per-line recovery signal raised by field and
//! reducer errors. The recovery signal is caught once per file-processing
//! loop, which discards the rest of the current line and resumes at the next
//! one; it never crosses a file boundary. Warnings and most data errors are
//! rendered by the diagnostic reporter and do not surface here at all.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReduceError>;

#[derive(Error, Debug)]
pub enum ReduceError {
    /// Unreadable input. Fatal: aborts the entire run, unwinding every
    /// pushed include and settings frame.
    #[error("error reading file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recoverable parse or reduction error. The diagnostic has already
    /// been reported; the catcher skips to the next line and continues.
    #[error("line discarded after error")]
    SkipLine,
}

impl ReduceError {
    /// Create an I/O error with the offending path attached.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True if this error aborts the run rather than just the current line.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SkipLine)
    }
}
