//! Error handling for gcodestat
//!
//! Provides error types for the two fallible stages of a processing run:
//! - Processing errors (reading the input, cooperative cancellation)
//! - Post-process errors (rewriting the annotated output file)
//!
//! Malformed G-code is never an error: the processor skips such lines.
//! Every enum derives `thiserror::Error`.

use std::path::PathBuf;
use thiserror::Error;

/// Processing error type
///
/// Represents failures of the main streaming pass over a G-code file.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The caller-supplied cancellation callback requested a stop
    #[error("Processing cancelled")]
    Cancelled,

    /// The input file does not exist or is not a regular file
    #[error("G-code file not found: {path}")]
    FileNotFound {
        /// The path that was requested.
        path: PathBuf,
    },

    /// The input file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Post-process error type
///
/// Represents failures while rewriting placeholder lines of an already
/// written G-code file. The target file is left untouched in every case.
#[derive(Error, Debug)]
pub enum PostProcessError {
    /// The file to annotate could not be opened
    #[error("Failed to open {path} for annotation: {source}")]
    Open {
        /// The file being annotated.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The temporary output file could not be created
    #[error("Failed to create temporary file next to {path}: {source}")]
    TempFile {
        /// The file being annotated.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading the source or writing the temporary copy failed
    #[error("Failed to write annotated copy of {path}: {source}")]
    Write {
        /// The file being annotated.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The temporary copy could not replace the original file
    #[error("Failed to replace {path} with annotated copy: {source}")]
    Persist {
        /// The file being annotated.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl PostProcessError {
    /// Path of the file the failed annotation targeted
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Open { path, .. }
            | Self::TempFile { path, .. }
            | Self::Write { path, .. }
            | Self::Persist { path, .. } => path,
        }
    }
}

/// Main error type for gcodestat
///
/// Error returned by the processor's public API
#[derive(Error, Debug)]
pub enum Error {
    /// Processing error
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Post-process error
    #[error(transparent)]
    PostProcess(#[from] PostProcessError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a free-form message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this error is a user cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Process(ProcessError::Cancelled))
    }

    /// Check if this error came from the post-process step
    pub fn is_post_process_error(&self) -> bool {
        matches!(self, Error::PostProcess(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
