//! Durable session store.
//!
//! Append-oriented persistence for sentences, summaries, and session
//! metadata. Every write atomically replaces its target file via a temp
//! file + rename on the same filesystem, so a crash between any two appends
//! leaves the previous snapshot intact and parseable.

pub mod paths;
pub mod store;

pub use paths::resolve_root;
pub use store::{SessionStore, StartSessionParams};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("no active session")]
    NoActiveSession,

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid session date: {0}")]
    InvalidDate(String),
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl From<StoreError> for univoice_core::Error {
    fn from(err: StoreError) -> Self {
        univoice_core::Error::PersistenceFailed(err.to_string())
    }
}
