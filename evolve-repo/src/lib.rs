//! The `evolve` repository engine.
//!
//! A repository is a directory tree whose nodes are projects (organizational
//! containers), releases (versioned build outputs) and rlinks (named,
//! repointable links to a chosen release). Every node directory carries a
//! serialized [`Descriptor`]; concurrent mutation of a directory is
//! coordinated across processes with a per-directory advisory [`DirLock`];
//! the [`Repository`] façade validates paths and hierarchy rules and performs
//! locked, all-or-nothing mutations over the tree.
//!
//! The filesystem is the sole source of truth: every operation re-reads
//! descriptors from disk, and no tree state is cached between calls.
#![warn(missing_docs)]

use camino::Utf8PathBuf;

mod descriptor;
mod lock;
mod repository;
mod sync;

pub use self::{
    descriptor::{
        format_timestamp, Descriptor, HistoryEntry, Node, NodeType, DESCRIPTOR_FILE,
    },
    lock::{DirLock, LOCK_FILE},
    repository::Repository,
};

/// Errors arising from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Invalid input: a bad name or path, a target of the wrong node type, a
    /// hierarchy rule rejection, or a redundant operation. Raised before any
    /// mutation begins; the repository is unchanged.
    #[error("{0}")]
    Argument(String),

    /// Another holder currently owns the directory lock for this path. The
    /// operation performed no partial mutation and may be retried later.
    #[error("directory at [{0}] is locked")]
    LockBusy(Utf8PathBuf),

    /// Underlying filesystem failure. Rollback of any partially created
    /// subtree is attempted before this surfaces.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A descriptor could not be serialized.
    #[error("failed to write descriptor: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A descriptor file was absent or corrupt.
    #[error("failed to read descriptor: {0}")]
    Deserialize(#[from] toml::de::Error),
}

impl From<nix::Error> for RepoError {
    fn from(err: nix::Error) -> Self {
        RepoError::Io(std::io::Error::from_raw_os_error(err as i32))
    }
}

/// Result type used throughout the engine.
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

pub(crate) fn argument(message: impl Into<String>) -> RepoError {
    RepoError::Argument(message.into())
}
