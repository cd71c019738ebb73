//! The error taxonomy shared by every core operation.
//!
//! Core functions never panic or print-and-return on failure: they return a
//! [`FsResult`] carrying one of the kinds below plus a message meant for a
//! human at a UI layer.

use thiserror::Error;

/// One of the failure categories a core operation can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Bad name, wrong mode string, out-of-range permission bits, negative read length.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Path, inode, fd or user not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Sibling with the same name, duplicate username, pre-encrypted/compressed file.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// rm on a directory, rmdir on a file, hard-link to a directory.
    #[error("wrong type: {0}")]
    WrongType(String),
    /// Fails the owner/group/other permission check.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Inode bitmap or block bitmap exhausted.
    #[error("no space: {0}")]
    NoSpace(String),
    /// Dangling directory entry, bitmap/table disagreement, unreadable image.
    #[error("corrupt: {0}")]
    Corrupt(String),
    /// Symlink depth exceeded, encoded directory > block_size, filename > 255.
    #[error("limit exceeded: {0}")]
    Limit(String),
    /// Programmer bug: out-of-bounds block id, non-contiguous logical write.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The result type returned by every fallible core operation.
pub type FsResult<T> = Result<T, FsError>;

/// Outcome of a `write` call: writes are never all-or-nothing under a
/// mid-write allocation failure, so callers need the byte count even on
/// the error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Number of bytes actually committed to the file.
    pub bytes_written: usize,
    /// Set when the write stopped short because the disk ran out of space.
    pub out_of_space: bool,
}

impl WriteOutcome {
    /// A write that completed in full.
    pub fn complete(bytes_written: usize) -> Self {
        Self {
            bytes_written,
            out_of_space: false,
        }
    }

    /// A write that stopped early because no more blocks could be allocated.
    pub fn partial(bytes_written: usize) -> Self {
        Self {
            bytes_written,
            out_of_space: true,
        }
    }
}
