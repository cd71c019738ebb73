//! A simulated, in-memory UNIX-style filesystem: a superblock/inode/bitmap
//! disk manager, a directory layer with path resolution and symlinks, a file
//! layer with hard/soft links, growth/truncation and optional
//! encryption/compression, owner/group/other permissions, and simple
//! password-based auth and sessions. Everything lives in memory and is
//! persisted, whole, to a single image file.
//!
//! [`System`] is the one object a caller needs: it owns the disk manager,
//! the account directory, and the single active session, and exposes every
//! core operation as a method.

pub mod auth;
pub mod dir;
pub mod disk;
pub mod error;
pub mod file;
pub mod model;
pub mod perm;
pub mod persistence;
pub mod system;

pub use auth::{Auth, Session};
pub use disk::{DiskManager, FormatOptions};
pub use error::{FsError, FsResult, WriteOutcome};
pub use model::{FileType, Inode, OpenMode, Permission};
pub use system::System;
