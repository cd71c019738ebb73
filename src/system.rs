//! The single top-level object a caller constructs once and threads through
//! its whole lifetime: one `DiskManager`, one `Auth`, the image path they
//! persist to, and the session of whoever is currently logged in. No part of
//! this crate reaches for ambient global state instead of going through a
//! `System` — see the "no global singletons" design note in `spec.md` §9.

use std::path::{Path, PathBuf};

use crate::auth::{Auth, Session};
use crate::dir::EntryDetail;
use crate::disk::{DiskManager, FormatOptions};
use crate::error::{FsError, FsResult, WriteOutcome};
use crate::model::OpenMode;
use crate::perm::Operation;
use crate::persistence;

/// Owns the disk, the account directory, and at most one active session —
/// spec.md §5 specifies a single-session, single-threaded scheduling model,
/// so there is exactly one `Option<Session>` here rather than a table of
/// them.
pub struct System {
    disk: DiskManager,
    auth: Auth,
    image_path: PathBuf,
    session: Option<Session>,
}

impl System {
    /// A fresh, unformatted system backed by `image_path` and seeded with
    /// the default `root`/`guest` accounts. Does not touch the filesystem;
    /// call `load_disk_image` afterwards to pick up a prior image if one
    /// exists.
    pub fn new(image_path: impl Into<PathBuf>) -> FsResult<Self> {
        Ok(Self {
            disk: DiskManager::new(),
            auth: Auth::with_default_users()?,
            image_path: image_path.into(),
            session: None,
        })
    }

    /// A fresh system using the default image filename.
    pub fn with_default_image_path() -> FsResult<Self> {
        Self::new(persistence::DEFAULT_IMAGE_PATH)
    }

    pub fn is_formatted(&self) -> bool {
        self.disk.is_formatted()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn require_session(&self) -> FsResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| FsError::PermissionDenied("no user is logged in".into()))
    }

    fn require_session_mut(&mut self) -> FsResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| FsError::PermissionDenied("no user is logged in".into()))
    }

    // -- Disk manager surface (spec.md §6) ----------------------------------

    /// Reinitialises the backing disk. Requires no session (formatting a
    /// blank image is how a deployment bootstraps itself before anyone can
    /// log in).
    pub fn format_disk(&mut self, opts: FormatOptions) -> FsResult<()> {
        self.disk.format(opts)
    }

    pub fn get_inode(&self, inode_id: u32) -> Option<&crate::model::Inode> {
        self.disk.get_inode(inode_id)
    }

    fn root_inode_id(&self) -> FsResult<u32> {
        self.disk
            .superblock()
            .and_then(|sb| sb.root_inode_id)
            .ok_or_else(|| FsError::Internal("disk has no root inode; format it first".into()))
    }

    // -- Auth & session surface ----------------------------------------------

    /// Logs `username` in. Refuses with `AlreadyExists` if a session is
    /// already active — a caller must `logout` first, same as the source's
    /// `UserAuthenticator.login` refusing a second login out from under
    /// whoever is already signed in.
    pub fn login(&mut self, username: &str, password: &str) -> FsResult<()> {
        if let Some(existing) = &self.session {
            return Err(FsError::AlreadyExists(format!(
                "another user '{}' is already logged in",
                existing.username
            )));
        }
        let root = self.root_inode_id()?;
        let session = self.auth.login(username, password, root)?;
        self.session = Some(session);
        Ok(())
    }

    /// Ends the active session, if any. Open file descriptors are simply
    /// dropped along with it — writes are never buffered, so there is
    /// nothing to flush.
    pub fn logout(&mut self) {
        self.session = None;
    }

    pub fn create_user(&mut self, username: &str, password: &str) -> FsResult<u32> {
        self.auth.create_user(username, password, None)
    }

    // -- Directory layer ------------------------------------------------------

    /// Resolves `path` against the active session's cwd.
    pub fn resolve(&self, path: &str) -> FsResult<u32> {
        let session = self.require_session()?;
        let root = self.root_inode_id()?;
        crate::dir::resolve(&self.disk, session.cwd, root, path)
    }

    pub fn make_directory(&mut self, path: &str) -> FsResult<u32> {
        let session = self.require_session()?;
        let (uid, gid) = (session.uid, session.gid);
        let root = self.root_inode_id()?;
        let (parent_path, name) = split_parent_and_name(path)?;
        let parent_id = crate::dir::resolve(&self.disk, session.cwd, root, &parent_path)?;
        crate::dir::make_directory(&mut self.disk, uid, gid, parent_id, &name)
    }

    pub fn remove_directory(&mut self, path: &str) -> FsResult<()> {
        let session = self.require_session()?;
        let (uid, gid) = (session.uid, session.gid);
        let root = self.root_inode_id()?;
        let (parent_path, name) = split_parent_and_name(path)?;
        let parent_id = crate::dir::resolve(&self.disk, session.cwd, root, &parent_path)?;
        crate::dir::remove_directory(&mut self.disk, uid, gid, parent_id, &name)
    }

    pub fn list_directory(&mut self, path: &str) -> FsResult<Vec<EntryDetail>> {
        let inode_id = self.resolve(path)?;
        crate::dir::list(&mut self.disk, inode_id)
    }

    pub fn rename_item(&mut self, path: &str, new_name: &str) -> FsResult<()> {
        let session = self.require_session()?;
        let (uid, gid) = (session.uid, session.gid);
        let root = self.root_inode_id()?;
        let (parent_path, old_name) = split_parent_and_name(path)?;
        let parent_id = crate::dir::resolve(&self.disk, session.cwd, root, &parent_path)?;
        crate::dir::rename(&mut self.disk, uid, gid, parent_id, &old_name, new_name)
    }

    /// Changes the active session's current working directory.
    pub fn change_directory(&mut self, path: &str) -> FsResult<()> {
        let target = self.resolve(path)?;
        let is_dir = self
            .disk
            .get_inode(target)
            .map(|i| i.file_type == crate::model::FileType::Directory)
            .unwrap_or(false);
        if !is_dir {
            return Err(FsError::WrongType(format!("'{path}' is not a directory")));
        }
        self.require_session_mut()?.cwd = target;
        Ok(())
    }

    // -- File layer -----------------------------------------------------------

    pub fn create_file(&mut self, path: &str) -> FsResult<u32> {
        let session = self.require_session()?;
        let (uid, gid) = (session.uid, session.gid);
        let root = self.root_inode_id()?;
        let (parent_path, name) = split_parent_and_name(path)?;
        let parent_id = crate::dir::resolve(&self.disk, session.cwd, root, &parent_path)?;
        crate::file::create_file(&mut self.disk, uid, gid, parent_id, &name)
    }

    pub fn delete_file(&mut self, path: &str) -> FsResult<()> {
        let session = self.require_session()?;
        let (uid, gid) = (session.uid, session.gid);
        let root = self.root_inode_id()?;
        let (parent_path, name) = split_parent_and_name(path)?;
        let parent_id = crate::dir::resolve(&self.disk, session.cwd, root, &parent_path)?;
        crate::file::delete_file(&mut self.disk, uid, gid, parent_id, &name)
    }

    pub fn create_hard_link(&mut self, link_path: &str, target_path: &str) -> FsResult<()> {
        let session = self.require_session()?;
        let (uid, gid) = (session.uid, session.gid);
        let root = self.root_inode_id()?;
        let target_id = crate::dir::resolve(&self.disk, session.cwd, root, target_path)?;
        let (parent_path, name) = split_parent_and_name(link_path)?;
        let parent_id = crate::dir::resolve(&self.disk, session.cwd, root, &parent_path)?;
        crate::file::create_hard_link(&mut self.disk, uid, gid, parent_id, &name, target_id)
    }

    pub fn create_symbolic_link(&mut self, link_path: &str, target: &str) -> FsResult<u32> {
        let session = self.require_session()?;
        let (uid, gid) = (session.uid, session.gid);
        let root = self.root_inode_id()?;
        let (parent_path, name) = split_parent_and_name(link_path)?;
        let parent_id = crate::dir::resolve(&self.disk, session.cwd, root, &parent_path)?;
        crate::file::create_symbolic_link(&mut self.disk, uid, gid, parent_id, &name, target)
    }

    /// Opens `path` (creating it first for write/append modes, per
    /// `file::open`) and binds it to a fresh fd in the active session.
    pub fn open_file(&mut self, path: &str, mode: OpenMode) -> FsResult<u32> {
        let (uid, gid, cwd) = {
            let session = self.require_session()?;
            (session.uid, session.gid, session.cwd)
        };
        let root = self.root_inode_id()?;
        let entry = crate::file::open(&mut self.disk, uid, gid, cwd, root, path, mode)?;
        Ok(self.require_session_mut()?.allocate_fd(entry))
    }

    pub fn close_file(&mut self, fd: u32) -> FsResult<()> {
        self.require_session_mut()?.release_fd(fd)
    }

    pub fn read_file(&mut self, fd: u32, len: usize) -> FsResult<Vec<u8>> {
        let mut entry = *self.require_session()?.get_fd(fd)?;
        let result = crate::file::read(&mut self.disk, &mut entry, len);
        if result.is_ok() {
            *self.require_session_mut()?.get_fd_mut(fd)? = entry;
        }
        result
    }

    pub fn write_file(&mut self, fd: u32, content: &[u8]) -> FsResult<WriteOutcome> {
        let mut entry = *self.require_session()?.get_fd(fd)?;
        let result = crate::file::write(&mut self.disk, &mut entry, content);
        if result.is_ok() {
            *self.require_session_mut()?.get_fd_mut(fd)? = entry;
        }
        result
    }

    pub fn truncate_file(&mut self, path: &str, new_size: u64) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::file::truncate(&mut self.disk, uid, inode_id, new_size)
    }

    pub fn encrypt_file(&mut self, path: &str, password: &str) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::file::encrypt_file(&mut self.disk, uid, inode_id, password)
    }

    pub fn decrypt_file(&mut self, path: &str, password: &str) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::file::decrypt_file(&mut self.disk, uid, inode_id, password)
    }

    pub fn compress_file(&mut self, path: &str, level: u32) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::file::compress_file(&mut self.disk, uid, inode_id, level)
    }

    pub fn decompress_file(&mut self, path: &str) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::file::decompress_file(&mut self.disk, uid, inode_id)
    }

    // -- Permissions ------------------------------------------------------------

    pub fn chmod(&mut self, path: &str, permissions: crate::model::Permission) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::perm::chmod(&mut self.disk, uid, inode_id, permissions)
    }

    pub fn chown(&mut self, path: &str, new_owner_uid: u32) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::perm::chown(&mut self.disk, uid, inode_id, new_owner_uid)
    }

    pub fn chgrp(&mut self, path: &str, new_group_id: u32) -> FsResult<()> {
        let uid = self.require_session()?.uid;
        let inode_id = self.resolve(path)?;
        crate::perm::chgrp(&mut self.disk, uid, inode_id, new_group_id)
    }

    /// Checks whether the active session may perform `op` on `path`,
    /// without attempting it. Useful for a UI that wants to grey out an
    /// action rather than let the user trigger a `PermissionDenied`.
    pub fn may(&self, path: &str, op: Operation) -> FsResult<bool> {
        let session = self.require_session()?;
        let inode_id = self.resolve(path)?;
        let inode = self
            .disk
            .get_inode(inode_id)
            .ok_or_else(|| FsError::NotFound(format!("inode {inode_id}")))?;
        Ok(crate::perm::check(inode, session.uid, session.gid, op))
    }

    // -- Persistence --------------------------------------------------------

    pub fn save_disk_image(&self) -> FsResult<()> {
        persistence::save_disk_image(&self.disk, &self.image_path)
    }

    pub fn save_disk_image_to(&self, path: impl AsRef<Path>) -> FsResult<()> {
        persistence::save_disk_image(&self.disk, path)
    }

    /// Loads the image at the configured path, replacing the in-memory disk
    /// on success. `Ok(false)` means no image file existed yet (not an
    /// error — the caller should `format_disk` instead).
    pub fn load_disk_image(&mut self) -> FsResult<bool> {
        match persistence::load_disk_image(&self.image_path)? {
            Some(dm) => {
                self.disk = dm;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Splits a path into its parent directory and final path component, keeping
/// the leading `/` on the parent half when `path` was absolute. Shared by
/// every `System` method that resolves a parent before acting on a name.
fn split_parent_and_name(path: &str) -> FsResult<(String, String)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FsError::InvalidArgument("empty path".into()));
    }
    let is_absolute = trimmed.starts_with('/');
    let components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
    let name = components
        .last()
        .ok_or_else(|| FsError::InvalidArgument("path has no final component".into()))?
        .to_string();
    let parent_components = &components[..components.len() - 1];
    let parent = if is_absolute {
        format!("/{}", parent_components.join("/"))
    } else if parent_components.is_empty() {
        ".".to_string()
    } else {
        parent_components.join("/")
    };
    Ok((parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logged_in_system() -> System {
        let mut sys = System::new(std::env::temp_dir().join("simfs-system-test.img")).unwrap();
        sys.format_disk(FormatOptions {
            n_inodes: 32,
            n_blocks: 64,
            block_size: 64,
        })
        .unwrap();
        sys.login("root", "root").unwrap();
        sys
    }

    #[test]
    fn login_requires_a_formatted_disk() {
        let mut sys = System::new("unused.img").unwrap();
        assert!(sys.login("root", "root").is_err());
    }

    #[test]
    fn full_workflow_mkdir_write_read() {
        let mut sys = logged_in_system();
        sys.make_directory("/docs").unwrap();
        sys.change_directory("/docs").unwrap();

        let fd = sys.open_file("notes.txt", OpenMode::Write).unwrap();
        sys.write_file(fd, b"hello").unwrap();
        sys.close_file(fd).unwrap();

        let fd = sys.open_file("notes.txt", OpenMode::Read).unwrap();
        let bytes = sys.read_file(fd, 1024).unwrap();
        assert_eq!(bytes, b"hello");
        sys.close_file(fd).unwrap();
    }

    #[test]
    fn operations_without_a_session_are_rejected() {
        let mut sys = System::new("unused2.img").unwrap();
        sys.format_disk(FormatOptions::default()).unwrap();
        assert!(sys.make_directory("/docs").is_err());
    }

    #[test]
    fn login_refuses_when_a_session_is_already_active() {
        let mut sys = logged_in_system();
        assert!(sys.login("root", "root").is_err());
        sys.logout();
        assert!(sys.login("root", "root").is_ok());
    }
}
