//! User accounts, password hashing and per-session state: a session owns a
//! uid/gid, a current working directory inode id, and the table of open-file
//! entries its file descriptors index into.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand_core::OsRng;

use crate::error::{FsError, FsResult};
use crate::model::{OpenFileEntry, ROOT_UID};

/// Lowest uid handed out to a user created through [`Auth::create_user`].
/// Below this range is reserved for system accounts, mirroring the
/// `/etc/passwd` convention of a low block of system uids.
pub const FIRST_REGULAR_UID: u32 = 1000;

/// Hashes a clear password with a freshly generated salt using Argon2,
/// the same KDF and encoding the teacher's `user::hash_password` uses for
/// `/etc/shadow` entries.
pub fn hash_password(pass: &str) -> FsResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| FsError::Internal(format!("password hashing failed: {e}")))
}

/// Tells whether `pass` matches the Argon2 hash produced by
/// [`hash_password`]. A malformed hash is treated as a non-match rather than
/// an error.
pub fn check_password(hash: &str, pass: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default().verify_password(pass.as_bytes(), &parsed).is_ok()
}

/// A registered account. The password is always stored hashed; there is no
/// code path that keeps a clear password around past `create_user`/`login`.
#[derive(Debug, Clone)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
    pub username: String,
    /// Inode id of this user's home directory, if one has been assigned.
    /// `login` sets a fresh session's cwd here when present, falling back to
    /// the filesystem root otherwise.
    pub home_inode: Option<u32>,
    pub is_admin: bool,
    password_hash: String,
}

/// The account directory plus the set of currently open sessions' next-fd
/// bookkeeping lives entirely inside each [`Session`] — `Auth` itself only
/// knows about accounts, not who is logged in.
#[derive(Debug, Clone)]
pub struct Auth {
    users: Vec<User>,
}

impl Auth {
    /// An account directory with no users at all.
    pub fn new() -> Self {
        Self { users: Vec::new() }
    }

    /// An account directory seeded with `root` (uid 0) and `guest` (uid
    /// 1000), both with a password equal to their username. A real deployment
    /// would force a password change on first login; this layer only
    /// provides the mechanism, not that policy.
    pub fn with_default_users() -> FsResult<Self> {
        let mut auth = Self::new();
        auth.users.push(User {
            uid: ROOT_UID,
            gid: ROOT_UID,
            username: "root".to_string(),
            home_inode: None,
            is_admin: true,
            password_hash: hash_password("root")?,
        });
        auth.users.push(User {
            uid: FIRST_REGULAR_UID,
            gid: FIRST_REGULAR_UID,
            username: "guest".to_string(),
            home_inode: None,
            is_admin: false,
            password_hash: hash_password("guest")?,
        });
        Ok(auth)
    }

    pub fn find_by_name(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    pub fn find_by_uid(&self, uid: u32) -> Option<&User> {
        self.users.iter().find(|u| u.uid == uid)
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Creates a new account with its own freshly allocated gid equal to its
    /// uid (one group per user, same simplification the source applies).
    /// The first free uid at or above [`FIRST_REGULAR_UID`] is used.
    /// `home_inode` is recorded as-is and is not validated against the
    /// filesystem — the caller is responsible for making sure it points at
    /// an actual directory, if it passes one at all.
    pub fn create_user(&mut self, username: &str, password: &str, home_inode: Option<u32>) -> FsResult<u32> {
        if username.is_empty() || username.contains(':') || username.contains('\n') {
            return Err(FsError::InvalidArgument(format!("invalid username '{username}'")));
        }
        if self.find_by_name(username).is_some() {
            return Err(FsError::AlreadyExists(format!("user '{username}' already exists")));
        }
        let uid = (FIRST_REGULAR_UID..)
            .find(|candidate| self.find_by_uid(*candidate).is_none())
            .expect("uid space is not actually exhausted");
        self.users.push(User {
            uid,
            gid: uid,
            username: username.to_string(),
            home_inode,
            is_admin: false,
            password_hash: hash_password(password)?,
        });
        Ok(uid)
    }

    /// Removes an account. Does not touch any files it owns — ownership by a
    /// now-nonexistent uid is left as-is, same as a POSIX `userdel` without
    /// `-r`.
    pub fn delete_user(&mut self, username: &str) -> FsResult<()> {
        let idx = self
            .users
            .iter()
            .position(|u| u.username == username)
            .ok_or_else(|| FsError::NotFound(format!("user '{username}'")))?;
        self.users.remove(idx);
        Ok(())
    }

    /// Verifies `username`/`password` and returns a fresh session with an
    /// empty fd table. The session's cwd is the user's `home_inode` when
    /// one is set, falling back to `root_inode_id` otherwise. Fails
    /// uniformly with `PermissionDenied` whether the username is unknown or
    /// the password is wrong, so a caller cannot use the error to enumerate
    /// valid usernames.
    pub fn login(&self, username: &str, password: &str, root_inode_id: u32) -> FsResult<Session> {
        let user = self
            .find_by_name(username)
            .filter(|u| check_password(&u.password_hash, password))
            .ok_or_else(|| FsError::PermissionDenied("invalid username or password".into()))?;
        let cwd = user.home_inode.unwrap_or(root_inode_id);
        Ok(Session::new(user.uid, user.gid, username.to_string(), cwd))
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self::new()
    }
}

/// A logged-in user's live state: identity, current working directory, and
/// the open-file-descriptor table. Dropping a `Session` is `logout` — there
/// is no separate close-everything step because nothing outside the session
/// holds its fds.
#[derive(Debug, Clone)]
pub struct Session {
    pub uid: u32,
    pub gid: u32,
    pub username: String,
    pub cwd: u32,
    open_files: Vec<Option<OpenFileEntry>>,
}

impl Session {
    fn new(uid: u32, gid: u32, username: String, cwd: u32) -> Self {
        Self {
            uid,
            gid,
            username,
            cwd,
            open_files: Vec::new(),
        }
    }

    /// Binds `entry` to the lowest free fd, growing the table if every slot
    /// is in use.
    pub fn allocate_fd(&mut self, entry: OpenFileEntry) -> u32 {
        if let Some(slot) = self.open_files.iter().position(Option::is_none) {
            self.open_files[slot] = Some(entry);
            slot as u32
        } else {
            self.open_files.push(Some(entry));
            (self.open_files.len() - 1) as u32
        }
    }

    pub fn get_fd(&self, fd: u32) -> FsResult<&OpenFileEntry> {
        self.open_files
            .get(fd as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| FsError::NotFound(format!("file descriptor {fd}")))
    }

    pub fn get_fd_mut(&mut self, fd: u32) -> FsResult<&mut OpenFileEntry> {
        self.open_files
            .get_mut(fd as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::NotFound(format!("file descriptor {fd}")))
    }

    /// Frees `fd`, leaving a hole that a later `allocate_fd` can reuse.
    pub fn release_fd(&mut self, fd: u32) -> FsResult<()> {
        let slot = self
            .open_files
            .get_mut(fd as usize)
            .ok_or_else(|| FsError::NotFound(format!("file descriptor {fd}")))?;
        if slot.take().is_none() {
            return Err(FsError::NotFound(format!("file descriptor {fd}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OpenMode;

    #[test]
    fn password_round_trips_through_hashing() {
        let hash = hash_password("hunter2").unwrap();
        assert!(check_password(&hash, "hunter2"));
        assert!(!check_password(&hash, "wrong"));
    }

    #[test]
    fn default_users_include_root_and_guest() {
        let auth = Auth::with_default_users().unwrap();
        assert!(auth.find_by_uid(ROOT_UID).is_some());
        assert!(auth.find_by_name("guest").is_some());
    }

    #[test]
    fn create_user_allocates_uids_from_1000_and_rejects_duplicates() {
        let mut auth = Auth::with_default_users().unwrap();
        let uid = auth.create_user("alice", "s3cret", None).unwrap();
        assert_eq!(uid, FIRST_REGULAR_UID);
        let uid2 = auth.create_user("bob", "s3cret", None).unwrap();
        assert_eq!(uid2, FIRST_REGULAR_UID + 1);
        assert!(auth.create_user("alice", "whatever", None).is_err());
    }

    #[test]
    fn login_prefers_the_users_home_inode_over_the_filesystem_root() {
        let mut auth = Auth::with_default_users().unwrap();
        auth.create_user("alice", "s3cret", Some(42)).unwrap();
        let session = auth.login("alice", "s3cret", 0).unwrap();
        assert_eq!(session.cwd, 42);

        let root_session = auth.login("root", "root", 7).unwrap();
        assert_eq!(root_session.cwd, 7);
    }

    #[test]
    fn login_fails_on_wrong_password_and_unknown_user() {
        let auth = Auth::with_default_users().unwrap();
        assert!(auth.login("root", "wrong", 0).is_err());
        assert!(auth.login("nobody", "root", 0).is_err());
        assert!(auth.login("root", "root", 0).is_ok());
    }

    #[test]
    fn fd_table_reuses_released_slots() {
        let mut session = Session::new(0, 0, "root".to_string(), 0);
        let entry = OpenFileEntry { inode_id: 5, mode: OpenMode::Read, offset: 0 };
        let fd0 = session.allocate_fd(entry);
        let fd1 = session.allocate_fd(entry);
        assert_eq!((fd0, fd1), (0, 1));
        session.release_fd(fd0).unwrap();
        let fd2 = session.allocate_fd(entry);
        assert_eq!(fd2, 0);
    }
}
