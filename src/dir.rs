//! Directory-entry encoding, path resolution, and the mkdir/rmdir/rename/ls
//! family. A directory's payload is a hand-rolled, length-prefixed record
//! list rather than a general-purpose serialisation format — the latter can
//! embed arbitrary code on load, which is unacceptable for bytes that may
//! come from an untrusted disk image.

use crate::disk::DiskManager;
use crate::error::{FsError, FsResult};
use crate::model::{now_secs, DirectoryEntry, FileType, Permission, MAX_NAME_LEN, SYMLINK_MAX_DEPTH};
use crate::perm::{self, Operation};

/// Per-entry detail returned by [`list`].
#[derive(Debug, Clone)]
pub struct EntryDetail {
    pub name: String,
    pub inode_id: u32,
    pub file_type: FileType,
    pub size: u64,
    pub permissions: Permission,
    pub mtime: u64,
    pub link_count: u32,
    pub owner_uid: u32,
    pub is_hardlink: bool,
}

/// Encodes a directory-entry list as: a 4-byte little-endian count, then per
/// entry a 1-byte name length, the name bytes, a 4-byte little-endian inode
/// id, and a 1-byte hardlink flag. Fails with `Limit` if the result would not
/// fit in one block — multi-block directories are a known limitation.
pub fn encode_entries(entries: &[DirectoryEntry], block_size: usize) -> FsResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(4 + entries.len() * 16);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        if entry.name.len() > MAX_NAME_LEN {
            return Err(FsError::Limit(format!("name '{}' exceeds {MAX_NAME_LEN} bytes", entry.name)));
        }
        buf.push(entry.name.len() as u8);
        buf.extend_from_slice(entry.name.as_bytes());
        buf.extend_from_slice(&entry.inode_id.to_le_bytes());
        buf.push(entry.is_hardlink as u8);
    }
    if buf.len() > block_size {
        return Err(FsError::Limit(format!(
            "encoded directory entries ({} bytes) exceed block size ({block_size})",
            buf.len()
        )));
    }
    Ok(buf)
}

/// Decodes the format written by [`encode_entries`]. An all-zero block
/// decodes to an empty entry list (a count of zero).
pub fn decode_entries(bytes: &[u8]) -> FsResult<Vec<DirectoryEntry>> {
    if bytes.len() < 4 {
        return Err(FsError::Corrupt("directory block too small to hold a count".into()));
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    let mut pos = 4;
    for _ in 0..count {
        if pos >= bytes.len() {
            return Err(FsError::Corrupt("directory block truncated mid-entry".into()));
        }
        let name_len = bytes[pos] as usize;
        pos += 1;
        if pos + name_len + 4 + 1 > bytes.len() {
            return Err(FsError::Corrupt("directory block truncated mid-entry".into()));
        }
        let name = std::str::from_utf8(&bytes[pos..pos + name_len])
            .map_err(|_| FsError::Corrupt("directory entry name is not valid UTF-8".into()))?
            .to_string();
        pos += name_len;
        let inode_id = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let is_hardlink = bytes[pos] != 0;
        pos += 1;
        out.push(DirectoryEntry::new(name, inode_id, is_hardlink));
    }
    Ok(out)
}

/// Loads and decodes the entry list from a directory inode's first data
/// block. An unallocated block decodes to an empty list.
pub fn read_entries(dm: &DiskManager, dir_inode_id: u32) -> FsResult<Vec<DirectoryEntry>> {
    let inode = dm
        .get_inode(dir_inode_id)
        .ok_or_else(|| FsError::NotFound(format!("inode {dir_inode_id}")))?;
    if inode.file_type != FileType::Directory {
        return Err(FsError::WrongType(format!("inode {dir_inode_id} is not a directory")));
    }
    let Some(&block_id) = inode.direct_blocks.first() else {
        return Ok(Vec::new());
    };
    let bytes = dm.read_block(block_id)?;
    decode_entries(&bytes)
}

/// Encodes and writes `entries` to a directory inode's first data block,
/// updating its entry count and m/c/a timestamps.
pub fn write_entries(dm: &mut DiskManager, dir_inode_id: u32, entries: &[DirectoryEntry]) -> FsResult<()> {
    let block_size = dm.block_size();
    let block_id = {
        let inode = dm
            .get_inode(dir_inode_id)
            .ok_or_else(|| FsError::NotFound(format!("inode {dir_inode_id}")))?;
        if inode.file_type != FileType::Directory {
            return Err(FsError::WrongType(format!("inode {dir_inode_id} is not a directory")));
        }
        inode
            .direct_blocks
            .first()
            .copied()
            .ok_or_else(|| FsError::Internal(format!("directory inode {dir_inode_id} has no data block")))?
    };
    let encoded = encode_entries(entries, block_size)?;
    dm.write_block(block_id, &encoded)?;
    let now = now_secs();
    let inode = dm
        .get_inode_mut(dir_inode_id)
        .ok_or_else(|| FsError::NotFound(format!("inode {dir_inode_id}")))?;
    inode.size = entries.len() as u64;
    inode.touch_mtime(now);
    inode.touch_atime(now);
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(FsError::InvalidArgument(format!("invalid name '{name}'")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::Limit(format!("name '{name}' exceeds {MAX_NAME_LEN} bytes")));
    }
    Ok(())
}

fn read_symlink_target(dm: &DiskManager, inode_id: u32) -> FsResult<String> {
    let inode = dm
        .get_inode(inode_id)
        .ok_or_else(|| FsError::NotFound(format!("inode {inode_id}")))?;
    if inode.file_type != FileType::SymbolicLink {
        return Err(FsError::WrongType(format!("inode {inode_id} is not a symbolic link")));
    }
    let Some(&block_id) = inode.direct_blocks.first() else {
        return Ok(String::new());
    };
    let bytes = dm.read_block(block_id)?;
    let len = (inode.size as usize).min(bytes.len());
    std::str::from_utf8(&bytes[..len])
        .map(|s| s.to_string())
        .map_err(|_| FsError::Corrupt(format!("symlink target for inode {inode_id} is not valid UTF-8")))
}

/// Resolves `path` against `cwd`/`root`, following symlinks for every
/// non-terminal path component (lstat-like: a terminal symlink resolves to
/// its own inode, not its target). Bounded by `SYMLINK_MAX_DEPTH` expansions.
pub fn resolve(dm: &DiskManager, cwd: u32, root: u32, path: &str) -> FsResult<u32> {
    resolve_inner(dm, cwd, root, path, 0)
}

fn resolve_inner(dm: &DiskManager, cwd: u32, root: u32, path: &str, depth: u32) -> FsResult<u32> {
    if depth > SYMLINK_MAX_DEPTH {
        return Err(FsError::Limit("symlink expansion depth exceeded".into()));
    }
    if path.is_empty() {
        return Ok(cwd);
    }
    let (mut current, rest) = match path.strip_prefix('/') {
        Some(r) => (root, r),
        None => (cwd, path),
    };
    let components: Vec<&str> = rest.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Ok(current);
    }
    let last_idx = components.len() - 1;

    for (i, comp) in components.iter().enumerate() {
        let entries = read_entries(dm, current)?;
        let next = match *comp {
            "." => current,
            ".." => entries
                .iter()
                .find(|e| e.name == "..")
                .map(|e| e.inode_id)
                .ok_or_else(|| FsError::Corrupt(format!("directory {current} is missing '..'")))?,
            name => entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.inode_id)
                .ok_or_else(|| FsError::NotFound(format!("'{name}' not found")))?,
        };
        let next_inode = dm
            .get_inode(next)
            .ok_or_else(|| FsError::NotFound(format!("dangling entry for '{comp}'")))?;

        if i != last_idx {
            match next_inode.file_type {
                FileType::SymbolicLink => {
                    let target = read_symlink_target(dm, next)?;
                    let mut new_path = target;
                    for rc in &components[i + 1..] {
                        new_path.push('/');
                        new_path.push_str(rc);
                    }
                    return resolve_inner(dm, current, root, &new_path, depth + 1);
                }
                FileType::Directory => current = next,
                FileType::File => {
                    return Err(FsError::NotFound(format!("'{comp}' is not a directory")));
                }
            }
        } else {
            current = next;
        }
    }
    Ok(current)
}

/// Creates a new directory inode under `parent`, pre-populated with "." and
/// ".." entries. Rolls back any resource it already allocated on failure.
pub fn make_directory(dm: &mut DiskManager, uid: u32, gid: u32, parent_inode_id: u32, name: &str) -> FsResult<u32> {
    validate_name(name)?;

    {
        let parent = dm
            .get_inode(parent_inode_id)
            .ok_or_else(|| FsError::NotFound(format!("parent inode {parent_inode_id}")))?;
        if parent.file_type != FileType::Directory {
            return Err(FsError::WrongType(format!("inode {parent_inode_id} is not a directory")));
        }
        if !perm::check(parent, uid, gid, Operation::Write) {
            return Err(FsError::PermissionDenied(format!(
                "no write permission on directory {parent_inode_id}"
            )));
        }
    }

    let parent_entries = read_entries(dm, parent_inode_id)?;
    if parent_entries.iter().any(|e| e.name == name) {
        return Err(FsError::AlreadyExists(format!("'{name}' already exists in {parent_inode_id}")));
    }

    let new_id = dm
        .allocate_inode(uid)
        .ok_or_else(|| FsError::NoSpace("no free inodes".into()))?;
    let block_id = match dm.allocate_data_block() {
        Some(b) => b,
        None => {
            dm.free_inode(new_id);
            return Err(FsError::NoSpace("no free data blocks".into()));
        }
    };

    let now = now_secs();
    let perms = Permission::from_octal(crate::model::DEFAULT_DIR_PERMS).expect("valid default dir perms");
    let mut new_inode = crate::model::Inode::new(new_id, FileType::Directory, uid, perms, now);
    new_inode.direct_blocks.push(block_id);
    new_inode.blocks_count = 1;
    new_inode.link_count = 2;
    dm.insert_inode(new_inode);

    let dot_entries = vec![
        DirectoryEntry::new(".", new_id, false),
        DirectoryEntry::new("..", parent_inode_id, false),
    ];
    if let Err(e) = write_entries(dm, new_id, &dot_entries) {
        dm.free_data_block(block_id);
        dm.free_inode(new_id);
        return Err(e);
    }

    let mut updated_parent_entries = parent_entries;
    updated_parent_entries.push(DirectoryEntry::new(name, new_id, false));
    if let Err(e) = write_entries(dm, parent_inode_id, &updated_parent_entries) {
        dm.free_data_block(block_id);
        dm.free_inode(new_id);
        return Err(e);
    }

    if let Some(parent) = dm.get_inode_mut(parent_inode_id) {
        parent.link_count += 1;
    }

    Ok(new_id)
}

/// Removes a directory and everything beneath it: subdirectories recurse
/// through this function, ordinary files go through `file::delete_file`.
/// This is the recursive variant the source exhibits, not POSIX's
/// empty-directory-only `rmdir`.
pub fn remove_directory(dm: &mut DiskManager, uid: u32, gid: u32, parent_inode_id: u32, name: &str) -> FsResult<()> {
    if name == "." || name == ".." {
        return Err(FsError::InvalidArgument(format!("cannot remove special entry '{name}'")));
    }

    let parent = dm
        .get_inode(parent_inode_id)
        .ok_or_else(|| FsError::NotFound(format!("parent inode {parent_inode_id}")))?;
    if parent.file_type != FileType::Directory {
        return Err(FsError::WrongType(format!("inode {parent_inode_id} is not a directory")));
    }
    if !perm::check(parent, uid, gid, Operation::Write) {
        return Err(FsError::PermissionDenied(format!(
            "no write permission on directory {parent_inode_id}"
        )));
    }

    let mut parent_entries = read_entries(dm, parent_inode_id)?;
    let entry_idx = parent_entries
        .iter()
        .position(|e| e.name == name)
        .ok_or_else(|| FsError::NotFound(format!("'{name}' not found in {parent_inode_id}")))?;
    let target_id = parent_entries[entry_idx].inode_id;

    let Some(target) = dm.get_inode(target_id) else {
        eprintln!("warning: dangling directory entry '{name}' in inode {parent_inode_id}, removing");
        parent_entries.remove(entry_idx);
        write_entries(dm, parent_inode_id, &parent_entries)?;
        return Err(FsError::Corrupt(format!("inode {target_id} for '{name}' missing; entry removed")));
    };
    if target.file_type != FileType::Directory {
        return Err(FsError::WrongType(format!("'{name}' is not a directory")));
    }
    if !perm::check(target, uid, gid, Operation::Delete) {
        return Err(FsError::PermissionDenied(format!("cannot delete directory {target_id}")));
    }

    let children = read_entries(dm, target_id)?;
    for child in &children {
        if child.name == "." || child.name == ".." {
            continue;
        }
        let child_inode = dm
            .get_inode(child.inode_id)
            .ok_or_else(|| FsError::Corrupt(format!("dangling entry '{}' in {target_id}", child.name)))?;
        if child_inode.file_type == FileType::Directory {
            remove_directory(dm, uid, gid, target_id, &child.name)?;
        } else {
            crate::file::delete_file(dm, uid, gid, target_id, &child.name)?;
        }
    }

    parent_entries.remove(entry_idx);
    write_entries(dm, parent_inode_id, &parent_entries)?;
    if let Some(parent) = dm.get_inode_mut(parent_inode_id) {
        parent.link_count = parent.link_count.saturating_sub(1);
    }

    dm.free_file_blocks(target_id)?;
    dm.free_inode(target_id);
    Ok(())
}

/// Renames an entry in place within `parent`. A no-op if `old_name ==
/// new_name`. Restores nothing beyond simply not persisting the change on a
/// write failure, since the in-memory entry list is local to this call.
pub fn rename(dm: &mut DiskManager, uid: u32, gid: u32, parent_inode_id: u32, old_name: &str, new_name: &str) -> FsResult<()> {
    validate_name(new_name)?;
    if old_name == new_name {
        return Ok(());
    }

    let parent = dm
        .get_inode(parent_inode_id)
        .ok_or_else(|| FsError::NotFound(format!("parent inode {parent_inode_id}")))?;
    if parent.file_type != FileType::Directory {
        return Err(FsError::WrongType(format!("inode {parent_inode_id} is not a directory")));
    }
    if !perm::check(parent, uid, gid, Operation::Write) {
        return Err(FsError::PermissionDenied(format!(
            "no write permission on directory {parent_inode_id}"
        )));
    }

    let mut entries = read_entries(dm, parent_inode_id)?;
    if entries.iter().any(|e| e.name == new_name) {
        return Err(FsError::AlreadyExists(format!("'{new_name}' already exists")));
    }
    let idx = entries
        .iter()
        .position(|e| e.name == old_name)
        .ok_or_else(|| FsError::NotFound(format!("'{old_name}' not found")))?;
    let target_id = entries[idx].inode_id;
    entries[idx].name = new_name.to_string();

    write_entries(dm, parent_inode_id, &entries)?;

    let now = now_secs();
    if let Some(target) = dm.get_inode_mut(target_id) {
        target.touch_ctime(now);
    }
    Ok(())
}

/// Returns per-entry detail for everything in `dir_inode_id`, skipping
/// entries whose inode is missing (with a warning) rather than failing the
/// whole listing.
pub fn list(dm: &mut DiskManager, dir_inode_id: u32) -> FsResult<Vec<EntryDetail>> {
    let entries = read_entries(dm, dir_inode_id)?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match dm.get_inode(entry.inode_id) {
            Some(inode) => out.push(EntryDetail {
                name: entry.name,
                inode_id: entry.inode_id,
                file_type: inode.file_type,
                size: inode.size,
                permissions: inode.permissions,
                mtime: inode.mtime,
                link_count: inode.link_count,
                owner_uid: inode.owner_uid,
                is_hardlink: entry.is_hardlink,
            }),
            None => {
                eprintln!(
                    "warning: directory {dir_inode_id} entry '{}' points at missing inode {}, skipping",
                    entry.name, entry.inode_id
                );
            }
        }
    }
    let now = now_secs();
    if let Some(dir_inode) = dm.get_inode_mut(dir_inode_id) {
        dir_inode.touch_atime(now);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FormatOptions;

    fn small_disk() -> DiskManager {
        let mut dm = DiskManager::new();
        dm.format(FormatOptions {
            n_inodes: 32,
            n_blocks: 32,
            block_size: 128,
        })
        .unwrap();
        dm
    }

    #[test]
    fn entries_round_trip_through_encoding() {
        let entries = vec![
            DirectoryEntry::new(".", 0, false),
            DirectoryEntry::new("..", 0, false),
            DirectoryEntry::new("sub", 3, false),
        ];
        let bytes = encode_entries(&entries, 128).unwrap();
        let decoded = decode_entries(&bytes).unwrap();
        assert_eq!(entries, decoded);
    }

    #[test]
    fn fresh_root_lists_dot_and_dotdot() {
        let mut dm = small_disk();
        let root = dm.superblock().unwrap().root_inode_id.unwrap();
        let listed = list(&mut dm, root).unwrap();
        let names: Vec<&str> = listed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn make_directory_then_resolve_finds_it() {
        let mut dm = small_disk();
        let root = dm.superblock().unwrap().root_inode_id.unwrap();
        let sub = make_directory(&mut dm, 0, 0, root, "sub").unwrap();
        let resolved = resolve(&dm, root, root, "/sub").unwrap();
        assert_eq!(resolved, sub);
        assert_eq!(resolve(&dm, root, root, "sub/..").unwrap(), root);
    }

    #[test]
    fn mkdir_rejects_duplicate_name() {
        let mut dm = small_disk();
        let root = dm.superblock().unwrap().root_inode_id.unwrap();
        make_directory(&mut dm, 0, 0, root, "sub").unwrap();
        let err = make_directory(&mut dm, 0, 0, root, "sub").unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[test]
    fn rename_is_a_no_op_round_trip() {
        let mut dm = small_disk();
        let root = dm.superblock().unwrap().root_inode_id.unwrap();
        make_directory(&mut dm, 0, 0, root, "a").unwrap();
        rename(&mut dm, 0, 0, root, "a", "b").unwrap();
        rename(&mut dm, 0, 0, root, "b", "a").unwrap();
        let names: Vec<String> = list(&mut dm, root).unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"a".to_string()));
    }
}
