//! rwx permission checks and the chmod/chown/chgrp family.

use crate::disk::DiskManager;
use crate::error::{FsError, FsResult};
use crate::model::{now_secs, Inode, Permission, ROOT_UID};

/// The four operations a permission check can be asked about. `Delete`
/// checks the target's own write bit; the caller is responsible for also
/// requiring write on the containing directory, per the source's split
/// between "may I modify this directory's entries" and "may I delete this
/// particular target".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Execute,
    Delete,
}

/// Checks whether `uid` (optionally matching `gid` against the inode's
/// group) may perform `op` on `inode`. uid 0 always succeeds.
pub fn check(inode: &Inode, uid: u32, gid: u32, op: Operation) -> bool {
    if uid == ROOT_UID {
        return true;
    }
    let triad = if uid == inode.owner_uid {
        inode.permissions.owner()
    } else if gid == inode.group_id {
        inode.permissions.group()
    } else {
        inode.permissions.other()
    };
    match op {
        Operation::Read => triad & 0b100 != 0,
        Operation::Write | Operation::Delete => triad & 0b010 != 0,
        Operation::Execute => triad & 0b001 != 0,
    }
}

/// Owner or uid 0 may chmod; bumps ctime on success.
pub fn chmod(dm: &mut DiskManager, uid: u32, target_inode_id: u32, new_permissions: Permission) -> FsResult<()> {
    let inode = dm
        .get_inode_mut(target_inode_id)
        .ok_or_else(|| FsError::NotFound(format!("inode {target_inode_id}")))?;
    if uid != ROOT_UID && uid != inode.owner_uid {
        return Err(FsError::PermissionDenied(format!(
            "only the owner or root may chmod inode {target_inode_id}"
        )));
    }
    inode.permissions = new_permissions;
    inode.touch_ctime(now_secs());
    Ok(())
}

/// uid 0 only.
pub fn chown(dm: &mut DiskManager, uid: u32, target_inode_id: u32, new_owner_uid: u32) -> FsResult<()> {
    if uid != ROOT_UID {
        return Err(FsError::PermissionDenied("only root may chown".into()));
    }
    let inode = dm
        .get_inode_mut(target_inode_id)
        .ok_or_else(|| FsError::NotFound(format!("inode {target_inode_id}")))?;
    inode.owner_uid = new_owner_uid;
    inode.touch_ctime(now_secs());
    Ok(())
}

/// Owner or uid 0 may chgrp.
pub fn chgrp(dm: &mut DiskManager, uid: u32, target_inode_id: u32, new_group_id: u32) -> FsResult<()> {
    let inode = dm
        .get_inode_mut(target_inode_id)
        .ok_or_else(|| FsError::NotFound(format!("inode {target_inode_id}")))?;
    if uid != ROOT_UID && uid != inode.owner_uid {
        return Err(FsError::PermissionDenied(format!(
            "only the owner or root may chgrp inode {target_inode_id}"
        )));
    }
    inode.group_id = new_group_id;
    inode.touch_ctime(now_secs());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now_secs as now, FileType};

    fn owned_inode(owner: u32, group: u32, perms: u16) -> Inode {
        Inode::new(1, FileType::File, owner, Permission::from_octal(perms).unwrap(), now())
    }

    #[test]
    fn root_always_passes() {
        let inode = owned_inode(42, 42, 0o000);
        assert!(check(&inode, 0, 0, Operation::Write));
    }

    #[test]
    fn owner_triad_applies_to_owner() {
        let inode = owned_inode(7, 0, 0o640);
        assert!(check(&inode, 7, 0, Operation::Read));
        assert!(check(&inode, 7, 0, Operation::Write));
        assert!(!check(&inode, 7, 0, Operation::Execute));
    }

    #[test]
    fn group_triad_applies_when_gid_matches() {
        let inode = owned_inode(7, 5, 0o604);
        assert!(!check(&inode, 8, 5, Operation::Write));
        assert!(check(&inode, 8, 5, Operation::Read));
    }

    #[test]
    fn other_triad_is_the_fallback() {
        let inode = owned_inode(7, 5, 0o640);
        assert!(!check(&inode, 99, 99, Operation::Read));
    }
}
