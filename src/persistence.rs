//! Whole-disk-manager image save/load. `DiskManager` already derives
//! `Serialize`/`Deserialize` (see `disk.rs`), so this module is mostly the
//! file I/O and reconciliation glue around a single `bincode::serialize_into`
//! / `deserialize_from` call.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::disk::DiskManager;
use crate::error::{FsError, FsResult};

/// Default on-disk image filename, per the persisted-constants list.
pub const DEFAULT_IMAGE_PATH: &str = "simulated_disk.img";

/// Writes the entire disk manager state to `path` as a single opaque image.
pub fn save_disk_image(dm: &DiskManager, path: impl AsRef<Path>) -> FsResult<()> {
    let file = File::create(path.as_ref())
        .map_err(|e| FsError::Internal(format!("cannot create image file: {e}")))?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, dm).map_err(|e| FsError::Internal(format!("failed to write image: {e}")))
}

/// Loads a disk manager from `path`. A missing file is reported distinctly
/// (`Ok(None)`) from a corrupt one (`Err`), so callers can format a fresh
/// disk on first run without treating that as an error.
pub fn load_disk_image(path: impl AsRef<Path>) -> FsResult<Option<DiskManager>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|e| FsError::Internal(format!("cannot open image file: {e}")))?;
    let reader = BufReader::new(file);
    let mut dm: DiskManager =
        bincode::deserialize_from(reader).map_err(|e| FsError::Corrupt(format!("image is not a valid disk: {e}")))?;
    reconcile_formatted_flag(&mut dm);
    Ok(Some(dm))
}

/// If the loaded superblock's presence disagrees with `is_formatted`,
/// reconciles to the conservative interpretation (treat it as unformatted
/// unless both agree it is formatted) and warns, per spec.md §4.6.
fn reconcile_formatted_flag(dm: &mut DiskManager) {
    let has_superblock = dm.superblock().is_some();
    if has_superblock != dm.is_formatted() {
        eprintln!(
            "warning: loaded image has a superblock={has_superblock} but is_formatted={}; reconciling",
            dm.is_formatted()
        );
        dm.mark_unformatted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FormatOptions;

    #[test]
    fn save_then_load_round_trips_a_formatted_disk() {
        let dir = std::env::temp_dir().join(format!("simfs-persistence-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("disk.img");

        let mut dm = DiskManager::new();
        dm.format(FormatOptions {
            n_inodes: 16,
            n_blocks: 16,
            block_size: 64,
        })
        .unwrap();
        let root = dm.superblock().unwrap().root_inode_id.unwrap();
        crate::dir::make_directory(&mut dm, 0, 0, root, "sub").unwrap();

        save_disk_image(&dm, &path).unwrap();
        let loaded = load_disk_image(&path).unwrap().unwrap();

        assert_eq!(loaded.superblock().unwrap().root_inode_id, dm.superblock().unwrap().root_inode_id);
        assert!(crate::dir::resolve(&loaded, root, root, "/sub").is_ok());

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn missing_image_file_is_not_an_error() {
        let path = std::env::temp_dir().join("simfs-persistence-test-definitely-missing.img");
        std::fs::remove_file(&path).ok();
        assert!(load_disk_image(&path).unwrap().is_none());
    }
}
