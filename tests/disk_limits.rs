//! Scenarios that need precise control over free-space exhaustion, so they
//! go through `DiskManager`/`dir` directly rather than `System`.

use simfs::disk::FormatOptions;
use simfs::{dir, DiskManager};

#[test]
fn mkdir_rolls_back_cleanly_when_the_disk_runs_out_of_blocks() {
    let mut dm = DiskManager::new();
    dm.format(FormatOptions {
        n_inodes: 16,
        n_blocks: 3,
        block_size: 128,
    })
    .unwrap();
    let root = dm.superblock().unwrap().root_inode_id.unwrap();
    // format() already consumed one block for root's own entries; two remain.
    assert_eq!(dm.superblock().unwrap().free_blocks_count, 2);

    dir::make_directory(&mut dm, 0, 0, root, "d").unwrap();
    assert_eq!(dm.superblock().unwrap().free_blocks_count, 1);

    // Steal the last block so the next mkdir has an inode but no block.
    let stolen = dm.allocate_data_block().unwrap();
    assert_eq!(dm.superblock().unwrap().free_blocks_count, 0);

    let free_inodes_before = dm.superblock().unwrap().free_inodes_count;
    let err = dir::make_directory(&mut dm, 0, 0, root, "e").unwrap_err();
    assert!(matches!(err, simfs::FsError::NoSpace(_)));

    // No inode was leaked by the failed attempt.
    assert_eq!(dm.superblock().unwrap().free_inodes_count, free_inodes_before);
    assert_eq!(dm.superblock().unwrap().free_blocks_count, 0);

    dm.free_data_block(stolen);
    assert_eq!(dm.superblock().unwrap().free_blocks_count, 1);
}

#[test]
fn mkdir_fails_with_no_space_when_inodes_are_exhausted() {
    let mut dm = DiskManager::new();
    dm.format(FormatOptions {
        n_inodes: 1,
        n_blocks: 32,
        block_size: 128,
    })
    .unwrap();
    let root = dm.superblock().unwrap().root_inode_id.unwrap();
    assert_eq!(dm.superblock().unwrap().free_inodes_count, 0);

    let err = dir::make_directory(&mut dm, 0, 0, root, "d").unwrap_err();
    assert!(matches!(err, simfs::FsError::NoSpace(_)));
}
