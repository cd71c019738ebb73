//! Black-box scenarios against the public `System` API, matching the
//! concrete end-to-end walkthroughs described for this filesystem: fresh
//! format, grow-and-truncate write, hard-link unlink, symlink loops, and a
//! persistence round-trip.

use simfs::model::OpenMode;
use simfs::{DiskManager, FormatOptions, System};

fn logged_in_system(n_inodes: usize, n_blocks: usize, block_size: usize) -> System {
    let mut sys = System::new(std::env::temp_dir().join(format!("simfs-e2e-{}.img", std::process::id()))).unwrap();
    sys.format_disk(FormatOptions {
        n_inodes,
        n_blocks,
        block_size,
    })
    .unwrap();
    sys.login("root", "root").unwrap();
    sys
}

#[test]
fn fresh_format_lists_dot_and_dotdot_with_expected_free_counts() {
    let mut dm = DiskManager::new();
    dm.format(FormatOptions {
        n_inodes: 16,
        n_blocks: 32,
        block_size: 128,
    })
    .unwrap();
    let sb = dm.superblock().unwrap();
    assert_eq!(sb.free_inodes_count, 15);
    assert_eq!(sb.free_blocks_count, 31);
    let root = sb.root_inode_id.unwrap();
    let listed = simfs::dir::list(&mut dm, root).unwrap();
    let names: Vec<&str> = listed.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", ".."]);
}

#[test]
fn grow_then_shrink_write_moves_blocks_count_and_frees_tail_blocks() {
    let mut sys = logged_in_system(16, 32, 128);

    sys.create_file("/a").unwrap();
    let fd = sys.open_file("/a", OpenMode::Write).unwrap();
    sys.write_file(fd, &vec![b'X'; 300]).unwrap();
    sys.close_file(fd).unwrap();

    let inode_id = sys.resolve("/a").unwrap();
    {
        let inode = sys.get_inode(inode_id).unwrap();
        assert_eq!(inode.size, 300);
        assert_eq!(inode.blocks_count, 3);
    }

    let fd = sys.open_file("/a", OpenMode::Read).unwrap();
    let bytes = sys.read_file(fd, 500).unwrap();
    assert_eq!(bytes.len(), 300);
    assert!(bytes.iter().all(|&b| b == b'X'));
    sys.close_file(fd).unwrap();

    let fd2 = sys.open_file("/a", OpenMode::Write).unwrap();
    sys.write_file(fd2, &vec![b'Y'; 50]).unwrap();
    sys.close_file(fd2).unwrap();

    let inode = sys.get_inode(inode_id).unwrap();
    assert_eq!(inode.size, 50);
    assert_eq!(inode.blocks_count, 1);
}

#[test]
fn hard_link_unlink_keeps_data_alive_until_the_last_name_is_gone() {
    let mut sys = logged_in_system(16, 32, 128);

    sys.create_file("/f").unwrap();
    let target_id = sys.resolve("/f").unwrap();
    sys.create_hard_link("/g", "/f").unwrap();
    assert_eq!(sys.get_inode(target_id).unwrap().link_count, 2);

    sys.delete_file("/f").unwrap();
    assert!(sys.get_inode(target_id).is_some());
    assert_eq!(sys.get_inode(target_id).unwrap().link_count, 1);
    assert!(sys.resolve("/g").is_ok());

    sys.delete_file("/g").unwrap();
    assert!(sys.get_inode(target_id).is_none());
}

#[test]
fn symlink_to_itself_is_terminal_but_not_traversable() {
    let mut sys = logged_in_system(16, 32, 128);
    sys.create_symbolic_link("/loop", "/loop").unwrap();

    assert!(sys.resolve("/loop").is_ok());
    assert!(sys.resolve("/loop/x").is_err());
}

#[test]
fn symlink_to_a_missing_target_resolves_but_walking_through_it_fails() {
    let mut sys = logged_in_system(16, 32, 128);
    sys.create_symbolic_link("/dangling", "/nope").unwrap();

    assert!(sys.resolve("/dangling").is_ok());
    assert!(sys.resolve("/dangling/x").is_err());
}

#[test]
fn persistence_round_trip_preserves_files_and_subdirectories() {
    let path = std::env::temp_dir().join(format!("simfs-e2e-persist-{}.img", std::process::id()));
    std::fs::remove_file(&path).ok();

    {
        let mut sys = System::new(&path).unwrap();
        sys.format_disk(FormatOptions::default()).unwrap();
        sys.login("root", "root").unwrap();

        sys.create_file("/a").unwrap();
        let fd = sys.open_file("/a", OpenMode::Write).unwrap();
        sys.write_file(fd, b"hello").unwrap();
        sys.close_file(fd).unwrap();

        sys.make_directory("/sub").unwrap();
        sys.create_file("/sub/b").unwrap();
        let fd = sys.open_file("/sub/b", OpenMode::Write).unwrap();
        sys.write_file(fd, b"world").unwrap();
        sys.close_file(fd).unwrap();

        sys.save_disk_image().unwrap();
    }

    let mut sys = System::new(&path).unwrap();
    assert!(sys.load_disk_image().unwrap());
    sys.login("root", "root").unwrap();

    let mut names: Vec<String> = sys.list_directory("/").unwrap().into_iter().map(|e| e.name).collect();
    names.sort();
    assert_eq!(names, vec![".", "..", "a", "sub"]);

    let fd = sys.open_file("/a", OpenMode::Read).unwrap();
    assert_eq!(sys.read_file(fd, 1024).unwrap(), b"hello");
    sys.close_file(fd).unwrap();

    let fd = sys.open_file("/sub/b", OpenMode::Read).unwrap();
    assert_eq!(sys.read_file(fd, 1024).unwrap(), b"world");
    sys.close_file(fd).unwrap();

    std::fs::remove_file(&path).ok();
}
