//! Owns the inode table, the data block store, the two free bitmaps and the
//! superblock. Nothing above this layer touches `data_blocks` or
//! `inode_table` directly — every read/write/allocate goes through here so
//! that the bitmap ↔ table ↔ block-map invariants stay in one place.

use crate::error::{FsError, FsResult};
use crate::model::{
    now_secs, DirectoryEntry, FileType, Inode, Permission, Superblock, DEFAULT_BLOCK_SIZE,
    DEFAULT_DIR_PERMS, DEFAULT_N_BLOCKS, DEFAULT_N_INODES, DIRECT_BLOCKS_MAX, MAGIC, ROOT_UID,
};

/// Parameters for a fresh `format`. Mirrors the teacher's `Args`-plus-`Default`
/// convention for command configuration.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub n_inodes: usize,
    pub n_blocks: usize,
    pub block_size: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            n_inodes: DEFAULT_N_INODES,
            n_blocks: DEFAULT_N_BLOCKS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiskManager {
    superblock: Option<Superblock>,
    inode_bitmap: Vec<bool>,
    data_block_bitmap: Vec<bool>,
    inode_table: Vec<Option<Inode>>,
    data_blocks: Vec<Vec<u8>>,
    is_formatted: bool,
}

impl DiskManager {
    /// An unformatted disk manager with no storage allocated yet.
    pub fn new() -> Self {
        Self {
            superblock: None,
            inode_bitmap: Vec::new(),
            data_block_bitmap: Vec::new(),
            inode_table: Vec::new(),
            data_blocks: Vec::new(),
            is_formatted: false,
        }
    }

    pub fn is_formatted(&self) -> bool {
        self.is_formatted
    }

    /// Forces the conservative "not formatted" interpretation, used by
    /// `persistence::load_disk_image` when a loaded image's superblock
    /// presence disagrees with its `is_formatted` flag.
    pub fn mark_unformatted(&mut self) {
        self.is_formatted = false;
    }

    pub fn superblock(&self) -> Option<&Superblock> {
        self.superblock.as_ref()
    }

    pub fn block_size(&self) -> usize {
        self.superblock.as_ref().map(|s| s.block_size as usize).unwrap_or(0)
    }

    fn entries_per_meta_block(&self) -> usize {
        self.block_size().saturating_sub(4) / 4
    }

    /// Reinitialises all storage and creates the root directory. Rolls back
    /// whatever it already allocated on any failure along the way.
    pub fn format(&mut self, opts: FormatOptions) -> FsResult<()> {
        if opts.block_size < 16 {
            return Err(FsError::InvalidArgument(
                "block size must be at least 16 bytes".into(),
            ));
        }
        self.superblock = Some(Superblock {
            magic: MAGIC,
            total_blocks: opts.n_blocks as u32,
            total_inodes: opts.n_inodes as u32,
            block_size: opts.block_size as u32,
            free_blocks_count: opts.n_blocks as u32,
            free_inodes_count: opts.n_inodes as u32,
            root_inode_id: None,
        });
        self.inode_bitmap = vec![true; opts.n_inodes];
        self.data_block_bitmap = vec![true; opts.n_blocks];
        self.inode_table = (0..opts.n_inodes).map(|_| None).collect();
        self.data_blocks = (0..opts.n_blocks).map(|_| vec![0u8; opts.block_size]).collect();
        self.is_formatted = false;

        let root_id = self
            .allocate_inode(ROOT_UID)
            .ok_or_else(|| FsError::NoSpace("no inodes available for root directory".into()))?;

        let now = now_secs();
        let perms = Permission::from_octal(DEFAULT_DIR_PERMS)
            .expect("DEFAULT_DIR_PERMS is a valid 9-bit value");
        let mut root_inode = Inode::new(root_id, FileType::Directory, ROOT_UID, perms, now);
        root_inode.link_count = 2;

        let root_block = match self.allocate_data_block() {
            Some(b) => b,
            None => {
                self.free_inode(root_id);
                return Err(FsError::NoSpace(
                    "no data blocks available for root directory".into(),
                ));
            }
        };
        root_inode.direct_blocks.push(root_block);
        root_inode.blocks_count = 1;

        let entries = vec![
            DirectoryEntry::new(".", root_id, false),
            DirectoryEntry::new("..", root_id, false),
        ];
        let encoded = match crate::dir::encode_entries(&entries, self.block_size()) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.free_data_block(root_block);
                self.free_inode(root_id);
                return Err(e);
            }
        };
        root_inode.size = entries.len() as u64;
        if let Err(e) = self.write_block(root_block, &encoded) {
            self.free_data_block(root_block);
            self.free_inode(root_id);
            return Err(e);
        }
        self.inode_table[root_id as usize] = Some(root_inode);

        self.superblock.as_mut().expect("just set").root_inode_id = Some(root_id);
        self.is_formatted = true;
        Ok(())
    }

    /// Finds the lowest free inode id and marks it allocated. The `uid`
    /// parameter exists for API parity with the source, which threads it
    /// through unused; inode ownership is set by the caller once the actual
    /// `Inode` record is constructed.
    pub fn allocate_inode(&mut self, _uid: u32) -> Option<u32> {
        let sb = self.superblock.as_mut()?;
        if sb.free_inodes_count == 0 {
            return None;
        }
        let id = self.inode_bitmap.iter().position(|&free| free)? as u32;
        self.inode_bitmap[id as usize] = false;
        sb.free_inodes_count -= 1;
        Some(id)
    }

    pub fn free_inode(&mut self, inode_id: u32) {
        let Some(sb) = self.superblock.as_mut() else { return };
        if inode_id >= sb.total_inodes {
            eprintln!("warning: invalid inode id {inode_id} to free");
            return;
        }
        let idx = inode_id as usize;
        if !self.inode_bitmap[idx] {
            self.inode_bitmap[idx] = true;
            sb.free_inodes_count += 1;
            self.inode_table[idx] = None;
        } else {
            eprintln!("warning: inode {inode_id} was already free");
        }
    }

    pub fn allocate_data_block(&mut self) -> Option<u32> {
        let sb = self.superblock.as_mut()?;
        if sb.free_blocks_count == 0 {
            return None;
        }
        let id = self.data_block_bitmap.iter().position(|&free| free)? as u32;
        self.data_block_bitmap[id as usize] = false;
        sb.free_blocks_count -= 1;
        Some(id)
    }

    pub fn free_data_block(&mut self, block_id: u32) {
        let Some(sb) = self.superblock.as_mut() else { return };
        if block_id >= sb.total_blocks {
            eprintln!("warning: invalid block id {block_id} to free");
            return;
        }
        let idx = block_id as usize;
        if !self.data_block_bitmap[idx] {
            self.data_block_bitmap[idx] = true;
            sb.free_blocks_count += 1;
        } else {
            eprintln!("warning: data block {block_id} was already free");
        }
    }

    pub fn read_block(&self, block_id: u32) -> FsResult<Vec<u8>> {
        let sb = self
            .superblock
            .as_ref()
            .ok_or_else(|| FsError::Internal("disk not formatted".into()))?;
        if block_id >= sb.total_blocks {
            return Err(FsError::Internal(format!("block id {block_id} out of bounds")));
        }
        Ok(self.data_blocks[block_id as usize].clone())
    }

    pub fn write_block(&mut self, block_id: u32, data: &[u8]) -> FsResult<()> {
        let block_size = {
            let sb = self
                .superblock
                .as_ref()
                .ok_or_else(|| FsError::Internal("disk not formatted".into()))?;
            if block_id >= sb.total_blocks {
                return Err(FsError::Internal(format!("block id {block_id} out of bounds")));
            }
            if data.len() > sb.block_size as usize {
                return Err(FsError::Limit("data larger than block size".into()));
            }
            sb.block_size as usize
        };
        let mut buf = vec![0u8; block_size];
        buf[..data.len()].copy_from_slice(data);
        self.data_blocks[block_id as usize] = buf;
        Ok(())
    }

    pub fn get_inode(&self, inode_id: u32) -> Option<&Inode> {
        if !self.is_formatted {
            return None;
        }
        self.inode_table.get(inode_id as usize)?.as_ref()
    }

    pub fn get_inode_mut(&mut self, inode_id: u32) -> Option<&mut Inode> {
        if !self.is_formatted {
            return None;
        }
        self.inode_table.get_mut(inode_id as usize)?.as_mut()
    }

    /// Inserts a freshly allocated inode into the table at its own id.
    pub fn insert_inode(&mut self, inode: Inode) {
        let idx = inode.id as usize;
        self.inode_table[idx] = Some(inode);
    }

    /// Runs `f` with the inode at `inode_id` temporarily removed from the
    /// table so it can be mutated with `&mut self` available at the same
    /// time (e.g. to allocate a block while holding the inode).
    fn with_inode_taken<F, R>(&mut self, inode_id: u32, f: F) -> FsResult<R>
    where
        F: FnOnce(&mut Self, &mut Inode) -> FsResult<R>,
    {
        let slot = self
            .inode_table
            .get_mut(inode_id as usize)
            .ok_or_else(|| FsError::NotFound(format!("inode {inode_id}")))?;
        let mut inode = slot
            .take()
            .ok_or_else(|| FsError::NotFound(format!("inode {inode_id}")))?;
        let result = f(self, &mut inode);
        self.inode_table[inode_id as usize] = Some(inode);
        result
    }

    fn read_meta_block(&self, block_id: u32) -> FsResult<Vec<u32>> {
        let bytes = self.read_block(block_id)?;
        if bytes.len() < 4 {
            return Err(FsError::Corrupt("meta block too small to hold a count".into()));
        }
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let max_entries = (bytes.len() - 4) / 4;
        let count = count.min(max_entries);
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let off = 4 + i * 4;
            out.push(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        }
        Ok(out)
    }

    fn write_meta_block(&mut self, block_id: u32, ids: &[u32]) -> FsResult<()> {
        let block_size = self.block_size();
        let per_meta = self.entries_per_meta_block();
        if ids.len() > per_meta {
            return Err(FsError::Limit("too many entries for one indirect block".into()));
        }
        let mut buf = vec![0u8; block_size];
        buf[0..4].copy_from_slice(&(ids.len() as u32).to_le_bytes());
        for (i, id) in ids.iter().enumerate() {
            let off = 4 + i * 4;
            buf[off..off + 4].copy_from_slice(&id.to_le_bytes());
        }
        self.write_block(block_id, &buf)
    }

    /// The flat, ordered sequence of physical block ids reachable from an
    /// inode's direct/indirect/double-indirect maps. A pure function of the
    /// inode and the block store, per the indirect-block encoding design
    /// note.
    pub fn file_block_indices(&self, inode: &Inode) -> FsResult<Vec<u32>> {
        let mut out = inode.direct_blocks.clone();
        if let Some(ib) = inode.indirect_block {
            out.extend(self.read_meta_block(ib)?);
        }
        if let Some(dib) = inode.double_indirect_block {
            for meta_id in self.read_meta_block(dib)? {
                out.extend(self.read_meta_block(meta_id)?);
            }
        }
        Ok(out)
    }

    /// Places `block_id` at `logical_idx` in the inode's block map,
    /// allocating indirect/double-indirect meta blocks as needed. Assumes
    /// `logical_idx` is exactly the current map length (append-only).
    fn place_block_at(&mut self, inode: &mut Inode, logical_idx: usize, block_id: u32) -> FsResult<()> {
        if logical_idx < DIRECT_BLOCKS_MAX {
            inode.direct_blocks.push(block_id);
            return Ok(());
        }
        let per_meta = self.entries_per_meta_block();
        let idx_in_indirect = logical_idx - DIRECT_BLOCKS_MAX;
        if idx_in_indirect < per_meta {
            let ib = match inode.indirect_block {
                Some(b) => b,
                None => {
                    let b = self
                        .allocate_data_block()
                        .ok_or_else(|| FsError::NoSpace("no block for indirect map".into()))?;
                    self.write_meta_block(b, &[])?;
                    inode.indirect_block = Some(b);
                    b
                }
            };
            let mut ids = self.read_meta_block(ib)?;
            ids.push(block_id);
            self.write_meta_block(ib, &ids)?;
            return Ok(());
        }

        let idx_in_double = idx_in_indirect - per_meta;
        let meta_idx = idx_in_double / per_meta;
        let slot = idx_in_double % per_meta;
        let dib = match inode.double_indirect_block {
            Some(b) => b,
            None => {
                let b = self
                    .allocate_data_block()
                    .ok_or_else(|| FsError::NoSpace("no block for double-indirect map".into()))?;
                self.write_meta_block(b, &[])?;
                inode.double_indirect_block = Some(b);
                b
            }
        };
        let mut indirect_ids = self.read_meta_block(dib)?;
        let indirect_id = if meta_idx < indirect_ids.len() {
            indirect_ids[meta_idx]
        } else if meta_idx == indirect_ids.len() {
            let b = self
                .allocate_data_block()
                .ok_or_else(|| FsError::NoSpace("no block for double-indirect meta block".into()))?;
            self.write_meta_block(b, &[])?;
            indirect_ids.push(b);
            self.write_meta_block(dib, &indirect_ids)?;
            b
        } else {
            return Err(FsError::Internal(
                "non-contiguous growth of double-indirect map".into(),
            ));
        };
        let mut ids = self.read_meta_block(indirect_id)?;
        if slot != ids.len() {
            return Err(FsError::Internal(
                "non-contiguous slot within double-indirect leaf".into(),
            ));
        }
        ids.push(block_id);
        self.write_meta_block(indirect_id, &ids)?;
        Ok(())
    }

    /// Frees the indirect and double-indirect meta blocks (and, for the
    /// latter, the indirect blocks it points at) and clears the inode's
    /// references to them. Leaf data blocks are the caller's responsibility.
    fn free_meta_chain(&mut self, inode: &mut Inode) -> FsResult<()> {
        if let Some(dib) = inode.double_indirect_block.take() {
            for meta_id in self.read_meta_block(dib)? {
                self.free_data_block(meta_id);
            }
            self.free_data_block(dib);
        }
        if let Some(ib) = inode.indirect_block.take() {
            self.free_data_block(ib);
        }
        Ok(())
    }

    /// Ensures the inode's block map has a physical block at `logical_idx`,
    /// allocating one if `logical_idx` is exactly the current map length.
    /// Returns `FsError::Internal` for any other (non-contiguous) index.
    pub fn ensure_nth_block(&mut self, inode_id: u32, logical_idx: usize) -> FsResult<u32> {
        self.with_inode_taken(inode_id, |dm, inode| {
            let existing = dm.file_block_indices(inode)?;
            if logical_idx < existing.len() {
                return Ok(existing[logical_idx]);
            }
            if logical_idx != existing.len() {
                return Err(FsError::Internal("non-contiguous logical block access".into()));
            }
            let new_block = dm
                .allocate_data_block()
                .ok_or_else(|| FsError::NoSpace("no free data blocks".into()))?;
            if let Err(e) = dm.place_block_at(inode, existing.len(), new_block) {
                dm.free_data_block(new_block);
                return Err(e);
            }
            inode.blocks_count += 1;
            Ok(new_block)
        })
    }

    /// Frees every block (data, indirect, double-indirect) reachable from
    /// the inode's map and clears it back to empty.
    pub fn free_file_blocks(&mut self, inode_id: u32) -> FsResult<()> {
        self.with_inode_taken(inode_id, |dm, inode| {
            let data_ids = dm.file_block_indices(inode)?;
            for b in data_ids {
                dm.free_data_block(b);
            }
            dm.free_meta_chain(inode)?;
            inode.direct_blocks.clear();
            inode.blocks_count = 0;
            inode.size = 0;
            Ok(())
        })
    }

    /// Shrinks the inode's block map down to its first `keep` logical
    /// blocks, freeing the tail (and any now-unused meta blocks).
    pub fn shrink_file_blocks(&mut self, inode_id: u32, keep: usize) -> FsResult<()> {
        self.with_inode_taken(inode_id, |dm, inode| {
            let all = dm.file_block_indices(inode)?;
            if keep >= all.len() {
                return Ok(());
            }
            for &b in &all[keep..] {
                dm.free_data_block(b);
            }
            let kept = all[..keep].to_vec();
            dm.free_meta_chain(inode)?;
            inode.direct_blocks.clear();
            for (i, b) in kept.into_iter().enumerate() {
                dm.place_block_at(inode, i, b)?;
            }
            inode.blocks_count = keep as u32;
            Ok(())
        })
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_disk() -> DiskManager {
        let mut dm = DiskManager::new();
        dm.format(FormatOptions {
            n_inodes: 16,
            n_blocks: 32,
            block_size: 128,
        })
        .unwrap();
        dm
    }

    #[test]
    fn format_creates_root_with_expected_free_counts() {
        let dm = small_disk();
        let sb = dm.superblock().unwrap();
        assert_eq!(sb.free_inodes_count, 15);
        assert_eq!(sb.free_blocks_count, 31);
        assert!(sb.root_inode_id.is_some());
    }

    #[test]
    fn format_is_idempotent() {
        let mut dm = small_disk();
        dm.format(FormatOptions {
            n_inodes: 16,
            n_blocks: 32,
            block_size: 128,
        })
        .unwrap();
        let sb = dm.superblock().unwrap();
        assert_eq!(sb.free_inodes_count, 15);
        assert_eq!(sb.free_blocks_count, 31);
    }

    #[test]
    fn block_growth_spills_into_indirect_map() {
        let mut dm = small_disk();
        let id = dm.allocate_inode(0).unwrap();
        let perms = Permission::from_octal(0o644).unwrap();
        dm.insert_inode(Inode::new(id, FileType::File, 0, perms, 0));
        // per_meta = (128 - 4) / 4 = 31 entries; direct cap is 12.
        for i in 0..20 {
            dm.ensure_nth_block(id, i).unwrap();
        }
        let inode = dm.get_inode(id).unwrap();
        assert_eq!(inode.direct_blocks.len(), DIRECT_BLOCKS_MAX);
        assert!(inode.indirect_block.is_some());
        assert_eq!(dm.file_block_indices(inode).unwrap().len(), 20);
    }

    #[test]
    fn shrink_frees_tail_blocks() {
        let mut dm = small_disk();
        let id = dm.allocate_inode(0).unwrap();
        let perms = Permission::from_octal(0o644).unwrap();
        dm.insert_inode(Inode::new(id, FileType::File, 0, perms, 0));
        for i in 0..5 {
            dm.ensure_nth_block(id, i).unwrap();
        }
        let free_before = dm.superblock().unwrap().free_blocks_count;
        dm.shrink_file_blocks(id, 2).unwrap();
        let free_after = dm.superblock().unwrap().free_blocks_count;
        assert_eq!(free_after, free_before + 3);
        assert_eq!(dm.get_inode(id).unwrap().blocks_count, 2);
    }

    #[test]
    fn non_contiguous_block_access_is_internal_error() {
        let mut dm = small_disk();
        let id = dm.allocate_inode(0).unwrap();
        let perms = Permission::from_octal(0o644).unwrap();
        dm.insert_inode(Inode::new(id, FileType::File, 0, perms, 0));
        let err = dm.ensure_nth_block(id, 5).unwrap_err();
        assert!(matches!(err, FsError::Internal(_)));
    }
}
