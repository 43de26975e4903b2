use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::file::FileMapper;
use crate::message::{Bitfield, PieceIndex, BLOCK};
use crate::torrent::ContentDescriptor;

use super::verify_piece;

/// Outcome of delivering one block to the registry (SPEC_FULL.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Duplicate,
    Progress,
    PieceVerified,
    PieceCorrupt,
}

/// Partial state for one piece currently being assembled. Created on first
/// block arrival, destroyed on completion or digest mismatch (SPEC_FULL.md §3).
struct PieceProgress {
    buffer: Vec<u8>,
    blocks_received: Vec<bool>,
    bytes_received: u32,
}

impl PieceProgress {
    fn new(piece_len: u32) -> Self {
        let num_blocks = piece_len.div_ceil(BLOCK) as usize;
        Self {
            buffer: vec![0u8; piece_len as usize],
            blocks_received: vec![false; num_blocks],
            bytes_received: 0,
        }
    }
}

struct Inner {
    bitfield: Bitfield,
    in_progress: HashMap<PieceIndex, PieceProgress>,
}

/// Canonical owner of per-piece completion and in-flight block assembly
/// (SPEC_FULL.md §4.1). Shared by every Peer Session and the Swarm Supervisor;
/// created once and lives for the process.
pub struct PieceRegistry {
    inner: RwLock<Inner>,
    total_transferred: AtomicU64,
    piece_length: u32,
    total_size: u64,
    piece_digests: Vec<[u8; 20]>,
    file_mapper: FileMapper,
}

impl PieceRegistry {
    pub fn new(content: &ContentDescriptor, file_mapper: FileMapper) -> Self {
        Self {
            inner: RwLock::new(Inner {
                bitfield: Bitfield::new(content.num_pieces()),
                in_progress: HashMap::new(),
            }),
            total_transferred: AtomicU64::new(0),
            piece_length: content.piece_length,
            total_size: content.total_size,
            piece_digests: content.piece_digests.clone(),
            file_mapper,
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_digests.len()
    }

    /// Actual length of piece `index`; every piece is `piece_length` bytes
    /// except possibly the last (SPEC_FULL.md §3).
    pub fn piece_len(&self, index: PieceIndex) -> u32 {
        let index = index as u64;
        let last = self.num_pieces() as u64 - 1;
        if index == last {
            (self.total_size - last * self.piece_length as u64) as u32
        } else {
            self.piece_length
        }
    }

    /// Lowest-index piece the peer has and we lack, deterministically, with no
    /// rarity tracking (SPEC_FULL.md §4.1/§9).
    pub fn pick_piece(&self, peer_bitfield: &Bitfield) -> Option<PieceIndex> {
        let inner = self.inner.read().unwrap();
        (0..self.num_pieces() as u32).find(|&i| {
            peer_bitfield.has_piece(i as usize) && !inner.bitfield.has_piece(i as usize)
        })
    }

    /// A snapshot of the canonical bitfield, sent to peers on connect.
    pub fn bitfield_snapshot(&self) -> Bitfield {
        self.inner.read().unwrap().bitfield.clone()
    }

    /// Delivers one block. Alignment-based deduplication: a block is keyed by
    /// `begin / BLOCK`, matching the simpler policy SPEC_FULL.md §4.1 permits
    /// (non-block-aligned `begin` is accepted and copied, but not separately
    /// range-checked against neighboring blocks — see DESIGN.md).
    pub fn add_block(&self, index: PieceIndex, begin: u32, bytes: &[u8]) -> BlockOutcome {
        if index as usize >= self.num_pieces() {
            return BlockOutcome::Duplicate;
        }

        {
            let inner = self.inner.read().unwrap();
            if inner.bitfield.has_piece(index as usize) {
                return BlockOutcome::Duplicate;
            }
        }

        let piece_len = self.piece_len(index);
        let block_idx = (begin / BLOCK) as usize;
        let len = bytes.len() as u32;

        let completed_buffer = {
            let mut inner = self.inner.write().unwrap();
            if inner.bitfield.has_piece(index as usize) {
                return BlockOutcome::Duplicate;
            }

            let progress = inner
                .in_progress
                .entry(index)
                .or_insert_with(|| PieceProgress::new(piece_len));

            if block_idx >= progress.blocks_received.len()
                || begin.saturating_add(len) > piece_len
                || progress.blocks_received[block_idx]
            {
                return BlockOutcome::Duplicate;
            }

            let start = begin as usize;
            progress.buffer[start..start + bytes.len()].copy_from_slice(bytes);
            progress.blocks_received[block_idx] = true;
            progress.bytes_received += len;
            self.total_transferred.fetch_add(len as u64, Ordering::Relaxed);

            if progress.bytes_received < piece_len {
                return BlockOutcome::Progress;
            }

            inner.in_progress.remove(&index).unwrap().buffer
        };

        // Digest check and disk write happen without holding the registry lock,
        // so a slow write never stalls other sessions' reads (SPEC_FULL.md §4.1).
        let expected = &self.piece_digests[index as usize];
        if !verify_piece(&completed_buffer, expected) {
            warn!(piece = index, "digest mismatch, piece reset for retry");
            return BlockOutcome::PieceCorrupt;
        }

        if let Err(e) = self.file_mapper.write_piece(index, &completed_buffer) {
            warn!(piece = index, error = %e, "failed to persist piece, retrying");
            return BlockOutcome::PieceCorrupt;
        }

        let mut inner = self.inner.write().unwrap();
        inner.bitfield.set_piece(index as usize);
        debug!(piece = index, "piece verified and written");
        BlockOutcome::PieceVerified
    }

    pub fn downloaded_bytes(&self) -> u64 {
        let ones = self.inner.read().unwrap().bitfield.count_ones() as u64;
        std::cmp::min(ones * self.piece_length as u64, self.total_size)
    }

    pub fn left_bytes(&self) -> u64 {
        self.total_size - self.downloaded_bytes()
    }

    pub fn total_transferred(&self) -> u64 {
        self.total_transferred.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry(piece_length: u32, total_size: u64, digests: Vec<[u8; 20]>, dir: &std::path::Path) -> PieceRegistry {
        let content = ContentDescriptor {
            piece_length,
            total_size,
            piece_digests: digests,
            files: vec![(PathBuf::from("out.bin"), total_size)],
            info_hash: [0u8; 20],
            announce: "http://tracker.example/announce".to_string(),
        };
        let mapper = FileMapper::new(dir, &content.files, piece_length).unwrap();
        PieceRegistry::new(&content, mapper)
    }

    fn digest(bytes: &[u8]) -> [u8; 20] {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        hasher.finalize().into()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("torrent_rs_registry_test_{}_{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn s1_single_piece_single_file() {
        let dir = scratch_dir("s1");
        let data = vec![5u8; 16];
        let reg = registry(16, 16, vec![digest(&data)], &dir);

        let peer_bf = Bitfield::from_bytes(vec![0b1000_0000]);
        assert_eq!(reg.pick_piece(&peer_bf), Some(0));

        let outcome = reg.add_block(0, 0, &data);
        assert_eq!(outcome, BlockOutcome::PieceVerified);
        assert_eq!(reg.bitfield_snapshot().as_bytes(), &[0b1000_0000]);
        assert_eq!(std::fs::read(dir.join("out.bin")).unwrap(), data);
    }

    #[test]
    fn s2_last_piece_short_out_of_order() {
        let dir = scratch_dir("s2");
        let p0 = vec![0u8; 8];
        let p1 = vec![1u8; 8];
        let p2 = vec![2u8; 4];
        let reg = registry(8, 20, vec![digest(&p0), digest(&p1), digest(&p2)], &dir);

        assert_eq!(reg.add_block(0, 0, &p0), BlockOutcome::PieceVerified);
        assert_eq!(reg.add_block(2, 0, &p2), BlockOutcome::PieceVerified);
        assert_eq!(reg.add_block(1, 0, &p1), BlockOutcome::PieceVerified);

        assert_eq!(reg.bitfield_snapshot().as_bytes(), &[0b1110_0000]);
        assert_eq!(reg.downloaded_bytes(), 20);

        let mut expected = p0.clone();
        expected.extend(&p1);
        expected.extend(&p2);
        assert_eq!(std::fs::read(dir.join("out.bin")).unwrap(), expected);
    }

    #[test]
    fn s3_corrupt_piece_then_retry() {
        let dir = scratch_dir("s3");
        let good = vec![5u8; 16];
        let bad = vec![9u8; 16];
        let reg = registry(16, 16, vec![digest(&good)], &dir);

        assert_eq!(reg.add_block(0, 0, &bad), BlockOutcome::PieceCorrupt);
        assert_eq!(reg.bitfield_snapshot().count_ones(), 0);
        assert_eq!(reg.total_transferred(), 16);

        assert_eq!(reg.add_block(0, 0, &good), BlockOutcome::PieceVerified);
        assert_eq!(reg.total_transferred(), 32);
        assert_eq!(reg.downloaded_bytes(), 16);
    }

    #[test]
    fn s4_duplicate_block_never_double_counts() {
        let dir = scratch_dir("s4");
        let mut data = vec![1u8; BLOCK as usize];
        data.extend(vec![2u8; BLOCK as usize]);
        let reg = registry(BLOCK * 2, BLOCK as u64 * 2, vec![digest(&data)], &dir);

        assert_eq!(
            reg.add_block(0, 0, &data[0..BLOCK as usize]),
            BlockOutcome::Progress
        );
        assert_eq!(
            reg.add_block(0, 0, &data[0..BLOCK as usize]),
            BlockOutcome::Duplicate
        );
        assert_eq!(
            reg.add_block(0, BLOCK, &data[BLOCK as usize..]),
            BlockOutcome::PieceVerified
        );
    }

    #[test]
    fn s5_multi_file_piece_split() {
        let dir = scratch_dir("s5");
        let piece: Vec<u8> = (0..16u8).collect();
        let content = ContentDescriptor {
            piece_length: 16,
            total_size: 16,
            piece_digests: vec![digest(&piece)],
            files: vec![
                (PathBuf::from("a.bin"), 10),
                (PathBuf::from("b.bin"), 6),
            ],
            info_hash: [0u8; 20],
            announce: "http://tracker.example/announce".to_string(),
        };
        let mapper = FileMapper::new(&dir, &content.files, 16).unwrap();
        let reg = PieceRegistry::new(&content, mapper);

        assert_eq!(reg.add_block(0, 0, &piece), BlockOutcome::PieceVerified);
        assert_eq!(std::fs::read(dir.join("a.bin")).unwrap(), piece[..10]);
        assert_eq!(std::fs::read(dir.join("b.bin")).unwrap(), piece[10..]);
    }

    #[test]
    fn out_of_range_index_is_duplicate() {
        let dir = scratch_dir("oor");
        let reg = registry(16, 16, vec![digest(&[0u8; 16])], &dir);
        assert_eq!(reg.add_block(5, 0, &[1, 2, 3]), BlockOutcome::Duplicate);
    }

    #[test]
    fn verified_piece_rejects_further_blocks() {
        let dir = scratch_dir("verified_dup");
        let data = vec![5u8; 16];
        let reg = registry(16, 16, vec![digest(&data)], &dir);
        assert_eq!(reg.add_block(0, 0, &data), BlockOutcome::PieceVerified);
        assert_eq!(reg.add_block(0, 0, &data), BlockOutcome::Duplicate);
        assert_eq!(reg.bitfield_snapshot().count_ones(), 1);
    }

    #[test]
    fn pick_piece_is_lowest_missing_index() {
        let dir = scratch_dir("pick");
        let p0 = vec![0u8; 4];
        let p1 = vec![1u8; 4];
        let reg = registry(4, 8, vec![digest(&p0), digest(&p1)], &dir);
        let peer_bf = Bitfield::from_bytes(vec![0b1100_0000]);

        assert_eq!(reg.pick_piece(&peer_bf), Some(0));
        reg.add_block(0, 0, &p0);
        assert_eq!(reg.pick_piece(&peer_bf), Some(1));
        reg.add_block(1, 0, &p1);
        assert_eq!(reg.pick_piece(&peer_bf), None);
    }
}
