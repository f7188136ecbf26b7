//! Partitioning an archive for coordination-free parallel scans.
//!
//! The chunker works purely over the block index (offsets, lengths, game
//! counts), so split-point discovery is O(block_count) and touches zero
//! payload bytes. Each resulting range is a contiguous run of whole
//! blocks; blocks never share bytes and the dedup tables are read-only at
//! this point, so workers need no synchronization at all.
//!
//! Balancing is greedy over cumulative byte lengths, not optimal
//! bin-packing. Blocks are already roughly uniform by construction, so
//! the cheap heuristic lands close enough.

use std::ops::Range;

use crate::reader::{Archive, GameIter};

/// A contiguous run of blocks assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub first_block: usize,
    pub block_count: usize,
    /// File offset of the first block's length prefix.
    pub start_offset: u64,
    /// Total bytes covered, prefixes included.
    pub byte_len: u64,
    pub game_count: u64,
}

impl ChunkRange {
    pub fn blocks(&self) -> Range<usize> {
        self.first_block..self.first_block + self.block_count
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// The byte range `[start_offset, start_offset + byte_len)` a worker
    /// may restrict its reads to.
    pub fn byte_range(&self) -> Range<u64> {
        self.start_offset..self.start_offset + self.byte_len
    }
}

/// Partitions the block index into exactly `n` ordered, contiguous,
/// disjoint ranges with roughly equal byte sizes. Every block lands in
/// exactly one range; trailing ranges are empty when the archive has
/// fewer blocks than `n`.
pub fn split(archive: &Archive, n: usize) -> Vec<ChunkRange> {
    let n = n.max(1);
    let descriptors = archive.descriptors();
    let mut remaining_bytes: u64 = descriptors.iter().map(|d| d.length).sum();
    let mut chunks = Vec::with_capacity(n);
    let mut block = 0usize;
    let mut end_offset = descriptors.first().map_or(0, |d| d.offset);

    for chunk_index in 0..n {
        let chunks_left = n - chunk_index;
        let blocks_left = descriptors.len() - block;
        // Aim each chunk at an even share of what is still unassigned.
        // Leave later chunks a block each where supply allows, but a chunk
        // always takes at least one block while any remain.
        let target = remaining_bytes.div_ceil(chunks_left as u64);
        let takeable = match blocks_left {
            0 => 0,
            _ => blocks_left.saturating_sub(chunks_left - 1).max(1),
        };
        let mut bytes = 0u64;
        let mut games = 0u64;
        let mut count = 0usize;
        while count < takeable && bytes < target {
            let desc = &descriptors[block + count];
            bytes += desc.length;
            games += u64::from(desc.games);
            count += 1;
        }
        chunks.push(ChunkRange {
            first_block: block,
            block_count: count,
            start_offset: end_offset,
            byte_len: bytes,
            game_count: games,
        });
        block += count;
        end_offset += bytes;
        remaining_bytes -= bytes;
    }
    debug_assert_eq!(block, descriptors.len());
    chunks
}

/// `split` with one range per available CPU.
pub fn split_auto(archive: &Archive) -> Vec<ChunkRange> {
    split(archive, num_cpus::get())
}

/// Runs `f` over every chunk in parallel and returns the results in chunk
/// order. Workers get disjoint block ranges and an iterator restricted to
/// them; results funnel through a channel to a coordinator that restores
/// deterministic order, so the concatenation of the outputs matches a
/// single sequential scan.
pub fn scan<T, F>(archive: &Archive, n: usize, f: F) -> Vec<T>
where
    F: Fn(ChunkRange, GameIter<'_>) -> T + Sync,
    T: Send,
{
    let ranges = split(archive, n);
    let (result_tx, result_rx) = crossbeam_channel::bounded(ranges.len());
    let mut results: Vec<(usize, T)> = Vec::with_capacity(ranges.len());

    rayon::scope(|s| {
        for (chunk_index, range) in ranges.iter().copied().enumerate() {
            let result_tx = result_tx.clone();
            let f = &f;
            s.spawn(move |_| {
                let output = f(range, archive.iter_blocks(range.blocks()));
                // a dropped receiver just means the coordinator is gone
                let _ = result_tx.send((chunk_index, output));
            });
        }
        drop(result_tx);

        // Coordinator runs inside the scope, collecting while workers go.
        for pair in result_rx.iter() {
            results.push(pair);
        }
    });

    results.sort_by_key(|&(chunk_index, _)| chunk_index);
    results.into_iter().map(|(_, output)| output).collect()
}
