//! Single-writer archive construction.
//!
//! The builder drives the whole encode pipeline: intern metadata strings
//! and opening prefixes, encode each record, batch records into blocks,
//! and finalize the archive layout. Finished blocks are spooled to an
//! anonymous temp file as they close, so peak memory is one open block
//! plus the interners. The header, dedup tables and index can only be
//! written once the last game has been seen; the spool lets the payload
//! bytes be laid down after them without a second encode pass.
//!
//! Id allocation order is part of the persisted format, so one build must
//! feed its interners sequentially. Builds of independent archives are
//! free to run in parallel.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::BytesMut;
use tracing::{debug, info};

use crate::block::BlockBuilder;
use crate::codec::{encode_record, MetaIds};
use crate::error::{ArchiveError, Result};
use crate::format::{
    encode_header, encode_index, encode_tables, metadata_len, BlockDescriptor, LEN_PREFIX,
};
use crate::game::GameRecord;
use crate::intern::{Category, InternerSet};

/// Tuning knobs for an archive build.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// Advisory upper bound on a block payload, in bytes. A block closes
    /// when the next record would push it past this; a single record
    /// larger than the whole threshold still gets its own block.
    pub target_block_size: usize,
    /// How many leading move tokens form the shared opening prefix. Games
    /// shorter than this store their moves inline. Zero disables opening
    /// dedup entirely.
    pub opening_prefix_len: usize,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            target_block_size: 256 * 1024,
            opening_prefix_len: 12,
        }
    }
}

/// What a finished build looked like.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSummary {
    pub games: u64,
    pub blocks: usize,
    pub player_entries: u32,
    pub tag_entries: u32,
    pub opening_entries: u32,
    /// Total payload bytes including per-block length prefixes.
    pub payload_bytes: u64,
}

struct PendingBlock {
    /// Prefix plus payload bytes in the spool.
    length: u64,
    games: u32,
}

/// Streams game records in, emits one immutable archive at `finish`.
pub struct ArchiveBuilder {
    options: BuilderOptions,
    interners: InternerSet,
    block: BlockBuilder,
    scratch: BytesMut,
    prefix_scratch: Vec<u8>,
    spool: File,
    pending: Vec<PendingBlock>,
    payload_bytes: u64,
    games: u64,
}

impl ArchiveBuilder {
    /// Creates a builder with default options.
    pub fn new() -> Result<Self> {
        Self::with_options(BuilderOptions::default())
    }

    pub fn with_options(options: BuilderOptions) -> Result<Self> {
        let spool = tempfile::tempfile()?;
        Ok(Self {
            options,
            interners: InternerSet::new(),
            block: BlockBuilder::new(),
            scratch: BytesMut::new(),
            prefix_scratch: Vec::new(),
            spool,
            pending: Vec::new(),
            payload_bytes: 0,
            games: 0,
        })
    }

    /// Number of games added so far.
    pub fn game_count(&self) -> u64 {
        self.games
    }

    /// Interns, encodes and batches one game.
    pub fn add_game(&mut self, game: &GameRecord) -> Result<()> {
        let ids = MetaIds {
            white: self.interners.intern(Category::Player, game.white.as_bytes()),
            black: self.interners.intern(Category::Player, game.black.as_bytes()),
            event: self.interners.intern(Category::Tag, game.event.as_bytes()),
            site: self.interners.intern(Category::Tag, game.site.as_bytes()),
            date: self.interners.intern(Category::Tag, game.date.as_bytes()),
            eco: self.interners.intern(Category::Tag, game.eco.as_bytes()),
        };

        let prefix_len = self.options.opening_prefix_len;
        let (opening, suffix) = if prefix_len > 0 && game.moves.len() >= prefix_len {
            self.prefix_scratch.clear();
            for token in &game.moves[..prefix_len] {
                self.prefix_scratch.extend_from_slice(&token.0.to_le_bytes());
            }
            let id = self.interners.intern(Category::Opening, &self.prefix_scratch);
            (Some(id), &game.moves[prefix_len..])
        } else {
            (None, &game.moves[..])
        };

        let tag_ids: Vec<(u32, u32)> = game
            .tags
            .iter()
            .map(|(key, value)| {
                (
                    self.interners.intern(Category::Tag, key.as_bytes()),
                    self.interners.intern(Category::Tag, value.as_bytes()),
                )
            })
            .collect();

        self.scratch.clear();
        encode_record(
            &mut self.scratch,
            ids,
            game.result.to_byte(),
            opening,
            suffix,
            &tag_ids,
        );

        // Close the running block first when this record would overflow it.
        // The +4 accounts for the record's slot in the offset table.
        let projected = self.block.encoded_len() + self.scratch.len() + 4;
        if !self.block.is_empty() && projected > self.options.target_block_size {
            self.flush_block()?;
        }
        self.block.add(&self.scratch);
        self.games += 1;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        let games = self.block.len() as u32;
        let payload = self.block.finish();
        self.spool.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.spool.write_all(&payload)?;
        let length = LEN_PREFIX + payload.len() as u64;
        self.payload_bytes += length;
        self.pending.push(PendingBlock { length, games });
        debug!(
            block = self.pending.len() - 1,
            games,
            bytes = length,
            "closed block"
        );
        Ok(())
    }

    /// Freezes the dedup tables and writes the complete archive.
    pub fn finish<W: Write>(mut self, writer: W) -> Result<ArchiveSummary> {
        if !self.block.is_empty() {
            self.flush_block()?;
        }

        let tables = encode_tables(&self.interners);
        let base = metadata_len(tables.len(), self.pending.len());
        let mut descriptors = Vec::with_capacity(self.pending.len());
        let mut offset = base;
        for pending in &self.pending {
            descriptors.push(BlockDescriptor {
                offset,
                length: pending.length,
                games: pending.games,
            });
            offset += pending.length;
        }

        let mut out = BufWriter::new(writer);
        out.write_all(&encode_header(self.games, Category::ALL.len() as u16))?;
        out.write_all(&tables)?;
        out.write_all(&encode_index(&descriptors))?;
        self.spool.seek(SeekFrom::Start(0))?;
        io::copy(&mut self.spool, &mut out)?;
        out.flush()?;

        let summary = ArchiveSummary {
            games: self.games,
            blocks: descriptors.len(),
            player_entries: self.interners.by_category(Category::Player).len(),
            tag_entries: self.interners.by_category(Category::Tag).len(),
            opening_entries: self.interners.by_category(Category::Opening).len(),
            payload_bytes: self.payload_bytes,
        };
        info!(
            games = summary.games,
            blocks = summary.blocks,
            players = summary.player_entries,
            tags = summary.tag_entries,
            openings = summary.opening_entries,
            "finished archive"
        );
        Ok(summary)
    }

    /// `finish` into a freshly created file.
    pub fn finish_to_path(self, path: &Path) -> Result<ArchiveSummary> {
        let file = File::create(path).map_err(|e| ArchiveError::Io {
            source: e,
            path: path.to_path_buf(),
        })?;
        self.finish(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameRecord, GameResult, MoveToken};

    fn game(white: &str, moves: usize) -> GameRecord {
        GameRecord {
            white: white.to_string(),
            black: "NN".to_string(),
            event: "Test".to_string(),
            site: "Nowhere".to_string(),
            date: "2024.01.01".to_string(),
            eco: "A00".to_string(),
            result: GameResult::Draw,
            moves: (0..moves).map(|i| MoveToken(i as u32)).collect(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn empty_build_produces_valid_bytes() {
        let builder = ArchiveBuilder::new().unwrap();
        let mut bytes = Vec::new();
        let summary = builder.finish(&mut bytes).unwrap();
        assert_eq!(summary.games, 0);
        assert_eq!(summary.blocks, 0);
        let meta = crate::format::parse_metadata(&bytes).unwrap();
        assert_eq!(meta.game_count, 0);
        assert!(meta.index.is_empty());
    }

    #[test]
    fn shared_opening_prefix_is_interned_once() {
        let mut builder = ArchiveBuilder::new().unwrap();
        // 20 moves each, identical first 12 → one opening entry
        builder.add_game(&game("a", 20)).unwrap();
        builder.add_game(&game("b", 20)).unwrap();
        assert_eq!(builder.interners.by_category(Category::Opening).len(), 1);
    }

    #[test]
    fn short_games_skip_opening_dedup() {
        let mut builder = ArchiveBuilder::new().unwrap();
        builder.add_game(&game("a", 5)).unwrap();
        assert_eq!(builder.interners.by_category(Category::Opening).len(), 0);
    }

    #[test]
    fn block_size_threshold_splits_blocks() {
        let options = BuilderOptions {
            target_block_size: 200,
            ..BuilderOptions::default()
        };
        let mut builder = ArchiveBuilder::with_options(options).unwrap();
        for i in 0..10 {
            builder.add_game(&game(&format!("p{}", i), 30)).unwrap();
        }
        let mut bytes = Vec::new();
        let summary = builder.finish(&mut bytes).unwrap();
        assert!(summary.blocks > 1, "expected multiple blocks, got {}", summary.blocks);
        let meta = crate::format::parse_metadata(&bytes).unwrap();
        let games: u64 = meta.index.iter().map(|d| u64::from(d.games)).sum();
        assert_eq!(games, 10);
        // no block is empty
        assert!(meta.index.iter().all(|d| d.games > 0));
    }

    #[test]
    fn oversized_record_still_gets_a_block() {
        let options = BuilderOptions {
            target_block_size: 64,
            ..BuilderOptions::default()
        };
        let mut builder = ArchiveBuilder::with_options(options).unwrap();
        builder.add_game(&game("giant", 500)).unwrap();
        let mut bytes = Vec::new();
        let summary = builder.finish(&mut bytes).unwrap();
        assert_eq!(summary.blocks, 1);
        assert_eq!(summary.games, 1);
    }

    #[test]
    fn descriptors_tile_the_payload_region() {
        let mut builder = ArchiveBuilder::with_options(BuilderOptions {
            target_block_size: 150,
            ..BuilderOptions::default()
        })
        .unwrap();
        for i in 0..8 {
            builder.add_game(&game(&format!("p{}", i), 4)).unwrap();
        }
        let mut bytes = Vec::new();
        builder.finish(&mut bytes).unwrap();
        let meta = crate::format::parse_metadata(&bytes).unwrap();
        let mut expected = meta.payload_base;
        for desc in &meta.index {
            assert_eq!(desc.offset, expected);
            expected = desc.end_offset();
        }
        assert_eq!(expected, bytes.len() as u64);
    }
}
