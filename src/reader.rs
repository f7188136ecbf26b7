//! Read side: map an archive, validate its metadata, serve games.
//!
//! `open` memory-maps the file and eagerly parses only the small
//! fixed-layout metadata (header, dedup table directory, block index).
//! Payload bytes are untouched until a game is requested; a block is then
//! framed, validated and viewed in place, with no decode pass and no
//! allocation proportional to record count. Damage to one block surfaces as a typed
//! error on access to that block alone, so a partially corrupt archive
//! still serves its healthy blocks.
//!
//! Once open, an archive is immutable and every method takes `&self`:
//! any number of threads may read concurrently with no locking.

use std::fs::File;
use std::ops::Range;
use std::path::Path;

use bytes::Buf;
use memmap2::Mmap;
use tracing::info;

use crate::block::BlockView;
use crate::codec::RecordView;
use crate::error::{ArchiveError, Result};
use crate::format::{parse_metadata, BlockDescriptor, TableDirectory, LEN_PREFIX};
use crate::game::{GameRecord, GameResult, MoveToken};
use crate::intern::Category;

enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Source::Mapped(map) => map,
            Source::Owned(vec) => vec,
        }
    }
}

/// An open, immutable archive.
pub struct Archive {
    source: Source,
    game_count: u64,
    tables: TableDirectory,
    index: Vec<BlockDescriptor>,
    /// `cumulative[i]` = games in blocks `0..i`; one extra entry holds the total.
    cumulative: Vec<u64>,
}

impl Archive {
    /// Maps the file at `path` and validates its metadata.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ArchiveError::Io {
            source: e,
            path: path.to_path_buf(),
        })?;
        let map = unsafe { Mmap::map(&file) }.map_err(|e| ArchiveError::Io {
            source: e,
            path: path.to_path_buf(),
        })?;
        Self::from_source(Source::Mapped(map))
    }

    /// Opens an archive already held in memory (tests, network payloads).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(Source::Owned(bytes))
    }

    fn from_source(source: Source) -> Result<Self> {
        let meta = parse_metadata(source.bytes())?;
        let mut cumulative = Vec::with_capacity(meta.index.len() + 1);
        let mut running = 0u64;
        cumulative.push(0);
        for desc in &meta.index {
            running += u64::from(desc.games);
            cumulative.push(running);
        }
        info!(
            games = meta.game_count,
            blocks = meta.index.len(),
            "opened archive"
        );
        Ok(Self {
            source,
            game_count: meta.game_count,
            tables: meta.tables,
            index: meta.index,
            cumulative,
        })
    }

    pub fn game_count(&self) -> u64 {
        self.game_count
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.game_count == 0
    }

    /// The block index, in file order. Cheap metadata only; this is what
    /// the chunker partitions.
    pub fn descriptors(&self) -> &[BlockDescriptor] {
        &self.index
    }

    /// Global index of the first game in block `i`.
    pub fn first_game_of_block(&self, block: usize) -> u64 {
        self.cumulative[block]
    }

    /// Number of entries in one dedup table.
    pub fn table_len(&self, category: Category) -> u32 {
        self.tables.table_len(category)
    }

    /// Raw bytes of one dedup table entry.
    pub fn table_entry(&self, category: Category, id: u32) -> Result<&[u8]> {
        self.tables.resolve(self.data(), category, id)
    }

    fn data(&self) -> &[u8] {
        self.source.bytes()
    }

    /// Frames and validates block `i`. Payload bytes are only read here.
    pub(crate) fn decode_block(&self, block: usize) -> Result<BlockView<'_>> {
        let desc = self.index[block];
        let data = self.data();
        if desc.end_offset() > data.len() as u64 {
            return Err(ArchiveError::TruncatedArchive {
                offset: desc.offset,
                needed: desc.length,
                available: (data.len() as u64).saturating_sub(desc.offset),
            });
        }
        let at = desc.offset as usize;
        let prefix = u64::from_le_bytes(data[at..at + LEN_PREFIX as usize].try_into().unwrap());
        if prefix != desc.payload_len() {
            return Err(ArchiveError::CorruptBlock {
                block,
                detail: format!(
                    "length prefix {} disagrees with index entry ({})",
                    prefix,
                    desc.payload_len()
                ),
            });
        }
        let payload = &data[at + LEN_PREFIX as usize..at + desc.length as usize];
        let view = BlockView::new(payload)
            .map_err(|detail| ArchiveError::CorruptBlock { block, detail: detail.into() })?;
        if view.len() != desc.games as usize {
            return Err(ArchiveError::CorruptBlock {
                block,
                detail: format!(
                    "index claims {} games, payload holds {}",
                    desc.games,
                    view.len()
                ),
            });
        }
        Ok(view)
    }

    /// Random access by global game index.
    pub fn get(&self, index: u64) -> Result<GameView<'_>> {
        if index >= self.game_count {
            return Err(ArchiveError::OutOfRange {
                index,
                game_count: self.game_count,
            });
        }
        // cumulative is strictly increasing (blocks are never empty), so
        // this lands on the owning block in O(log block_count).
        let block = match self.cumulative.binary_search(&index) {
            Ok(b) => b,
            Err(b) => b - 1,
        };
        let view = self.decode_block(block)?;
        let local = (index - self.cumulative[block]) as usize;
        let record = view
            .get(local)
            .map_err(|detail| ArchiveError::CorruptBlock { block, detail: detail.into() })?;
        Ok(GameView { archive: self, block, record })
    }

    /// All games in archive order. Each block is decoded at most once.
    pub fn iter(&self) -> GameIter<'_> {
        self.iter_blocks(0..self.index.len())
    }

    /// Games of a contiguous block range, in archive order. This is the
    /// entry point parallel workers use with chunker-assigned ranges.
    pub fn iter_blocks(&self, blocks: Range<usize>) -> GameIter<'_> {
        GameIter {
            archive: self,
            next_block: blocks.start,
            end_block: blocks.end.min(self.index.len()),
            current: None,
            skip_in_first: 0,
            remaining: u64::MAX,
        }
    }

    /// Games `range.start..range.end` by global index, in archive order.
    pub fn iter_range(&self, range: Range<u64>) -> GameIter<'_> {
        let start = range.start.min(self.game_count);
        let end = range.end.min(self.game_count);
        if start >= end {
            return GameIter {
                archive: self,
                next_block: self.index.len(),
                end_block: self.index.len(),
                current: None,
                skip_in_first: 0,
                remaining: 0,
            };
        }
        let block = match self.cumulative.binary_search(&start) {
            Ok(b) => b,
            Err(b) => b - 1,
        };
        GameIter {
            archive: self,
            next_block: block,
            end_block: self.index.len(),
            current: None,
            skip_in_first: (start - self.cumulative[block]) as usize,
            remaining: end - start,
        }
    }
}

/// Lazy iterator over games; yields per-game results so one damaged block
/// is reported once and then skipped, leaving the rest readable.
pub struct GameIter<'a> {
    archive: &'a Archive,
    next_block: usize,
    end_block: usize,
    current: Option<(BlockView<'a>, usize)>,
    skip_in_first: usize,
    remaining: u64,
}

impl<'a> Iterator for GameIter<'a> {
    type Item = Result<GameView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            if let Some((view, local)) = &mut self.current {
                if *local < view.len() {
                    let block = self.next_block - 1;
                    let at = *local;
                    *local += 1;
                    self.remaining -= 1;
                    let item = view
                        .get(at)
                        .map(|record| GameView { archive: self.archive, block, record })
                        .map_err(|detail| ArchiveError::CorruptBlock {
                            block,
                            detail: detail.into(),
                        });
                    return Some(item);
                }
            }
            self.current = None;
            if self.next_block >= self.end_block {
                self.remaining = 0;
                return None;
            }
            let block = self.next_block;
            self.next_block += 1;
            match self.archive.decode_block(block) {
                Ok(view) => {
                    let skip = std::mem::take(&mut self.skip_in_first).min(view.len());
                    self.current = Some((view, skip));
                }
                // report the broken block once, then continue behind it
                Err(err) => {
                    self.skip_in_first = 0;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Zero-copy view of one game. Field accessors resolve dedup ids through
/// the archive tables; nothing is materialized until [`to_record`].
///
/// [`to_record`]: Self::to_record
#[derive(Clone, Copy)]
pub struct GameView<'a> {
    archive: &'a Archive,
    block: usize,
    record: RecordView<'a>,
}

impl<'a> GameView<'a> {
    pub fn white(&self) -> Result<&'a str> {
        self.resolve_str(Category::Player, self.record.white_id())
    }

    pub fn black(&self) -> Result<&'a str> {
        self.resolve_str(Category::Player, self.record.black_id())
    }

    pub fn event(&self) -> Result<&'a str> {
        self.resolve_str(Category::Tag, self.record.event_id())
    }

    pub fn site(&self) -> Result<&'a str> {
        self.resolve_str(Category::Tag, self.record.site_id())
    }

    pub fn date(&self) -> Result<&'a str> {
        self.resolve_str(Category::Tag, self.record.date_id())
    }

    pub fn eco(&self) -> Result<&'a str> {
        self.resolve_str(Category::Tag, self.record.eco_id())
    }

    pub fn result(&self) -> Result<GameResult> {
        GameResult::from_byte(self.record.result_byte()).ok_or_else(|| {
            ArchiveError::CorruptBlock {
                block: self.block,
                detail: format!("invalid result byte {}", self.record.result_byte()),
            }
        })
    }

    /// The interned id of this game's site string; two games sharing a
    /// site share the id. Exposed for dedup-aware consumers.
    pub fn site_id(&self) -> u32 {
        self.record.site_id()
    }

    pub fn white_id(&self) -> u32 {
        self.record.white_id()
    }

    pub fn black_id(&self) -> u32 {
        self.record.black_id()
    }

    pub fn move_count(&self) -> Result<usize> {
        Ok(self.opening_bytes()?.len() / 4 + self.record.suffix_len())
    }

    /// All move tokens in order: the shared opening prefix (when present)
    /// followed by this game's own suffix. No allocation; both halves are
    /// read straight from the mapped bytes.
    pub fn moves(&self) -> Result<Moves<'a>> {
        Ok(Moves {
            opening: self.opening_bytes()?.chunks_exact(4),
            suffix: self.record.suffix_bytes().chunks_exact(4),
        })
    }

    /// Free-form tag pairs, resolved lazily.
    pub fn tags(&self) -> impl Iterator<Item = Result<(&'a str, &'a str)>> + 'a {
        let archive = self.archive;
        self.record.tags().map(move |(key, value)| {
            let key = resolve_str(archive, Category::Tag, key)?;
            let value = resolve_str(archive, Category::Tag, value)?;
            Ok((key, value))
        })
    }

    /// Materializes an owned record, field-for-field equal to what the
    /// builder was given.
    pub fn to_record(&self) -> Result<GameRecord> {
        let mut tags = Vec::with_capacity(self.record.tag_count());
        for pair in self.tags() {
            let (key, value) = pair?;
            tags.push((key.to_string(), value.to_string()));
        }
        Ok(GameRecord {
            white: self.white()?.to_string(),
            black: self.black()?.to_string(),
            event: self.event()?.to_string(),
            site: self.site()?.to_string(),
            date: self.date()?.to_string(),
            eco: self.eco()?.to_string(),
            result: self.result()?,
            moves: self.moves()?.collect(),
            tags,
        })
    }

    fn opening_bytes(&self) -> Result<&'a [u8]> {
        match self.record.opening_id() {
            None => Ok(&[]),
            Some(id) => {
                let bytes = self.archive.tables.resolve(
                    self.archive.data(),
                    Category::Opening,
                    id,
                )?;
                if bytes.len() % 4 != 0 {
                    return Err(ArchiveError::CorruptArchive(format!(
                        "opening table entry {} has length {} (not a token multiple)",
                        id,
                        bytes.len()
                    )));
                }
                Ok(bytes)
            }
        }
    }

    fn resolve_str(&self, category: Category, id: u32) -> Result<&'a str> {
        resolve_str(self.archive, category, id)
    }
}

fn resolve_str(archive: &Archive, category: Category, id: u32) -> Result<&str> {
    let bytes = archive.tables.resolve(archive.data(), category, id)?;
    std::str::from_utf8(bytes).map_err(|_| {
        ArchiveError::CorruptArchive(format!(
            "{} table entry {} is not valid UTF-8",
            category, id
        ))
    })
}

/// Move tokens of one game, opening prefix first.
pub struct Moves<'a> {
    opening: std::slice::ChunksExact<'a, u8>,
    suffix: std::slice::ChunksExact<'a, u8>,
}

impl Iterator for Moves<'_> {
    type Item = MoveToken;

    fn next(&mut self) -> Option<Self::Item> {
        self.opening
            .next()
            .or_else(|| self.suffix.next())
            .map(|mut chunk| MoveToken(chunk.get_u32_le()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.opening.len() + self.suffix.len();
        (len, Some(len))
    }
}

impl ExactSizeIterator for Moves<'_> {}
