//! On-disk archive layout: header, dedup table directory, block index.
//!
//! All integers are little-endian, all offsets relative to the file start:
//!
//! ```text
//! | offset | field                                                  |
//! |--------|--------------------------------------------------------|
//! | 0      | magic "CBA1" (4 B)                                     |
//! | 4      | format version: u16                                    |
//! | 6      | total game count: u64                                  |
//! | 14     | dedup table count: u16                                 |
//! | 16     | dedup tables; per table:                               |
//! |        |   category tag: u8, entry count: u32,                  |
//! |        |   entries as (len: u32, bytes)                         |
//! | ...    | block count: u32                                       |
//! | ...    | block index: (offset u64, length u64, games u32) each  |
//! | ...    | block payloads, each behind its own u64 length prefix  |
//! ```
//!
//! Metadata comes first so a reader validates structure before touching a
//! single payload byte. An index entry's `length` spans the prefix plus
//! the payload, so descriptors tile the payload region exactly:
//! `offset[i] + length[i] == offset[i + 1]`.

use bytes::{BufMut, BytesMut};

use crate::error::{ArchiveError, Result};
use crate::intern::{Category, InternerSet};

pub(crate) const MAGIC: [u8; 4] = *b"CBA1";
pub(crate) const VERSION: u16 = 1;

/// Fixed header bytes before the dedup tables.
pub(crate) const HEADER_LEN: usize = 16;
/// Per-block length prefix in front of each payload.
pub(crate) const LEN_PREFIX: u64 = 8;
/// One block index entry: offset + length + game count.
pub(crate) const INDEX_ENTRY_LEN: usize = 20;

/// One entry of the block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// File offset of the block's length prefix.
    pub offset: u64,
    /// Prefix plus payload bytes.
    pub length: u64,
    /// Games stored in the block.
    pub games: u32,
}

impl BlockDescriptor {
    /// Payload bytes behind the prefix.
    pub fn payload_len(&self) -> u64 {
        self.length - LEN_PREFIX
    }

    /// First byte past the block.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.length
    }
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

pub(crate) fn encode_header(game_count: u64, table_count: u16) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6..14].copy_from_slice(&game_count.to_le_bytes());
    header[14..16].copy_from_slice(&table_count.to_le_bytes());
    header
}

/// Serializes all three frozen dedup tables in wire-tag order.
pub(crate) fn encode_tables(interners: &InternerSet) -> BytesMut {
    let mut out = BytesMut::new();
    for category in Category::ALL {
        let table = interners.by_category(category);
        out.put_u8(category.tag());
        out.put_u32_le(table.len());
        for entry in table.iter() {
            out.put_u32_le(entry.len() as u32);
            out.put_slice(entry);
        }
    }
    out
}

pub(crate) fn encode_index(descriptors: &[BlockDescriptor]) -> BytesMut {
    let mut out = BytesMut::with_capacity(4 + descriptors.len() * INDEX_ENTRY_LEN);
    out.put_u32_le(descriptors.len() as u32);
    for desc in descriptors {
        out.put_u64_le(desc.offset);
        out.put_u64_le(desc.length);
        out.put_u32_le(desc.games);
    }
    out
}

/// Total metadata bytes (header + tables + index) once `block_count` blocks
/// exist; the builder needs this to assign absolute payload offsets.
pub(crate) fn metadata_len(tables_len: usize, block_count: usize) -> u64 {
    (HEADER_LEN + tables_len + 4 + block_count * INDEX_ENTRY_LEN) as u64
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over the eager metadata region.
struct MetaCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MetaCursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(ArchiveError::TruncatedArchive {
            offset: self.pos as u64,
            needed: len as u64,
            available: 0,
        })?;
        if end > self.data.len() {
            return Err(ArchiveError::TruncatedArchive {
                offset: self.pos as u64,
                needed: len as u64,
                available: (self.data.len() - self.pos) as u64,
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn ensure_remaining(&self, needed: u64) -> Result<()> {
        let available = (self.data.len() - self.pos) as u64;
        if needed > available {
            return Err(ArchiveError::TruncatedArchive {
                offset: self.pos as u64,
                needed,
                available,
            });
        }
        Ok(())
    }
}

/// Everything `Archive::open` parses eagerly.
pub(crate) struct ParsedMetadata {
    pub game_count: u64,
    pub tables: TableDirectory,
    pub index: Vec<BlockDescriptor>,
    /// First byte of the payload region.
    pub payload_base: u64,
}

/// Validates magic and version, then parses tables and block index.
/// Payload bytes are left untouched.
pub(crate) fn parse_metadata(data: &[u8]) -> Result<ParsedMetadata> {
    let mut cursor = MetaCursor::new(data, 0);
    let magic: [u8; 4] = cursor.take(4)?.try_into().unwrap();
    if magic != MAGIC {
        return Err(ArchiveError::BadMagic { found: magic });
    }
    let version = cursor.u16()?;
    if version != VERSION {
        return Err(ArchiveError::UnsupportedVersion { found: version });
    }
    let game_count = cursor.u64()?;
    let table_count = cursor.u16()?;

    let mut tables = TableDirectory::default();
    for _ in 0..table_count {
        let tag = cursor.u8()?;
        let category = Category::from_tag(tag).ok_or_else(|| {
            ArchiveError::CorruptArchive(format!("unknown dedup category tag {}", tag))
        })?;
        let slot = &mut tables.entries[tag as usize];
        if !slot.is_empty() {
            return Err(ArchiveError::CorruptArchive(format!(
                "duplicate dedup table for category '{}'",
                category
            )));
        }
        let entry_count = cursor.u32()?;
        // every entry needs at least its length field; a count that cannot
        // fit in the remaining bytes is truncation, not an allocation to try
        cursor.ensure_remaining(entry_count as u64 * 4)?;
        slot.reserve(entry_count as usize);
        for _ in 0..entry_count {
            let len = cursor.u32()?;
            let offset = cursor.pos as u64;
            cursor.take(len as usize)?;
            slot.push((offset, len));
        }
    }

    let block_count = cursor.u32()?;
    cursor.ensure_remaining(block_count as u64 * INDEX_ENTRY_LEN as u64)?;
    let mut index = Vec::with_capacity(block_count as usize);
    let mut games_total = 0u64;
    for i in 0..block_count {
        let desc = BlockDescriptor {
            offset: cursor.u64()?,
            length: cursor.u64()?,
            games: cursor.u32()?,
        };
        if desc.length < LEN_PREFIX {
            return Err(ArchiveError::CorruptArchive(format!(
                "block {} shorter than its length prefix",
                i
            )));
        }
        games_total += u64::from(desc.games);
        index.push(desc);
    }

    // Index entries must tile the payload region in order, starting right
    // behind the metadata.
    let payload_base = cursor.pos as u64;
    let mut expected = payload_base;
    for (i, desc) in index.iter().enumerate() {
        if desc.offset != expected {
            return Err(ArchiveError::CorruptArchive(format!(
                "block {} starts at {}, expected {}",
                i, desc.offset, expected
            )));
        }
        expected = desc.end_offset();
    }
    if games_total != game_count {
        return Err(ArchiveError::CorruptArchive(format!(
            "header claims {} games, block index sums to {}",
            game_count, games_total
        )));
    }

    Ok(ParsedMetadata { game_count, tables, index, payload_base })
}

/// Per-category `(offset, len)` ranges pointing into the mapped file.
/// Entry bytes stay in place; resolution is a slice, never a copy.
#[derive(Debug, Default)]
pub(crate) struct TableDirectory {
    entries: [Vec<(u64, u32)>; 3],
}

impl TableDirectory {
    pub(crate) fn table_len(&self, category: Category) -> u32 {
        self.entries[category.tag() as usize].len() as u32
    }

    pub(crate) fn resolve<'a>(
        &self,
        data: &'a [u8],
        category: Category,
        id: u32,
    ) -> Result<&'a [u8]> {
        let table = &self.entries[category.tag() as usize];
        let &(offset, len) = table.get(id as usize).ok_or(
            ArchiveError::DanglingDedupReference {
                category,
                id,
                table_len: table.len() as u32,
            },
        )?;
        Ok(&data[offset as usize..offset as usize + len as usize])
    }
}
