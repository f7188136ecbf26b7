//! Record wire codec: the `{encode, view}` layer the block format sits on.
//!
//! One encoded game record, little-endian throughout:
//!
//! ```text
//! | offset | field                                  |
//! |--------|----------------------------------------|
//! | 0      | white id: u32                          |
//! | 4      | black id: u32                          |
//! | 8      | event id: u32                          |
//! | 12     | site id: u32                           |
//! | 16     | date id: u32                           |
//! | 20     | eco id: u32                            |
//! | 24     | result: u8                             |
//! | 25     | opening id: u32 (0xffff_ffff = none)   |
//! | 29     | suffix token count: u16                |
//! | 31     | suffix tokens: u32 each                |
//! | ...    | tag pair count: u16                    |
//! | ...    | (key id: u32, value id: u32) pairs     |
//! ```
//!
//! `RecordView` validates every length field once at construction and then
//! answers field reads with plain offset arithmetic: no allocation and no
//! decoding of neighbouring records.

use bytes::{Buf, BufMut, BytesMut};

use crate::game::MoveToken;

/// Sentinel for "this game carries no shared opening prefix".
pub(crate) const NO_OPENING: u32 = u32::MAX;

const FIXED_LEN: usize = 31;

/// The six interned metadata references of one record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MetaIds {
    pub white: u32,
    pub black: u32,
    pub event: u32,
    pub site: u32,
    pub date: u32,
    pub eco: u32,
}

/// Appends one encoded record to `out`.
pub(crate) fn encode_record(
    out: &mut BytesMut,
    ids: MetaIds,
    result: u8,
    opening: Option<u32>,
    suffix: &[MoveToken],
    tags: &[(u32, u32)],
) {
    out.reserve(encoded_len(suffix.len(), tags.len()));
    out.put_u32_le(ids.white);
    out.put_u32_le(ids.black);
    out.put_u32_le(ids.event);
    out.put_u32_le(ids.site);
    out.put_u32_le(ids.date);
    out.put_u32_le(ids.eco);
    out.put_u8(result);
    out.put_u32_le(opening.unwrap_or(NO_OPENING));
    out.put_u16_le(suffix.len() as u16);
    for token in suffix {
        out.put_u32_le(token.0);
    }
    out.put_u16_le(tags.len() as u16);
    for &(key, value) in tags {
        out.put_u32_le(key);
        out.put_u32_le(value);
    }
}

/// Exact byte length of a record with the given suffix and tag counts.
pub(crate) const fn encoded_len(suffix_len: usize, tag_count: usize) -> usize {
    FIXED_LEN + suffix_len * 4 + 2 + tag_count * 8
}

/// A validated, read-only window over one encoded record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordView<'a> {
    bytes: &'a [u8],
    suffix_len: usize,
    tags_at: usize,
    tag_count: usize,
}

impl<'a> RecordView<'a> {
    /// Bounds-checks the internal length fields. The record must span
    /// `bytes` exactly; trailing slack means the framing above it lied.
    pub(crate) fn new(bytes: &'a [u8]) -> Result<Self, &'static str> {
        if bytes.len() < FIXED_LEN {
            return Err("record shorter than fixed header");
        }
        let suffix_len = read_u16(bytes, 29) as usize;
        let tags_at = FIXED_LEN + suffix_len * 4;
        if bytes.len() < tags_at + 2 {
            return Err("suffix token count overruns record");
        }
        let tag_count = read_u16(bytes, tags_at) as usize;
        if bytes.len() != tags_at + 2 + tag_count * 8 {
            return Err("record length disagrees with its counts");
        }
        Ok(Self { bytes, suffix_len, tags_at, tag_count })
    }

    pub(crate) fn white_id(&self) -> u32 {
        read_u32(self.bytes, 0)
    }

    pub(crate) fn black_id(&self) -> u32 {
        read_u32(self.bytes, 4)
    }

    pub(crate) fn event_id(&self) -> u32 {
        read_u32(self.bytes, 8)
    }

    pub(crate) fn site_id(&self) -> u32 {
        read_u32(self.bytes, 12)
    }

    pub(crate) fn date_id(&self) -> u32 {
        read_u32(self.bytes, 16)
    }

    pub(crate) fn eco_id(&self) -> u32 {
        read_u32(self.bytes, 20)
    }

    pub(crate) fn result_byte(&self) -> u8 {
        self.bytes[24]
    }

    pub(crate) fn opening_id(&self) -> Option<u32> {
        match read_u32(self.bytes, 25) {
            NO_OPENING => None,
            id => Some(id),
        }
    }

    pub(crate) fn suffix_len(&self) -> usize {
        self.suffix_len
    }

    /// Raw little-endian token bytes of the suffix.
    pub(crate) fn suffix_bytes(&self) -> &'a [u8] {
        &self.bytes[FIXED_LEN..self.tags_at]
    }

    /// Suffix tokens in game order, straight off the underlying bytes.
    pub(crate) fn suffix(&self) -> impl Iterator<Item = MoveToken> + 'a {
        self.suffix_bytes()
            .chunks_exact(4)
            .map(|mut chunk| MoveToken(chunk.get_u32_le()))
    }

    pub(crate) fn tag_count(&self) -> usize {
        self.tag_count
    }

    /// `(key id, value id)` pairs in stored order.
    pub(crate) fn tags(&self) -> impl Iterator<Item = (u32, u32)> + 'a {
        self.bytes[self.tags_at + 2..]
            .chunks_exact(8)
            .map(|mut chunk| (chunk.get_u32_le(), chunk.get_u32_le()))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    (&bytes[at..at + 4]).get_u32_le()
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    (&bytes[at..at + 2]).get_u16_le()
}
