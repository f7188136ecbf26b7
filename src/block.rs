//! Block payload encoding and zero-copy decoding.
//!
//! A block payload is a batch of encoded records with a trailing offset
//! table, so element `k` is reachable without touching elements `0..k`:
//!
//! ```text
//! | record 0 | record 1 | ... | offset table: u32 × count | count: u32 |
//! ```
//!
//! Offsets are record start positions relative to the payload start, in
//! record order. Record `k` spans `offsets[k]..offsets[k+1]` (the last one
//! runs to the start of the offset table). On disk every payload is
//! preceded by an 8-byte little-endian length prefix holding exactly the
//! payload byte count; the prefix itself is excluded.
//!
//! A block is independently decodable from its own bytes plus the
//! archive-wide dedup tables. It never references sibling blocks.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::RecordView;

/// Accumulates encoded records until the archive builder closes the block.
#[derive(Debug, Default)]
pub(crate) struct BlockBuilder {
    data: BytesMut,
    offsets: Vec<u32>,
}

impl BlockBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends one already-encoded record.
    pub(crate) fn add(&mut self, record: &[u8]) {
        self.offsets.push(self.data.len() as u32);
        self.data.extend_from_slice(record);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Number of records added so far.
    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Payload size if the block were closed now.
    pub(crate) fn encoded_len(&self) -> usize {
        self.data.len() + self.offsets.len() * 4 + 4
    }

    /// Serializes the payload and resets the builder for the next block.
    pub(crate) fn finish(&mut self) -> Bytes {
        let mut payload =
            BytesMut::with_capacity(self.data.len() + self.offsets.len() * 4 + 4);
        payload.put_slice(&self.data);
        for &offset in &self.offsets {
            payload.put_u32_le(offset);
        }
        payload.put_u32_le(self.offsets.len() as u32);
        self.data.clear();
        self.offsets.clear();
        payload.freeze()
    }
}

/// A zero-copy view over one block payload.
///
/// Construction validates the offset table once; record access afterwards
/// is offset arithmetic only. Individual records are validated lazily on
/// [`get`](Self::get), so one malformed record does not poison its block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockView<'a> {
    /// Record bytes, up to the start of the offset table.
    data: &'a [u8],
    /// The raw offset table (little-endian u32 each).
    offsets: &'a [u8],
    count: usize,
}

impl<'a> BlockView<'a> {
    pub(crate) fn new(payload: &'a [u8]) -> Result<Self, &'static str> {
        if payload.len() < 4 {
            return Err("payload shorter than its record count field");
        }
        let count = (&payload[payload.len() - 4..]).get_u32_le() as usize;
        let table_len = count
            .checked_mul(4)
            .ok_or("record count overflows offset table")?;
        let data_end = payload
            .len()
            .checked_sub(4 + table_len)
            .ok_or("offset table overruns payload")?;
        let view = Self {
            data: &payload[..data_end],
            offsets: &payload[data_end..payload.len() - 4],
            count,
        };
        // Offsets must march forward and stay inside the data section.
        let mut previous = 0u32;
        for k in 0..count {
            let offset = view.offset(k);
            if offset < previous || offset as usize > data_end {
                return Err("offset table not monotonic within payload");
            }
            previous = offset;
        }
        if count > 0 && view.offset(0) != 0 {
            return Err("first record does not start at payload origin");
        }
        Ok(view)
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn offset(&self, k: usize) -> u32 {
        (&self.offsets[k * 4..k * 4 + 4]).get_u32_le()
    }

    /// Raw bytes of record `k`. Caller guarantees `k < len()`.
    fn record_bytes(&self, k: usize) -> &'a [u8] {
        let start = self.offset(k) as usize;
        let end = if k + 1 < self.count {
            self.offset(k + 1) as usize
        } else {
            self.data.len()
        };
        &self.data[start..end]
    }

    /// Validated view over record `k`.
    pub(crate) fn get(&self, k: usize) -> Result<RecordView<'a>, &'static str> {
        if k >= self.count {
            return Err("record index beyond block");
        }
        RecordView::new(self.record_bytes(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_record, MetaIds};
    use crate::game::MoveToken;

    fn encoded_record(seed: u32, suffix: &[MoveToken]) -> BytesMut {
        let mut out = BytesMut::new();
        let ids = MetaIds {
            white: seed,
            black: seed + 1,
            event: seed + 2,
            site: seed + 3,
            date: seed + 4,
            eco: seed + 5,
        };
        encode_record(&mut out, ids, 0, None, suffix, &[]);
        out
    }

    fn build_payload(records: usize) -> Bytes {
        let mut builder = BlockBuilder::new();
        for i in 0..records {
            let rec = encoded_record(i as u32 * 10, &[MoveToken(i as u32)]);
            builder.add(&rec);
        }
        builder.finish()
    }

    #[test]
    fn roundtrip_by_index() {
        let payload = build_payload(5);
        let view = BlockView::new(&payload).unwrap();
        assert_eq!(view.len(), 5);
        for k in 0..5 {
            let rec = view.get(k).unwrap();
            assert_eq!(rec.white_id(), k as u32 * 10);
            assert_eq!(rec.suffix().collect::<Vec<_>>(), vec![MoveToken(k as u32)]);
        }
    }

    #[test]
    fn random_access_does_not_need_prior_records() {
        let payload = build_payload(100);
        let view = BlockView::new(&payload).unwrap();
        let rec = view.get(99).unwrap();
        assert_eq!(rec.white_id(), 990);
    }

    #[test]
    fn empty_payload_is_a_valid_empty_block() {
        let payload = BlockBuilder::new().finish();
        let view = BlockView::new(&payload).unwrap();
        assert!(view.is_empty());
        assert!(view.get(0).is_err());
    }

    #[test]
    fn builder_resets_between_blocks() {
        let mut builder = BlockBuilder::new();
        builder.add(&encoded_record(0, &[]));
        let first = builder.finish();
        assert!(builder.is_empty());
        builder.add(&encoded_record(7, &[]));
        builder.add(&encoded_record(8, &[]));
        let second = builder.finish();
        assert_eq!(BlockView::new(&first).unwrap().len(), 1);
        assert_eq!(BlockView::new(&second).unwrap().len(), 2);
    }

    #[test]
    fn rejects_offset_table_overrun() {
        let payload = build_payload(2);
        let mut bad = payload.to_vec();
        let at = bad.len() - 4;
        // claim far more records than the payload can hold
        bad[at..].copy_from_slice(&1000u32.to_le_bytes());
        assert!(BlockView::new(&bad).is_err());
    }

    #[test]
    fn rejects_non_monotonic_offsets() {
        let payload = build_payload(2);
        let mut bad = payload.to_vec();
        // second offset table slot sits right before the trailing count
        let slot = bad.len() - 8;
        bad[slot..slot + 4].copy_from_slice(&0u32.to_le_bytes());
        // first slot now claims a larger offset than the second
        let first = bad.len() - 12;
        bad[first..first + 4].copy_from_slice(&10u32.to_le_bytes());
        assert!(BlockView::new(&bad).is_err());
    }

    #[test]
    fn truncated_record_is_rejected_lazily() {
        let mut builder = BlockBuilder::new();
        builder.add(&encoded_record(0, &[]));
        // second "record" is garbage too short to be one
        builder.add(&[1, 2, 3]);
        let payload = builder.finish();
        let view = BlockView::new(&payload).unwrap();
        assert!(view.get(0).is_ok());
        assert!(view.get(1).is_err());
    }
}
