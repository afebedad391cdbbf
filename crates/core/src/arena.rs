//! Caller-owned scratch arena and the tapes materialized into it
//!
//! The batch entry points never hand out freshly allocated buffers.
//! Instead the caller owns an [`Arena`] — a growable byte buffer that
//! is reset and refilled on every call — and receives views that
//! borrow it. Capacity is non-decreasing across uses: a call whose
//! result fits in what an earlier call already reserved performs no
//! allocation at all.
//!
//! Because [`ReadTape`] and [`ScanTape`] borrow the arena, the borrow
//! checker enforces the aliasing contract for free: any subsequent
//! call that reuses the arena needs `&mut Arena` and therefore ends
//! every outstanding view, failing ones included.
//!
//! ## Read tape layout
//!
//! ```text
//! [ len[0] .. len[n-1] : u32 little-endian ][ payload bytes, batch order ]
//! ```
//!
//! A length equal to [`LEN_MISSING`] marks an absent key; its payload
//! bytes are omitted entirely.
//!
//! ## Scan tape layout (per task)
//!
//! ```text
//! [ key[0] .. key[cap-1] : 8 bytes, ordered encoding ][ len[0] .. len[cap-1] : u32 LE ]
//! ```
//!
//! Only the first `found` slots of each region are written; a scan
//! that hits end-of-collection leaves the rest untouched.

use crate::codec::{self, KEY_BYTES};
use crate::error::{LatticeError, Result};
use crate::types::{Key, LEN_MISSING};

/// Caller-owned growable scratch buffer
///
/// Created lazily by the first call that needs one, reused across
/// calls, freed by dropping. Not safe for concurrent use: each thread
/// keeps its own arena.
#[derive(Debug, Default)]
pub struct Arena {
    buf: Vec<u8>,
}

impl Arena {
    /// Create an empty arena. No memory is reserved until first use.
    pub fn new() -> Self {
        Arena { buf: Vec::new() }
    }

    /// Bytes currently written into the arena.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the arena currently holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Currently reserved capacity. Non-decreasing until the arena is
    /// dropped.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Discard the previous call's contents, keeping capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Grow the arena so at least `additional` more bytes fit.
    ///
    /// Allocation failure surfaces as `out_of_memory` instead of
    /// aborting the process.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.buf
            .try_reserve(additional)
            .map_err(|_| LatticeError::out_of_memory("arena grow failed"))
    }

    /// Append raw bytes, returning the offset they start at.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        self.reserve(bytes.len())?;
        let offset = self.buf.len();
        self.buf.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Append `count` zero bytes, returning the offset they start at.
    pub fn push_zeroed(&mut self, count: usize) -> Result<usize> {
        self.reserve(count)?;
        let offset = self.buf.len();
        self.buf.resize(offset + count, 0);
        Ok(offset)
    }

    /// Append a little-endian `u32`.
    pub fn push_u32_le(&mut self, value: u32) -> Result<usize> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append a key in its ordered byte encoding.
    pub fn push_key(&mut self, key: Key) -> Result<usize> {
        self.push_bytes(&codec::encode_key(key))
    }

    /// Overwrite 4 bytes at `offset` with a little-endian `u32`.
    /// The offset must come from a prior push on this arena.
    pub fn patch_u32_le(&mut self, offset: usize, value: u32) -> Result<()> {
        let end = offset
            .checked_add(4)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| LatticeError::args_invalid("arena patch out of bounds"))?;
        self.buf[offset..end].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Overwrite `KEY_BYTES` bytes at `offset` with an encoded key.
    pub fn patch_key(&mut self, offset: usize, key: Key) -> Result<()> {
        let end = offset
            .checked_add(KEY_BYTES)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| LatticeError::args_invalid("arena patch out of bounds"))?;
        self.buf[offset..end].copy_from_slice(&codec::encode_key(key));
        Ok(())
    }

    /// The bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Borrowed view of a batch read result
///
/// Lives inside the arena that produced it; dropping the view (or
/// reusing the arena) ends its validity.
#[derive(Debug, Clone, Copy)]
pub struct ReadTape<'a> {
    bytes: &'a [u8],
    count: usize,
}

impl<'a> ReadTape<'a> {
    /// Wrap arena bytes holding `count` length slots followed by the
    /// concatenated payloads.
    pub fn new(bytes: &'a [u8], count: usize) -> Result<Self> {
        if bytes.len() < count * 4 {
            return Err(LatticeError::corruption("read tape shorter than its lengths"));
        }
        Ok(ReadTape { bytes, count })
    }

    /// Number of entries in the tape.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the tape holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The length slot for entry `index`. [`LEN_MISSING`] marks an
    /// absent key.
    pub fn value_len(&self, index: usize) -> Option<u32> {
        if index >= self.count {
            return None;
        }
        let at = index * 4;
        let raw: [u8; 4] = self.bytes[at..at + 4].try_into().ok()?;
        Some(u32::from_le_bytes(raw))
    }

    /// Whether entry `index` is absent.
    pub fn is_missing(&self, index: usize) -> bool {
        self.value_len(index) == Some(LEN_MISSING)
    }

    /// The payload for entry `index`: `Some(&[])` for a present
    /// zero-length value, `None` for an absent key or out-of-range
    /// index.
    pub fn value(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.count {
            return None;
        }
        let mut offset = self.count * 4;
        for prior in 0..index {
            match self.value_len(prior)? {
                LEN_MISSING => {}
                len => offset += len as usize,
            }
        }
        match self.value_len(index)? {
            LEN_MISSING => None,
            len => self.bytes.get(offset..offset + len as usize),
        }
    }

    /// Iterate entries in batch order.
    pub fn iter(&self) -> ReadTapeIter<'a> {
        ReadTapeIter {
            tape: *self,
            index: 0,
            payload_offset: self.count * 4,
        }
    }
}

impl<'a> IntoIterator for &ReadTape<'a> {
    type Item = Option<&'a [u8]>;
    type IntoIter = ReadTapeIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over [`ReadTape`] entries; `None` items are absent keys.
#[derive(Debug)]
pub struct ReadTapeIter<'a> {
    tape: ReadTape<'a>,
    index: usize,
    payload_offset: usize,
}

impl<'a> Iterator for ReadTapeIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.tape.count {
            return None;
        }
        let len = self.tape.value_len(self.index)?;
        self.index += 1;
        if len == LEN_MISSING {
            return Some(None);
        }
        let start = self.payload_offset;
        self.payload_offset += len as usize;
        Some(self.tape.bytes.get(start..self.payload_offset))
    }
}

/// Placement of one scan task's result inside the arena
#[derive(Debug, Clone, Copy)]
pub struct ScanTaskSpan {
    keys_offset: usize,
    lens_offset: usize,
    capacity: usize,
    found: usize,
}

impl ScanTaskSpan {
    /// Describe one task's regions. `capacity` is the requested
    /// length; `found` is how many slots were actually written.
    pub fn new(keys_offset: usize, lens_offset: usize, capacity: usize, found: usize) -> Self {
        ScanTaskSpan {
            keys_offset,
            lens_offset,
            capacity,
            found: found.min(capacity),
        }
    }
}

/// Borrowed view of a batch scan result
#[derive(Debug)]
pub struct ScanTape<'a> {
    bytes: &'a [u8],
    spans: Vec<ScanTaskSpan>,
}

impl<'a> ScanTape<'a> {
    /// Wrap arena bytes holding the per-task key and length regions.
    pub fn new(bytes: &'a [u8], spans: Vec<ScanTaskSpan>) -> Result<Self> {
        for span in &spans {
            let keys_end = span.keys_offset + span.capacity * KEY_BYTES;
            let lens_end = span.lens_offset + span.capacity * 4;
            if keys_end > bytes.len() || lens_end > bytes.len() {
                return Err(LatticeError::corruption("scan tape span out of bounds"));
            }
        }
        Ok(ScanTape { bytes, spans })
    }

    /// Number of scan tasks in the batch.
    pub fn task_count(&self) -> usize {
        self.spans.len()
    }

    /// Entries actually found for `task`; less than the requested
    /// length when the scan hit end-of-collection.
    pub fn found(&self, task: usize) -> Option<usize> {
        self.spans.get(task).map(|span| span.found)
    }

    /// The `index`-th found key of `task`.
    pub fn key(&self, task: usize, index: usize) -> Option<Key> {
        let span = self.spans.get(task)?;
        if index >= span.found {
            return None;
        }
        let at = span.keys_offset + index * KEY_BYTES;
        codec::decode_key(&self.bytes[at..at + KEY_BYTES])
    }

    /// The stored value length of the `index`-th found key of `task`.
    pub fn value_len(&self, task: usize, index: usize) -> Option<u32> {
        let span = self.spans.get(task)?;
        if index >= span.found {
            return None;
        }
        let at = span.lens_offset + index * 4;
        let raw: [u8; 4] = self.bytes[at..at + 4].try_into().ok()?;
        Some(u32::from_le_bytes(raw))
    }

    /// Iterate the found keys of `task` in ascending order.
    pub fn keys(&self, task: usize) -> impl Iterator<Item = Key> + '_ {
        let found = self.found(task).unwrap_or(0);
        (0..found).filter_map(move |index| self.key(task, index))
    }
}
