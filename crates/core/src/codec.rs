//! Fixed-width key codec
//!
//! Keys are encoded big-endian so that lexicographic byte order
//! equals numeric order. Every place that puts keys into byte form
//! (ordered backends, scan tapes) goes through this module, so the
//! endianness choice is made exactly once.

use crate::types::Key;

/// Number of bytes in an encoded key.
pub const KEY_BYTES: usize = 8;

/// Encode a key into its ordered byte form.
pub fn encode_key(key: Key) -> [u8; KEY_BYTES] {
    key.to_be_bytes()
}

/// Decode a key from its ordered byte form. Returns `None` if the
/// slice is not exactly [`KEY_BYTES`] long.
pub fn decode_key(bytes: &[u8]) -> Option<Key> {
    let arr: [u8; KEY_BYTES] = bytes.try_into().ok()?;
    Some(Key::from_be_bytes(arr))
}
