//! Adjacency blob codec
//!
//! On-disk format, all fields little-endian:
//!
//! ```text
//! [ out_degree : u32 ][ in_degree : u32 ]
//! [ outgoing : (neighbor_id: u64, edge_id: u64) * out_degree ]
//! [ incoming : (neighbor_id: u64, edge_id: u64) * in_degree  ]
//! ```
//!
//! Both sublists are sorted by `(neighbor_id, edge_id)` and free of
//! duplicates. Decoding is total: a blob shorter than 8 bytes is an
//! empty vertex, trailing unknown bytes are tolerated for forward
//! compatibility, and degree fields larger than the bytes actually
//! present clamp to what is there.

use crate::role::VertexRole;

/// Bytes of the two degree fields.
pub const DEGREES_BYTES: usize = 8;

/// Bytes of one serialized neighborship.
pub const NEIGHBORSHIP_BYTES: usize = 16;

/// One directed half of an edge as a vertex stores it
///
/// Ordering and equality are structural on the
/// `(neighbor_id, edge_id)` pair, so the same neighbor connected by
/// two distinct edges is two entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Neighborship {
    /// The vertex on the other end.
    pub neighbor_id: u64,
    /// The connecting edge, or the anonymous-edge sentinel.
    pub edge_id: u64,
}

impl Neighborship {
    /// Construct an entry.
    pub fn new(neighbor_id: u64, edge_id: u64) -> Self {
        Neighborship {
            neighbor_id,
            edge_id,
        }
    }
}

fn decode_list(bytes: &[u8], count: usize) -> (Vec<Neighborship>, &[u8]) {
    let take = count.min(bytes.len() / NEIGHBORSHIP_BYTES);
    let mut list = Vec::with_capacity(take);
    for chunk in bytes.chunks_exact(NEIGHBORSHIP_BYTES).take(take) {
        let neighbor_id = u64::from_le_bytes(chunk[..8].try_into().unwrap_or_default());
        let edge_id = u64::from_le_bytes(chunk[8..].try_into().unwrap_or_default());
        list.push(Neighborship::new(neighbor_id, edge_id));
    }
    (list, &bytes[take * NEIGHBORSHIP_BYTES..])
}

/// Decode a blob into its `(outgoing, incoming)` sublists.
///
/// Total: never fails. Malformed input degrades toward the empty
/// vertex rather than erroring, because a vertex that was never
/// written and a vertex with a damaged blob must both read as "no
/// neighbors".
pub fn decode_blob(bytes: &[u8]) -> (Vec<Neighborship>, Vec<Neighborship>) {
    if bytes.len() < DEGREES_BYTES {
        return (Vec::new(), Vec::new());
    }
    let out_degree = u32::from_le_bytes(bytes[..4].try_into().unwrap_or_default()) as usize;
    let in_degree = u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default()) as usize;

    let (outgoing, rest) = decode_list(&bytes[DEGREES_BYTES..], out_degree);
    let (incoming, _trailing) = decode_list(rest, in_degree);
    (outgoing, incoming)
}

/// Encode sublists into a blob. Both lists are sorted and
/// deduplicated on the way in, so every encoded blob satisfies the
/// format invariants no matter what the caller hands over.
pub fn encode_blob(outgoing: &[Neighborship], incoming: &[Neighborship]) -> Vec<u8> {
    let mut outgoing = outgoing.to_vec();
    let mut incoming = incoming.to_vec();
    outgoing.sort_unstable();
    outgoing.dedup();
    incoming.sort_unstable();
    incoming.dedup();

    let mut blob = Vec::with_capacity(
        DEGREES_BYTES + (outgoing.len() + incoming.len()) * NEIGHBORSHIP_BYTES,
    );
    blob.extend_from_slice(&(outgoing.len() as u32).to_le_bytes());
    blob.extend_from_slice(&(incoming.len() as u32).to_le_bytes());
    for entry in outgoing.iter().chain(incoming.iter()) {
        blob.extend_from_slice(&entry.neighbor_id.to_le_bytes());
        blob.extend_from_slice(&entry.edge_id.to_le_bytes());
    }
    blob
}

/// The sublist(s) a role selects from a decoded blob: outgoing for
/// `Source`, incoming for `Target`, both concatenated for `Any`,
/// nothing for `Unknown`.
pub fn neighbors_in(bytes: &[u8], role: VertexRole) -> Vec<Neighborship> {
    let (outgoing, incoming) = decode_blob(bytes);
    match role {
        VertexRole::Source => outgoing,
        VertexRole::Target => incoming,
        VertexRole::Any => {
            let mut all = outgoing;
            all.extend(incoming);
            all
        }
        VertexRole::Unknown => Vec::new(),
    }
}

/// Merge new entries into a sorted deduplicated list.
pub fn merge_neighbors(existing: &mut Vec<Neighborship>, additions: Vec<Neighborship>) {
    if additions.is_empty() {
        return;
    }
    existing.extend(additions);
    existing.sort_unstable();
    existing.dedup();
}
