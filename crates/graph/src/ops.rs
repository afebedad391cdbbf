//! Graph operations over the transactional KV path
//!
//! `upsert_edges` touches each distinct endpoint once, in canonical
//! ascending vertex order, so two concurrent writers hitting the
//! same vertices read-modify-write them in the same order and the
//! loser aborts deterministically at commit instead of deadlocking
//! or interleaving.

use std::collections::BTreeMap;

use tracing::debug;

use lattice_core::{CollectionId, Result, Sequence, EDGE_ID_ANONYMOUS};
use lattice_engine::{Database, Transaction, TransactionOptions};

use crate::codec::{decode_blob, encode_blob, merge_neighbors, neighbors_in, Neighborship};
use crate::role::VertexRole;

/// A directed edge between two vertices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Source vertex.
    pub source_id: u64,
    /// Target vertex.
    pub target_id: u64,
    /// Edge identifier; the anonymous sentinel for unnamed edges.
    pub edge_id: u64,
}

impl Edge {
    /// An edge with an explicit identifier.
    pub fn new(source_id: u64, target_id: u64, edge_id: u64) -> Self {
        Edge {
            source_id,
            target_id,
            edge_id,
        }
    }

    /// An anonymous edge.
    pub fn anonymous(source_id: u64, target_id: u64) -> Self {
        Edge {
            source_id,
            target_id,
            edge_id: EDGE_ID_ANONYMOUS,
        }
    }
}

/// Both adjacency sublists of one vertex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighborhood {
    /// The vertex at the center.
    pub center: u64,
    /// Edges where the center is the source.
    pub outgoing: Vec<Neighborship>,
    /// Edges where the center is the target.
    pub incoming: Vec<Neighborship>,
}

impl Neighborhood {
    /// Total number of edge ends at this vertex.
    pub fn degree(&self) -> usize {
        self.outgoing.len() + self.incoming.len()
    }

    /// Whether the vertex has no neighbors.
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }
}

/// Graph view over one collection
///
/// Stateless apart from the collection handle; clone freely.
#[derive(Debug, Clone, Copy)]
pub struct GraphCollection {
    collection: CollectionId,
}

impl GraphCollection {
    /// View `collection` as a graph.
    pub fn new(collection: CollectionId) -> Self {
        GraphCollection { collection }
    }

    /// The underlying collection handle.
    pub fn collection(&self) -> CollectionId {
        self.collection
    }

    /// Merge edges into the adjacency lists of every endpoint,
    /// staged through `txn`.
    ///
    /// For each distinct endpoint the current blob is read (watched,
    /// so commit revalidates it), the new outgoing/incoming entries
    /// are merged in sorted deduplicated order, and the re-encoded
    /// blob is staged.
    pub fn upsert_edges(&self, txn: &mut Transaction, edges: &[Edge]) -> Result<()> {
        // BTreeMap gives the canonical ascending endpoint order.
        let mut staged: BTreeMap<u64, (Vec<Neighborship>, Vec<Neighborship>)> = BTreeMap::new();
        for edge in edges {
            staged
                .entry(edge.source_id)
                .or_default()
                .0
                .push(Neighborship::new(edge.target_id, edge.edge_id));
            staged
                .entry(edge.target_id)
                .or_default()
                .1
                .push(Neighborship::new(edge.source_id, edge.edge_id));
        }

        let touched = staged.len();
        for (vertex, (new_outgoing, new_incoming)) in staged {
            let blob = txn.get(self.collection, vertex)?;
            let (mut outgoing, mut incoming) = decode_blob(blob.as_deref().unwrap_or(&[]));
            merge_neighbors(&mut outgoing, new_outgoing);
            merge_neighbors(&mut incoming, new_incoming);
            txn.put(self.collection, vertex, &encode_blob(&outgoing, &incoming))?;
        }
        debug!(
            edges = edges.len(),
            vertices = touched,
            "adjacency upsert staged"
        );
        Ok(())
    }

    /// Upsert edges in their own single-commit transaction. A
    /// serialization race surfaces as `conflict` for the caller to
    /// retry.
    pub fn upsert_edges_once(&self, db: &Database, edges: &[Edge]) -> Result<Sequence> {
        let mut txn = db.begin_transaction(TransactionOptions::new())?;
        self.upsert_edges(&mut txn, edges)?;
        txn.commit()
    }

    /// The neighbor sublist(s) of `vertex` selected by `role`,
    /// read through `txn` when one is supplied.
    pub fn gather_neighbors(
        &self,
        db: &Database,
        txn: Option<&mut Transaction>,
        vertex: u64,
        role: VertexRole,
    ) -> Result<Vec<Neighborship>> {
        let blob = match txn {
            Some(txn) => txn.get(self.collection, vertex)?,
            None => db.get(self.collection, vertex)?,
        };
        Ok(neighbors_in(blob.as_deref().unwrap_or(&[]), role))
    }

    /// Both sublists of `vertex` as a [`Neighborhood`] view.
    pub fn neighborhood(
        &self,
        db: &Database,
        txn: Option<&mut Transaction>,
        vertex: u64,
    ) -> Result<Neighborhood> {
        let blob = match txn {
            Some(txn) => txn.get(self.collection, vertex)?,
            None => db.get(self.collection, vertex)?,
        };
        let (outgoing, incoming) = decode_blob(blob.as_deref().unwrap_or(&[]));
        Ok(Neighborhood {
            center: vertex,
            outgoing,
            incoming,
        })
    }
}
