//! Append-only node storage.
//!
//! Nodes are immutable once inserted. Storage is SoA:
//! - A flat `Vec<f32>` buffer holding all vectors packed contiguously,
//!   layout `[vec0[0..dim], vec1[0..dim], ..., vecN[0..dim]]`
//! - A parallel metadata column, one optional JSON value per node
//!
//! Ids are dense `u32` insertion indices, so a vector lookup is a single
//! slice operation into the buffer. The dimension is fixed by the first
//! push; later pushes with a different dimension are rejected without
//! modifying the store.

use crate::error::{Error, Result};

/// Append-only store of `(vector, metadata)` records with dense ids.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    /// Vector dimension, fixed by the first push
    dimension: Option<usize>,
    /// SoA vector buffer: all vectors packed contiguously
    vector_buffer: Vec<f32>,
    /// Per-node opaque metadata, indexed by node id
    metadata: Vec<Option<serde_json::Value>>,
}

impl NodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes stored.
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    /// True if no node has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Vector dimension, or `None` before the first push.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Append a node and return its id.
    ///
    /// The first push fixes the store's dimension. A mismatched or empty
    /// vector is rejected and the store is left unchanged.
    pub fn push(&mut self, vector: Vec<f32>, metadata: Option<serde_json::Value>) -> Result<u32> {
        if vector.is_empty() {
            return Err(Error::invalid_arg("vector", "dimension must be at least 1"));
        }

        match self.dimension {
            Some(dim) if vector.len() != dim => {
                return Err(Error::WrongDimension {
                    expected: dim,
                    got: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }

        let id = self.metadata.len() as u32;
        self.vector_buffer.extend_from_slice(&vector);
        self.metadata.push(metadata);
        Ok(id)
    }

    /// Get the vector for a node, or `None` if the id is out of range.
    pub fn vector(&self, id: u32) -> Option<&[f32]> {
        if (id as usize) < self.len() {
            Some(self.vector_raw(id))
        } else {
            None
        }
    }

    /// Get the metadata for a node, or `None` if the id is out of range or
    /// the node carries no metadata.
    pub fn metadata(&self, id: u32) -> Option<&serde_json::Value> {
        self.metadata.get(id as usize).and_then(|m| m.as_ref())
    }

    /// Iterate over `(id, vector)` pairs in insertion order.
    pub fn iter_vectors(&self) -> impl Iterator<Item = (u32, &[f32])> + '_ {
        (0..self.len() as u32).map(move |id| (id, self.vector_raw(id)))
    }

    /// Direct slice access for ids known to be in range (ids taken from the
    /// adjacency are always valid).
    pub(crate) fn vector_raw(&self, id: u32) -> &[f32] {
        let dim = self.dimension.unwrap_or(0);
        let offset = id as usize * dim;
        &self.vector_buffer[offset..offset + dim]
    }

    /// The packed vector buffer (snapshot serialization).
    pub(crate) fn buffer(&self) -> &[f32] {
        &self.vector_buffer
    }

    /// The metadata column (snapshot serialization).
    pub(crate) fn metadata_column(&self) -> &[Option<serde_json::Value>] {
        &self.metadata
    }

    /// Rebuild a store from snapshot sections. The caller has already
    /// validated that the buffer length equals `len * dimension`.
    pub(crate) fn from_parts(
        dimension: Option<usize>,
        vector_buffer: Vec<f32>,
        metadata: Vec<Option<serde_json::Value>>,
    ) -> Self {
        Self {
            dimension,
            vector_buffer,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_assigns_sequential_ids() {
        let mut store = NodeStore::new();
        assert_eq!(store.push(vec![1.0, 2.0], None).unwrap(), 0);
        assert_eq!(store.push(vec![3.0, 4.0], None).unwrap(), 1);
        assert_eq!(store.push(vec![5.0, 6.0], None).unwrap(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_first_push_fixes_dimension() {
        let mut store = NodeStore::new();
        assert_eq!(store.dimension(), None);

        store.push(vec![1.0, 2.0, 3.0], None).unwrap();
        assert_eq!(store.dimension(), Some(3));
    }

    #[test]
    fn test_dimension_mismatch_leaves_store_unchanged() {
        let mut store = NodeStore::new();
        store.push(vec![1.0, 2.0], None).unwrap();

        let err = store.push(vec![1.0, 2.0, 3.0], None).unwrap_err();
        assert!(matches!(err, Error::WrongDimension { expected: 2, got: 3 }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.buffer().len(), 2);
    }

    #[test]
    fn test_empty_vector_rejected() {
        let mut store = NodeStore::new();
        let err = store.push(vec![], None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { field, .. } if field == "vector"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_vector_and_metadata_lookup() {
        let mut store = NodeStore::new();
        store
            .push(vec![1.0, 2.0], Some(serde_json::json!({"name": "a"})))
            .unwrap();
        store.push(vec![3.0, 4.0], None).unwrap();

        assert_eq!(store.vector(0), Some(&[1.0, 2.0][..]));
        assert_eq!(store.vector(1), Some(&[3.0, 4.0][..]));
        assert_eq!(store.vector(2), None);

        assert_eq!(store.metadata(0).unwrap()["name"], "a");
        assert!(store.metadata(1).is_none());
        assert!(store.metadata(2).is_none());
    }

    #[test]
    fn test_iter_vectors() {
        let mut store = NodeStore::new();
        store.push(vec![0.0, 1.0], None).unwrap();
        store.push(vec![2.0, 3.0], None).unwrap();

        let collected: Vec<(u32, Vec<f32>)> = store
            .iter_vectors()
            .map(|(id, v)| (id, v.to_vec()))
            .collect();
        assert_eq!(collected, vec![(0, vec![0.0, 1.0]), (1, vec![2.0, 3.0])]);
    }
}
