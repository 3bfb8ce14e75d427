//! Hierarchical Navigable Small World (HNSW) index for approximate nearest
//! neighbour search.
//!
//! This module provides:
//! - `HnswParams`: construction parameters (degree budgets, beam widths)
//! - `Hnsw`: the incremental index with `insert` / `search` / `save` / `load`
//! - `Match`: a search result carrying id, distance, vector, and metadata
//!
//! # Algorithm Overview
//!
//! HNSW maintains a multi-layer proximity graph:
//! - Layer 0 contains all nodes with dense connections (up to `m0` neighbours)
//! - Higher layers contain geometrically thinning subsets (up to `m`)
//! - A query greedily descends from the top entry point with a beam of 1,
//!   then runs a bounded best-first search on layer 0 with a beam of `ef`
//!
//! Insertion follows the same descent, then links the new node on each of
//! its layers to a diverse set of near neighbours. Diversity comes from the
//! selection heuristic: a candidate is linked only if no already-chosen
//! neighbour sits closer to it than the new node itself, which preserves
//! long-range edges instead of spending the degree budget on one cluster.

use crate::distance::euclidean_distance_simd;
use crate::error::{Error, Result};
use crate::graph::LayerGraph;
use crate::snapshot;
use crate::store::NodeStore;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::path::Path;

/// Hard ceiling on sampled levels. A runaway `-ln(u)` draw must not
/// allocate an unbounded layer stack.
const MAX_LEVEL: usize = 16;

/// HNSW construction parameters, fixed at index creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Maximum number of neighbours per node on layers above the base.
    /// Typical values: 16-48. Higher = better recall, larger index.
    pub m: usize,
    /// Maximum number of neighbours per node on layer 0. Conventionally
    /// `2 * m`; the base layer carries the dense, precise connections.
    pub m0: usize,
    /// Beam width for the layer search during insertion.
    pub ef_construction: usize,
    /// Default beam width for `search`.
    pub ef_search: usize,
    /// Level-sampling normalization (1/ln(m)). Layer k holds roughly a
    /// `m^-k` fraction of nodes.
    pub level_factor: f64,
    /// Seed for the level-sampling RNG. Fixing it makes index construction
    /// reproducible for a given insertion order.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        let m = 24;
        Self {
            m,
            m0: m * 2,
            ef_construction: 200,
            ef_search: 200,
            level_factor: 1.0 / (m as f64).ln(),
            seed: 0,
        }
    }
}

impl HnswParams {
    /// Create parameters with a specific `m`, deriving `m0 = 2m` and the
    /// matching level factor.
    pub fn with_m(m: usize) -> Self {
        Self {
            m,
            m0: m * 2,
            level_factor: 1.0 / (m as f64).ln(),
            ..Self::default()
        }
    }

    /// Set the construction beam width.
    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    /// Set the default search beam width.
    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    /// Set the level-sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check parameter bounds.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(Error::invalid_arg("m", "degree budget must be at least 2"));
        }
        if self.m0 < self.m {
            return Err(Error::invalid_arg(
                "m0",
                "base-layer budget must be at least m",
            ));
        }
        if self.ef_construction < 1 {
            return Err(Error::invalid_arg(
                "ef_construction",
                "construction beam must be at least 1",
            ));
        }
        if self.ef_search < 1 {
            return Err(Error::invalid_arg(
                "ef_search",
                "search beam must be at least 1",
            ));
        }
        if !self.level_factor.is_finite() || self.level_factor <= 0.0 {
            return Err(Error::invalid_arg(
                "level_factor",
                "level factor must be finite and positive",
            ));
        }
        Ok(())
    }
}

/// A candidate node for search, ordered by distance.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Node id
    node_id: u32,
    /// Distance to query (lower is closer)
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.node_id == other.node_id
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Closer distance = "greater", so a max-heap of Candidate pops the
        // nearest first and a max-heap of Reverse<Candidate> keeps the
        // worst-of-best on top. Ties break toward the lower node id.
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .reverse()
            .then_with(|| other.node_id.cmp(&self.node_id))
    }
}

/// The current top of the hierarchy.
#[derive(Debug, Clone, Copy)]
struct EntryPoint {
    /// Node at the highest occupied level
    node: u32,
    /// Highest occupied level
    level: usize,
}

/// A search result.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Node id (insertion index)
    pub id: u32,
    /// Euclidean distance to the query
    pub distance: f32,
    /// The stored vector
    pub vector: Vec<f32>,
    /// The metadata supplied at insertion, verbatim
    pub metadata: Option<serde_json::Value>,
}

/// An incremental HNSW index over dense `f32` vectors.
///
/// `insert` is the only mutator and takes `&mut self`; `search` takes
/// `&self`, so shared references allow concurrent reads while the borrow
/// checker rules out reads racing a mutation.
pub struct Hnsw {
    params: HnswParams,
    store: NodeStore,
    graph: LayerGraph,
    entry: Option<EntryPoint>,
    rng: fastrand::Rng,
}

impl std::fmt::Debug for Hnsw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hnsw")
            .field("params", &self.params)
            .field("len", &self.store.len())
            .field("num_layers", &self.graph.num_layers())
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl Default for Hnsw {
    fn default() -> Self {
        Self::new()
    }
}

impl Hnsw {
    /// Create an empty index with default parameters.
    pub fn new() -> Self {
        let params = HnswParams::default();
        let rng = fastrand::Rng::with_seed(params.seed);
        Self {
            params,
            store: NodeStore::new(),
            graph: LayerGraph::new(),
            entry: None,
            rng,
        }
    }

    /// Create an empty index with the given parameters.
    pub fn with_params(params: HnswParams) -> Result<Self> {
        params.validate()?;
        let rng = fastrand::Rng::with_seed(params.seed);
        Ok(Self {
            params,
            store: NodeStore::new(),
            graph: LayerGraph::new(),
            entry: None,
            rng,
        })
    }

    /// Get index parameters.
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Number of nodes in the index.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True if nothing has been inserted yet.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Vector dimension, or `None` before the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.store.dimension()
    }

    /// Height of the layer stack.
    pub fn num_layers(&self) -> usize {
        self.graph.num_layers()
    }

    /// The `(node, level)` pair at the top of the hierarchy, or `None` for
    /// an empty index.
    pub fn entry_point(&self) -> Option<(u32, usize)> {
        self.entry.map(|e| (e.node, e.level))
    }

    /// Sampled level of a node.
    pub fn level(&self, id: u32) -> Option<usize> {
        self.graph.level(id)
    }

    /// Out-neighbours of a node on a layer.
    pub fn neighbors(&self, layer: usize, id: u32) -> Option<&[u32]> {
        self.graph.get_neighbors(layer, id)
    }

    /// The stored vector for a node.
    pub fn vector(&self, id: u32) -> Option<&[f32]> {
        self.store.vector(id)
    }

    /// The stored metadata for a node.
    pub fn metadata(&self, id: u32) -> Option<&serde_json::Value> {
        self.store.metadata(id)
    }

    /// Insert a vector with optional metadata and return the assigned id.
    ///
    /// The first insert fixes the index dimension; later inserts with a
    /// different dimension fail with `WrongDimension` and leave the index
    /// unchanged.
    pub fn insert(
        &mut self,
        vector: Vec<f32>,
        metadata: Option<serde_json::Value>,
    ) -> Result<u32> {
        let id = self.store.push(vector, metadata)?;
        let level = self.sample_level();
        self.graph.push_node(level);

        // First node: it is the entire hierarchy.
        let Some(entry) = self.entry else {
            self.entry = Some(EntryPoint { node: id, level });
            return Ok(id);
        };

        let query = self.store.vector_raw(id).to_vec();

        // Greedy descent through the layers above the new node's level.
        let mut entry_id = entry.node;
        for layer in ((level + 1)..=entry.level).rev() {
            if let Some(best) = self.search_layer(&query, entry_id, layer, 1).first() {
                entry_id = best.node_id;
            }
        }

        // Link layer by layer, from the highest layer the node shares with
        // the existing hierarchy down to the base.
        for layer in (0..=level.min(entry.level)).rev() {
            if self.graph.nodes_on_layer(layer) <= 1 {
                // Nothing but the new node lives here
                continue;
            }

            let candidates =
                self.search_layer(&query, entry_id, layer, self.params.ef_construction);
            let budget = if layer == 0 {
                self.params.m0
            } else {
                self.params.m
            };
            let selected = self.select_neighbors(&candidates, budget);

            for s in &selected {
                self.graph.push_neighbor(layer, id, s.node_id);
                self.graph.push_neighbor(layer, s.node_id, id);
            }

            if let Some(first) = selected.first() {
                entry_id = first.node_id;
            }
        }

        if level > entry.level {
            self.entry = Some(EntryPoint { node: id, level });
        }

        Ok(id)
    }

    /// Search for the `k` nearest neighbours using the default search beam.
    ///
    /// Returns up to `k` matches in ascending distance order. An empty
    /// index yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        self.search_with_ef(query, k, self.params.ef_search)
    }

    /// Search with an explicit beam width.
    ///
    /// `ef` bounds the candidate set kept during the base-layer search; at
    /// most `min(k, ef)` results come back. Larger beams trade latency for
    /// recall.
    pub fn search_with_ef(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<Match>> {
        if ef < 1 {
            return Err(Error::invalid_arg("ef", "search beam must be at least 1"));
        }

        let Some(entry) = self.entry else {
            return Ok(Vec::new());
        };

        let dim = self.store.dimension().unwrap_or(0);
        if query.len() != dim {
            return Err(Error::WrongDimension {
                expected: dim,
                got: query.len(),
            });
        }

        // Greedy descent to the layer just above the base.
        let mut entry_id = entry.node;
        for layer in (1..=entry.level).rev() {
            if let Some(best) = self.search_layer(query, entry_id, layer, 1).first() {
                entry_id = best.node_id;
            }
        }

        // Base-layer beam search.
        let candidates = self.search_layer(query, entry_id, 0, ef);

        Ok(candidates
            .into_iter()
            .take(k)
            .map(|c| Match {
                id: c.node_id,
                distance: c.distance,
                vector: self.store.vector_raw(c.node_id).to_vec(),
                metadata: self.store.metadata(c.node_id).cloned(),
            })
            .collect())
    }

    /// Save the index to a file.
    ///
    /// The snapshot is written to a temp file and renamed into place, so a
    /// crash mid-save never clobbers an existing snapshot.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        snapshot::write(self, path.as_ref())
    }

    /// Load an index from a file written by [`Hnsw::save`].
    ///
    /// The snapshot is checksum-verified and structurally validated; a
    /// loaded index answers every query identically to the one saved.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        snapshot::read(path.as_ref())
    }

    /// Draw a level from the geometric distribution `floor(-ln(u) * mL)`.
    fn sample_level(&mut self) -> usize {
        // u == 0 would make -ln(u) unbounded
        let u = self.rng.f64().max(f64::MIN_POSITIVE);
        let level = (-u.ln() * self.params.level_factor) as usize;
        level.min(MAX_LEVEL)
    }

    /// Bounded best-first search on a single layer.
    ///
    /// Starts at `entry_id`, expands along the layer's edges, and keeps the
    /// `ef` nearest nodes seen. Returns them sorted by ascending distance
    /// (ties toward the lower id). The entry node itself is always part of
    /// the candidate pool, so the result is never empty.
    fn search_layer(&self, query: &[f32], entry_id: u32, layer: usize, ef: usize) -> Vec<Candidate> {
        let entry_dist = euclidean_distance_simd(query, self.store.vector_raw(entry_id));
        let seed = Candidate {
            node_id: entry_id,
            distance: entry_dist,
        };

        let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 2);
        visited.insert(entry_id);

        // Frontier of nodes still to expand, nearest on top.
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        frontier.push(seed);

        // The ef best nodes seen so far, worst on top so overflow eviction
        // is O(log ef).
        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(ef + 1);
        results.push(Reverse(seed));

        while let Some(current) = frontier.pop() {
            let worst = results
                .peek()
                .map(|Reverse(c)| c.distance)
                .unwrap_or(f32::INFINITY);

            // The nearest unexpanded node is already worse than everything
            // we are keeping: no neighbour of it can improve the result.
            if results.len() >= ef && current.distance > worst {
                break;
            }

            for &neighbor_id in self.graph.neighbors(layer, current.node_id) {
                if !visited.insert(neighbor_id) {
                    continue;
                }

                let dist = euclidean_distance_simd(query, self.store.vector_raw(neighbor_id));
                let worst = results
                    .peek()
                    .map(|Reverse(c)| c.distance)
                    .unwrap_or(f32::INFINITY);

                if results.len() < ef || dist < worst {
                    let candidate = Candidate {
                        node_id: neighbor_id,
                        distance: dist,
                    };
                    frontier.push(candidate);
                    results.push(Reverse(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|Reverse(c)| c).collect();
        out.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        out
    }

    /// Prune a distance-sorted candidate list down to `budget` diverse
    /// neighbours.
    ///
    /// A candidate is kept only if it is at least as close to the query as
    /// it is to every neighbour already kept. A candidate sitting behind an
    /// already-kept neighbour is reachable through that neighbour, so its
    /// edge slot is better spent on another direction.
    fn select_neighbors(&self, candidates: &[Candidate], budget: usize) -> Vec<Candidate> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(budget.min(candidates.len()));

        for c in candidates {
            let c_vec = self.store.vector_raw(c.node_id);
            let spread = selected.iter().all(|s| {
                euclidean_distance_simd(c_vec, self.store.vector_raw(s.node_id)) >= c.distance
            });
            if spread {
                selected.push(*c);
                if selected.len() == budget {
                    break;
                }
            }
        }

        selected
    }

    /// Rebuild an index from snapshot sections.
    pub(crate) fn from_parts(
        params: HnswParams,
        store: NodeStore,
        graph: LayerGraph,
        entry: Option<(u32, usize)>,
    ) -> Self {
        let rng = fastrand::Rng::with_seed(params.seed);
        Self {
            params,
            store,
            graph,
            entry: entry.map(|(node, level)| EntryPoint { node, level }),
            rng,
        }
    }

    pub(crate) fn store(&self) -> &NodeStore {
        &self.store
    }

    pub(crate) fn graph(&self) -> &LayerGraph {
        &self.graph
    }
}
