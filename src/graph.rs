//! Layered adjacency for the hierarchical graph.
//!
//! Layer 0 holds every node; layer `l > 0` holds the subset of nodes whose
//! sampled level is at least `l`. Each layer is a dense `Vec<Vec<u32>>`
//! keyed by node id and kept at full node count, so neighbour lookups are
//! plain indexing; membership is decided by the per-node level assignment
//! rather than by the shape of the tables.
//!
//! Per-layer occupancy counters are maintained on every node admission so
//! insertion can ask "does this layer hold anything besides the new node"
//! without scanning.

/// The stack of per-layer neighbour tables plus level bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct LayerGraph {
    /// Sampled level per node, indexed by id
    levels: Vec<u8>,
    /// Per-layer neighbour lists: `layers[l][id]` holds the out-neighbours
    /// of `id` on layer `l`. Every layer table has one entry per node.
    layers: Vec<Vec<Vec<u32>>>,
    /// Number of nodes with level >= l, per layer
    occupancy: Vec<usize>,
}

impl LayerGraph {
    /// Create an empty graph with no layers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes admitted to the graph.
    pub fn num_nodes(&self) -> usize {
        self.levels.len()
    }

    /// Height of the layer stack.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Sampled level of a node, or `None` if the id is out of range.
    pub fn level(&self, id: u32) -> Option<usize> {
        self.levels.get(id as usize).map(|&l| l as usize)
    }

    /// True if the node participates in the given layer.
    pub fn on_layer(&self, layer: usize, id: u32) -> bool {
        self.level(id).is_some_and(|l| l >= layer)
    }

    /// Number of nodes participating in a layer.
    pub fn nodes_on_layer(&self, layer: usize) -> usize {
        self.occupancy.get(layer).copied().unwrap_or(0)
    }

    /// Admit the next node (id = current node count) at the given level,
    /// growing the layer stack if the level exceeds it.
    pub fn push_node(&mut self, level: usize) {
        debug_assert!(level <= u8::MAX as usize);

        let num_nodes = self.levels.len();
        while self.layers.len() <= level {
            self.layers.push(vec![Vec::new(); num_nodes]);
            self.occupancy.push(0);
        }

        self.levels.push(level as u8);
        for table in &mut self.layers {
            table.push(Vec::new());
        }
        for l in 0..=level {
            self.occupancy[l] += 1;
        }
    }

    /// Out-neighbours of a node on a layer.
    pub fn neighbors(&self, layer: usize, id: u32) -> &[u32] {
        &self.layers[layer][id as usize]
    }

    /// Out-neighbours of a node on a layer, bounds-checked.
    pub fn get_neighbors(&self, layer: usize, id: u32) -> Option<&[u32]> {
        self.layers
            .get(layer)
            .and_then(|table| table.get(id as usize))
            .map(|list| list.as_slice())
    }

    /// Append a neighbour to a node's list on a layer.
    pub fn push_neighbor(&mut self, layer: usize, id: u32, neighbor: u32) {
        self.layers[layer][id as usize].push(neighbor);
    }

    /// The per-node level column (snapshot serialization).
    pub(crate) fn levels(&self) -> &[u8] {
        &self.levels
    }

    /// The per-layer neighbour tables (snapshot serialization).
    pub(crate) fn tables(&self) -> &[Vec<Vec<u32>>] {
        &self.layers
    }

    /// Rebuild a graph from snapshot sections. The caller has already
    /// validated table shapes and neighbour id ranges.
    pub(crate) fn from_parts(levels: Vec<u8>, layers: Vec<Vec<Vec<u32>>>) -> Self {
        let mut occupancy = vec![0usize; layers.len()];
        for &level in &levels {
            for slot in occupancy.iter_mut().take(level as usize + 1) {
                *slot += 1;
            }
        }
        Self {
            levels,
            layers,
            occupancy,
        }
    }
}
