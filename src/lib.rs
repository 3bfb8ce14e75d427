//! smallworld - Embedded HNSW approximate nearest-neighbour index
//!
//! smallworld is an in-memory, incrementally built HNSW (Hierarchical
//! Navigable Small World) index over dense `f32` vectors. It prioritizes
//! predictable behaviour and a small, self-contained core.
//!
//! # Core Philosophy
//!
//! - **Deterministic construction**: level sampling is seedable, so a fixed
//!   seed and insertion order always produce the same graph
//! - **Single-writer discipline**: `insert` takes `&mut self`, `search`
//!   takes `&self`; the borrow checker is the concurrency model
//! - **Explicit persistence**: snapshots use a versioned, checksummed binary
//!   layout that is validated on load, never trusted
//!
//! # Example
//!
//! ```no_run
//! use smallworld::Hnsw;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut index = Hnsw::new();
//!
//! // Insert vectors with optional metadata
//! index.insert(
//!     vec![0.1, 0.7, 0.2],
//!     Some(serde_json::json!({"title": "Example"})),
//! )?;
//!
//! // Top-k similarity search
//! let matches = index.search(&[0.1, 0.7, 0.2], 5)?;
//! for m in &matches {
//!     println!("{} at distance {}", m.id, m.distance);
//! }
//!
//! // Persist and restore
//! index.save("products.swl")?;
//! let restored = Hnsw::load("products.swl")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod distance;
pub mod error;
pub mod graph;
pub mod hnsw;
mod snapshot;
pub mod store;

pub use distance::euclidean_distance_simd;
pub use error::{Error, Result};
pub use graph::LayerGraph;
pub use hnsw::{Hnsw, HnswParams, Match};
pub use store::NodeStore;
