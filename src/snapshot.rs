//! Binary snapshot format for index persistence.
//!
//! A snapshot is a single file capturing the whole index: parameters, the
//! entry point, per-node levels, the packed vector buffer, the per-layer
//! adjacency, and the metadata column.
//!
//! # File Layout
//!
//! ```text
//! [64]  header: magic, version, dimension, node_count,
//!       vector/graph/metadata offsets, checksum
//! [..]  params block: m, m0, ef_construction, ef_search (u32 each),
//!       level_factor (f64), seed (u64)
//! [..]  entry block: has_entry u8 + 3 pad, entry_id u32, entry_level u32
//! [..]  levels: node_count bytes
//! [..]  zero padding to a 64-byte-aligned vector_offset
//! [..]  vectors: node_count * dimension little-endian f32
//! [..]  graph: layer_count u32, then per layer per node:
//!       len u32 + len neighbour ids (u32)
//! [..]  metadata: per node: has u8; if set, len u32 + JSON bytes
//! ```
//!
//! All integers are little-endian. The checksum is BLAKE3 over the body
//! (everything after the header) truncated to 64 bits, so a torn or
//! bit-flipped file is rejected on load rather than half-parsed.
//!
//! Writes go to a temp file that is synced and renamed into place; loads
//! memory-map the file and validate the structure before building the index.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::MmapOptions;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::graph::LayerGraph;
use crate::hnsw::{Hnsw, HnswParams};
use crate::store::NodeStore;

/// Magic bytes for snapshot files: "swl\0"
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"swl\0";
/// Current snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;
/// Header size: 64 bytes
pub const HEADER_SIZE: usize = 64;
/// Alignment for the vector section (64 bytes for AVX-512)
pub const VECTOR_ALIGNMENT: usize = 64;

/// Snapshot file header (64 bytes).
///
/// Layout (text, not Rust code):
/// ```text
/// [4]   magic: "swl\0"
/// [2]   version: u16
/// [2]   reserved
/// [4]   dimension: u32 (0 for a never-inserted index)
/// [8]   node_count: u64
/// [8]   vector_offset: u64
/// [8]   graph_offset: u64
/// [8]   metadata_offset: u64
/// [8]   checksum: u64
/// [8]   reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SnapshotHeader {
    magic: [u8; 4],
    version: u16,
    dimension: u32,
    node_count: u64,
    vector_offset: u64,
    graph_offset: u64,
    metadata_offset: u64,
    checksum: u64,
}

impl SnapshotHeader {
    /// Serialize header to 64 bytes.
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_all(&self.magic).unwrap();
        cursor.write_u16::<LittleEndian>(self.version).unwrap();
        cursor.write_u16::<LittleEndian>(0).unwrap(); // reserved
        cursor.write_u32::<LittleEndian>(self.dimension).unwrap();
        cursor.write_u64::<LittleEndian>(self.node_count).unwrap();
        cursor.write_u64::<LittleEndian>(self.vector_offset).unwrap();
        cursor.write_u64::<LittleEndian>(self.graph_offset).unwrap();
        cursor.write_u64::<LittleEndian>(self.metadata_offset).unwrap();
        cursor.write_u64::<LittleEndian>(self.checksum).unwrap();
        cursor.write_u64::<LittleEndian>(0).unwrap(); // reserved

        buf
    }

    /// Deserialize and sanity-check a header.
    fn from_bytes(bytes: &[u8; HEADER_SIZE], file: &Path) -> Result<Self> {
        let mut cursor = Cursor::new(&bytes[..]);

        let mut magic = [0u8; 4];
        cursor
            .read_exact(&mut magic)
            .map_err(|e| Error::corruption(file, 0, format!("failed to read magic: {}", e)))?;

        if &magic != SNAPSHOT_MAGIC {
            return Err(Error::corruption(
                file,
                0,
                format!("invalid magic: expected {:?}, got {:?}", SNAPSHOT_MAGIC, magic),
            ));
        }

        let version = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| Error::corruption(file, 4, format!("failed to read version: {}", e)))?;

        if version != SNAPSHOT_VERSION {
            return Err(Error::corruption(
                file,
                4,
                format!(
                    "unsupported version: expected {}, got {}",
                    SNAPSHOT_VERSION, version
                ),
            ));
        }

        let _reserved = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| Error::corruption(file, 6, format!("failed to read reserved: {}", e)))?;

        let dimension = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::corruption(file, 8, format!("failed to read dimension: {}", e)))?;

        let node_count = cursor
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::corruption(file, 12, format!("failed to read node_count: {}", e)))?;

        let vector_offset = cursor.read_u64::<LittleEndian>().map_err(|e| {
            Error::corruption(file, 20, format!("failed to read vector_offset: {}", e))
        })?;

        let graph_offset = cursor.read_u64::<LittleEndian>().map_err(|e| {
            Error::corruption(file, 28, format!("failed to read graph_offset: {}", e))
        })?;

        let metadata_offset = cursor.read_u64::<LittleEndian>().map_err(|e| {
            Error::corruption(file, 36, format!("failed to read metadata_offset: {}", e))
        })?;

        let checksum = cursor
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::corruption(file, 44, format!("failed to read checksum: {}", e)))?;

        Ok(Self {
            magic,
            version,
            dimension,
            node_count,
            vector_offset,
            graph_offset,
            metadata_offset,
            checksum,
        })
    }
}

/// Checksum over the body (everything after the header).
/// Uses BLAKE3 truncated to 64 bits for speed.
fn compute_checksum(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let bytes = hash.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Align a value to the specified alignment.
fn align_to(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Write the index to `path` atomically.
pub(crate) fn write(index: &Hnsw, path: &Path) -> Result<()> {
    let (body, vector_offset, graph_offset, metadata_offset) = encode_body(index)
        .map_err(|e| Error::Serialization(format!("failed to encode snapshot: {}", e)))?;

    let header = SnapshotHeader {
        magic: *SNAPSHOT_MAGIC,
        version: SNAPSHOT_VERSION,
        dimension: index.dimension().unwrap_or(0) as u32,
        node_count: index.len() as u64,
        vector_offset,
        graph_offset,
        metadata_offset,
        checksum: compute_checksum(&body),
    };

    let tmp_path = path.with_extension("tmp");

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(Error::io_err(&tmp_path, "failed to create snapshot file"))?;

    file.write_all(&header.to_bytes())
        .map_err(Error::io_err(&tmp_path, "failed to write header"))?;
    file.write_all(&body)
        .map_err(Error::io_err(&tmp_path, "failed to write body"))?;
    file.sync_all()
        .map_err(Error::io_err(&tmp_path, "failed to sync snapshot file"))?;
    drop(file);

    std::fs::rename(&tmp_path, path)
        .map_err(Error::io_err(path, "failed to rename snapshot into place"))?;

    Ok(())
}

/// Serialize the body sections, returning the section offsets (absolute
/// file positions).
fn encode_body(index: &Hnsw) -> std::io::Result<(Vec<u8>, u64, u64, u64)> {
    let store = index.store();
    let graph = index.graph();
    let params = index.params();

    let mut body: Vec<u8> = Vec::new();

    // Params block
    body.write_u32::<LittleEndian>(params.m as u32)?;
    body.write_u32::<LittleEndian>(params.m0 as u32)?;
    body.write_u32::<LittleEndian>(params.ef_construction as u32)?;
    body.write_u32::<LittleEndian>(params.ef_search as u32)?;
    body.write_f64::<LittleEndian>(params.level_factor)?;
    body.write_u64::<LittleEndian>(params.seed)?;

    // Entry block
    match index.entry_point() {
        Some((node, level)) => {
            body.write_u8(1)?;
            body.write_all(&[0u8; 3])?;
            body.write_u32::<LittleEndian>(node)?;
            body.write_u32::<LittleEndian>(level as u32)?;
        }
        None => {
            body.write_u8(0)?;
            body.write_all(&[0u8; 3])?;
            body.write_u32::<LittleEndian>(0)?;
            body.write_u32::<LittleEndian>(0)?;
        }
    }

    // Levels
    body.write_all(graph.levels())?;

    // Vectors, 64-byte aligned within the file
    let vector_offset = align_to(HEADER_SIZE + body.len(), VECTOR_ALIGNMENT);
    body.resize(vector_offset - HEADER_SIZE, 0);
    for &value in store.buffer() {
        body.write_f32::<LittleEndian>(value)?;
    }

    // Adjacency, length-prefixed per node per layer
    let graph_offset = HEADER_SIZE + body.len();
    body.write_u32::<LittleEndian>(graph.tables().len() as u32)?;
    for table in graph.tables() {
        for list in table {
            body.write_u32::<LittleEndian>(list.len() as u32)?;
            for &neighbor in list {
                body.write_u32::<LittleEndian>(neighbor)?;
            }
        }
    }

    // Metadata
    let metadata_offset = HEADER_SIZE + body.len();
    for entry in store.metadata_column() {
        match entry {
            Some(value) => {
                let json = value.to_string();
                body.write_u8(1)?;
                body.write_u32::<LittleEndian>(json.len() as u32)?;
                body.write_all(json.as_bytes())?;
            }
            None => body.write_u8(0)?,
        }
    }

    Ok((
        body,
        vector_offset as u64,
        graph_offset as u64,
        metadata_offset as u64,
    ))
}

/// Load an index from `path`, verifying the checksum and validating the
/// structure before handing the data to the graph.
pub(crate) fn read(path: &Path) -> Result<Hnsw> {
    let file = File::open(path).map_err(Error::io_err(path, "failed to open snapshot file"))?;

    let file_meta = file
        .metadata()
        .map_err(Error::io_err(path, "failed to get metadata"))?;
    let file_size = file_meta.len();

    if file_size < HEADER_SIZE as u64 {
        return Err(Error::corruption(
            path,
            0,
            format!("file too small: {} bytes (min {})", file_size, HEADER_SIZE),
        ));
    }

    let mmap = unsafe {
        MmapOptions::new()
            .map(&file)
            .map_err(Error::io_err(path, "failed to mmap snapshot"))?
    };

    // Pre-fault pages to surface I/O errors early
    #[cfg(unix)]
    unsafe {
        libc::madvise(
            mmap.as_ptr() as *mut libc::c_void,
            mmap.len(),
            libc::MADV_POPULATE_READ,
        );
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&mmap[..HEADER_SIZE]);
    let header = SnapshotHeader::from_bytes(&header_bytes, path)?;

    // Verify checksum before trusting any of the body
    let body = &mmap[HEADER_SIZE..];
    let computed = compute_checksum(body);
    if computed != header.checksum {
        return Err(Error::ChecksumMismatch {
            file: path.to_path_buf(),
            expected: header.checksum,
            got: computed,
        });
    }

    // Section offsets must fall inside the file, in order
    for (name, offset) in [
        ("vector_offset", header.vector_offset),
        ("graph_offset", header.graph_offset),
        ("metadata_offset", header.metadata_offset),
    ] {
        if offset < HEADER_SIZE as u64 || offset > file_size {
            return Err(Error::corruption(
                path,
                offset,
                format!("{} out of bounds (file size {})", name, file_size),
            ));
        }
    }
    if header.graph_offset < header.vector_offset || header.metadata_offset < header.graph_offset {
        return Err(Error::corruption(path, 0, "section offsets out of order"));
    }

    decode_body(&header, body, path)
}

/// Parse the body sections into an index, enforcing the graph's structural
/// invariants.
fn decode_body(header: &SnapshotHeader, body: &[u8], path: &Path) -> Result<Hnsw> {
    let node_count = usize::try_from(header.node_count)
        .map_err(|_| Error::corruption(path, 12, "node count does not fit this platform"))?;
    let dimension = header.dimension as usize;

    if node_count > 0 && dimension == 0 {
        return Err(Error::corruption(path, 8, "zero dimension with nodes present"));
    }
    if node_count == 0 && dimension != 0 {
        return Err(Error::corruption(path, 8, "dimension set on an empty index"));
    }

    let mut cursor = Cursor::new(body);

    // Params block
    let m = read_u32(&mut cursor, path, "m")? as usize;
    let m0 = read_u32(&mut cursor, path, "m0")? as usize;
    let ef_construction = read_u32(&mut cursor, path, "ef_construction")? as usize;
    let ef_search = read_u32(&mut cursor, path, "ef_search")? as usize;
    let level_factor = read_f64(&mut cursor, path, "level_factor")?;
    let seed = read_u64(&mut cursor, path, "seed")?;

    let params = HnswParams {
        m,
        m0,
        ef_construction,
        ef_search,
        level_factor,
        seed,
    };
    if let Err(e) = params.validate() {
        return Err(Error::corruption(
            path,
            HEADER_SIZE as u64,
            format!("invalid parameters: {}", e),
        ));
    }

    // Entry block
    let has_entry = read_u8(&mut cursor, path, "has_entry")?;
    let mut pad = [0u8; 3];
    cursor
        .read_exact(&mut pad)
        .map_err(|e| corruption_at(path, &cursor, format!("failed to read padding: {}", e)))?;
    let entry_id = read_u32(&mut cursor, path, "entry_id")?;
    let entry_level = read_u32(&mut cursor, path, "entry_level")? as usize;

    // Levels
    let mut levels = vec![0u8; node_count];
    cursor
        .read_exact(&mut levels)
        .map_err(|e| corruption_at(path, &cursor, format!("failed to read levels: {}", e)))?;

    let max_level = levels.iter().copied().max().map(|l| l as usize);

    // Vectors
    cursor.set_position(header.vector_offset - HEADER_SIZE as u64);
    let value_count = node_count.checked_mul(dimension).ok_or_else(|| {
        Error::corruption(path, header.vector_offset, "vector section size overflow")
    })?;
    let mut vector_buffer = Vec::with_capacity(value_count);
    for _ in 0..value_count {
        vector_buffer.push(read_f32(&mut cursor, path, "vector value")?);
    }

    // Adjacency
    cursor.set_position(header.graph_offset - HEADER_SIZE as u64);
    let layer_count = read_u32(&mut cursor, path, "layer_count")? as usize;

    let expected_layers = max_level.map_or(0, |l| l + 1);
    if layer_count != expected_layers {
        return Err(Error::corruption(
            path,
            header.graph_offset,
            format!(
                "layer count {} does not match level assignments (expected {})",
                layer_count, expected_layers
            ),
        ));
    }

    let mut layers: Vec<Vec<Vec<u32>>> = Vec::with_capacity(layer_count);
    let mut seen: HashSet<u32> = HashSet::new();
    for layer in 0..layer_count {
        let mut table: Vec<Vec<u32>> = Vec::with_capacity(node_count);
        for id in 0..node_count as u32 {
            let len = read_u32(&mut cursor, path, "neighbor count")? as usize;
            if len > node_count {
                return Err(corruption_at(
                    path,
                    &cursor,
                    format!("node {} claims {} neighbours on layer {}", id, len, layer),
                ));
            }
            if len > 0 && (levels[id as usize] as usize) < layer {
                return Err(corruption_at(
                    path,
                    &cursor,
                    format!("node {} has edges above its level on layer {}", id, layer),
                ));
            }

            let mut list = Vec::with_capacity(len);
            seen.clear();
            for _ in 0..len {
                let neighbor = read_u32(&mut cursor, path, "neighbor id")?;
                if neighbor as usize >= node_count {
                    return Err(corruption_at(
                        path,
                        &cursor,
                        format!("neighbour id {} out of range on layer {}", neighbor, layer),
                    ));
                }
                if neighbor == id {
                    return Err(corruption_at(
                        path,
                        &cursor,
                        format!("self-loop on node {} at layer {}", id, layer),
                    ));
                }
                if !seen.insert(neighbor) {
                    return Err(corruption_at(
                        path,
                        &cursor,
                        format!(
                            "duplicate neighbour {} on node {} at layer {}",
                            neighbor, id, layer
                        ),
                    ));
                }
                list.push(neighbor);
            }
            table.push(list);
        }
        layers.push(table);
    }

    // Metadata
    cursor.set_position(header.metadata_offset - HEADER_SIZE as u64);
    let mut metadata: Vec<Option<serde_json::Value>> = Vec::with_capacity(node_count);
    for id in 0..node_count {
        let has = read_u8(&mut cursor, path, "metadata flag")?;
        if has == 0 {
            metadata.push(None);
            continue;
        }
        let len = read_u32(&mut cursor, path, "metadata length")? as usize;
        let mut json_bytes = vec![0u8; len];
        cursor.read_exact(&mut json_bytes).map_err(|e| {
            corruption_at(path, &cursor, format!("failed to read metadata: {}", e))
        })?;
        let value: serde_json::Value = serde_json::from_slice(&json_bytes).map_err(|e| {
            corruption_at(path, &cursor, format!("invalid metadata JSON for node {}: {}", id, e))
        })?;
        metadata.push(Some(value));
    }

    // Entry point consistency
    let entry = if node_count == 0 {
        if has_entry != 0 {
            return Err(Error::corruption(path, 0, "entry point set on an empty index"));
        }
        None
    } else {
        if has_entry == 0 {
            return Err(Error::corruption(path, 0, "missing entry point"));
        }
        if entry_id as usize >= node_count {
            return Err(Error::corruption(
                path,
                0,
                format!("entry point {} out of range", entry_id),
            ));
        }
        let top = max_level.unwrap_or(0);
        if entry_level != top || levels[entry_id as usize] as usize != entry_level {
            return Err(Error::corruption(
                path,
                0,
                format!(
                    "entry point ({}, level {}) does not sit at the top of the hierarchy",
                    entry_id, entry_level
                ),
            ));
        }
        Some((entry_id, entry_level))
    };

    let store_dimension = if node_count > 0 { Some(dimension) } else { None };
    let store = NodeStore::from_parts(store_dimension, vector_buffer, metadata);
    let graph = LayerGraph::from_parts(levels, layers);

    Ok(Hnsw::from_parts(params, store, graph, entry))
}

fn corruption_at(path: &Path, cursor: &Cursor<&[u8]>, message: String) -> Error {
    Error::corruption(path, HEADER_SIZE as u64 + cursor.position(), message)
}

fn read_u8(cursor: &mut Cursor<&[u8]>, path: &Path, what: &str) -> Result<u8> {
    let offset = HEADER_SIZE as u64 + cursor.position();
    cursor
        .read_u8()
        .map_err(|e| Error::corruption(path, offset, format!("failed to read {}: {}", what, e)))
}

fn read_u32(cursor: &mut Cursor<&[u8]>, path: &Path, what: &str) -> Result<u32> {
    let offset = HEADER_SIZE as u64 + cursor.position();
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::corruption(path, offset, format!("failed to read {}: {}", what, e)))
}

fn read_u64(cursor: &mut Cursor<&[u8]>, path: &Path, what: &str) -> Result<u64> {
    let offset = HEADER_SIZE as u64 + cursor.position();
    cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::corruption(path, offset, format!("failed to read {}: {}", what, e)))
}

fn read_f32(cursor: &mut Cursor<&[u8]>, path: &Path, what: &str) -> Result<f32> {
    let offset = HEADER_SIZE as u64 + cursor.position();
    cursor
        .read_f32::<LittleEndian>()
        .map_err(|e| Error::corruption(path, offset, format!("failed to read {}: {}", what, e)))
}

fn read_f64(cursor: &mut Cursor<&[u8]>, path: &Path, what: &str) -> Result<f64> {
    let offset = HEADER_SIZE as u64 + cursor.position();
    cursor
        .read_f64::<LittleEndian>()
        .map_err(|e| Error::corruption(path, offset, format!("failed to read {}: {}", what, e)))
}
