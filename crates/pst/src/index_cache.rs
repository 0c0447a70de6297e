//! Side-car snapshot of the [NodeIndex] and [BlockIndex] built when a file is opened.
//!
//! The snapshot lives at `{index_cache_dir}/{file stem}-{path hash}_ndb.idx`. It is only trusted
//! when it is at least as new as the PST file and its copy of the header matches.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::ndb::*;

const CACHE_MAGIC: &[u8; 8] = b"PSTIDX01";

/// Where the snapshot of `source` lives under `dir`. The name carries a hash of the canonical
/// path, so files with the same stem in different folders get their own snapshot.
pub fn cache_path(dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("pst"));
    let source = fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
    let hash = blake3::hash(source.as_os_str().as_encoded_bytes()).to_hex();
    dir.join(format!("{stem}-{}_ndb.idx", &hash.as_str()[..16]))
}

/// Load the snapshot of `source`, or `None` if there is no usable one.
pub fn load(dir: &Path, source: &Path, header: &[u8]) -> Option<(NodeIndex, BlockIndex)> {
    let path = cache_path(dir, source);
    match read_cache(&path, source, header) {
        Ok(Some(indexes)) => {
            debug!(path = %path.display(), "index cache hit");
            Some(indexes)
        }
        Ok(None) => {
            debug!(path = %path.display(), "index cache miss");
            None
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read index cache");
            None
        }
    }
}

/// Write the snapshot of `source`. Failures are logged and otherwise ignored.
pub fn save(dir: &Path, source: &Path, header: &[u8], nodes: &NodeIndex, blocks: &BlockIndex) {
    let path = cache_path(dir, source);
    match write_cache(dir, &path, header, nodes, blocks) {
        Ok(()) => debug!(path = %path.display(), "wrote index cache"),
        Err(err) => warn!(path = %path.display(), %err, "failed to write index cache"),
    }
}

fn read_cache(
    path: &Path,
    source: &Path,
    header: &[u8],
) -> NdbResult<Option<(NodeIndex, BlockIndex)>> {
    let cache_time = match fs::metadata(path) {
        Ok(metadata) => metadata.modified()?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if cache_time < fs::metadata(source)?.modified()? {
        return Ok(None);
    }

    let mut f = BufReader::new(File::open(path)?);

    let mut magic = [0_u8; CACHE_MAGIC.len()];
    f.read_exact(&mut magic)?;
    if &magic != CACHE_MAGIC {
        return Ok(None);
    }

    let mut cached_header = vec![0_u8; header.len()];
    f.read_exact(&mut cached_header)?;
    if cached_header != header {
        return Ok(None);
    }

    let block_count = f.read_u32::<LittleEndian>()?;
    let blocks = (0..block_count)
        .map(|_| BlockBTreeEntry::read(&mut f))
        .collect::<NdbResult<Vec<_>>>()?;

    let node_count = f.read_u32::<LittleEndian>()?;
    let nodes = (0..node_count)
        .map(|_| read_node(&mut f))
        .collect::<NdbResult<Vec<_>>>()?;

    Ok(Some((NodeIndex::new(nodes), BlockIndex::new(blocks))))
}

fn read_node(f: &mut dyn Read) -> NdbResult<NodeEntry> {
    let entry = NodeBTreeEntry::read(f)?;

    let sub_node_count = f.read_u32::<LittleEndian>()?;
    let sub_nodes = (0..sub_node_count)
        .map(|_| -> NdbResult<SubNodeEntry> {
            let node = NodeId::read(f)?;
            let data = BlockId::read(f)?;
            let sub_node = BlockId::read(f)?;
            let sub_node = if sub_node.is_null() {
                None
            } else {
                Some(sub_node)
            };
            Ok(SubNodeEntry::new(node, data, sub_node))
        })
        .collect::<NdbResult<Vec<_>>>()?;

    Ok(NodeEntry::new(entry, sub_nodes))
}

fn write_cache(
    dir: &Path,
    path: &Path,
    header: &[u8],
    nodes: &NodeIndex,
    blocks: &BlockIndex,
) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut f = BufWriter::new(File::create(path)?);

    f.write_all(CACHE_MAGIC)?;
    f.write_all(header)?;

    f.write_u32::<LittleEndian>(blocks.len() as u32)?;
    for entry in blocks.entries() {
        entry.write(&mut f)?;
    }

    f.write_u32::<LittleEndian>(nodes.len() as u32)?;
    for node in nodes.entries() {
        node.btree_entry().write(&mut f)?;

        let sub_nodes: Vec<_> = node.sub_nodes().collect();
        f.write_u32::<LittleEndian>(sub_nodes.len() as u32)?;
        for sub_node in sub_nodes {
            sub_node.node().write(&mut f)?;
            sub_node.data().write(&mut f)?;
            sub_node.sub_node().unwrap_or_default().write(&mut f)?;
        }
    }

    f.flush()
}
