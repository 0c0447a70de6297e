#![doc = include_str!("../README.md")]

use chrono::{FixedOffset, Offset, Utc};
use std::{
    fmt::Write as _,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};
use tracing::debug;

pub mod index_cache;
pub mod ltp;
pub mod messaging;
pub mod ndb;

mod block_sig;
mod encode;

#[cfg(test)]
pub(crate) mod testing;

use ltp::{LtpResult, PropertyContext};
use messaging::{MessagingResult, NamedPropertyMap};
use ndb::*;

/// Category of a decode failure, shared by every layer's error type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ErrorKind {
    /// Magic values, signatures, trailers or sizes that do not match the format.
    FormatViolation,
    /// A BID or NID that is not in its index.
    DanglingReference,
    /// A valid structure this crate does not decode.
    UnsupportedStructure,
    /// A property type with no decoder.
    UnsupportedType,
    /// A heap or B-tree index past the end of its allocation table.
    OutOfRange,
    Io,
}

/// Settings for [PstFile::open_with].
#[derive(Clone, Debug)]
pub struct PstOptions {
    time_zone: FixedOffset,
    index_cache_dir: Option<PathBuf>,
    max_tree_depth: u8,
}

impl Default for PstOptions {
    fn default() -> Self {
        Self {
            time_zone: Utc.fix(),
            index_cache_dir: None,
            max_tree_depth: MAX_BTREE_DEPTH,
        }
    }
}

impl PstOptions {
    /// Zone in which `PtypTime` values are returned.
    pub fn with_time_zone(mut self, time_zone: FixedOffset) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// Keep a snapshot of the node and block indexes in `dir`.
    pub fn with_index_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.index_cache_dir = Some(dir.into());
        self
    }

    /// Deepest page B-tree accepted when the file is opened.
    pub fn with_max_tree_depth(mut self, max_tree_depth: u8) -> Self {
        self.max_tree_depth = max_tree_depth;
        self
    }

    pub fn time_zone(&self) -> &FixedOffset {
        &self.time_zone
    }

    pub fn index_cache_dir(&self) -> Option<&Path> {
        self.index_cache_dir.as_deref()
    }

    pub fn max_tree_depth(&self) -> u8 {
        self.max_tree_depth
    }
}

/// [PST File](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/6b57253b-0853-47bb-99bb-d4b8f78105f0)
///
/// The node and block indexes are read once by [PstFile::open] and never change afterwards. Reads
/// share one file handle behind a [Mutex].
pub struct PstFile {
    file: Mutex<File>,
    path: PathBuf,
    options: PstOptions,
    header: Header,
    nodes: NodeIndex,
    blocks: BlockIndex,
    named_props: OnceLock<Option<NamedPropertyMap>>,
}

impl PstFile {
    pub fn open(path: impl AsRef<Path>) -> NdbResult<Self> {
        Self::open_with(path, PstOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: PstOptions) -> NdbResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;

        let mut header_bytes = [0_u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = Header::read(&mut header_bytes.as_slice())?;

        let cached = options
            .index_cache_dir()
            .and_then(|dir| index_cache::load(dir, path, &header_bytes));
        let (nodes, blocks) = match cached {
            Some(indexes) => indexes,
            None => {
                let indexes = read_indexes(&mut file, &header, options.max_tree_depth())?;
                if let Some(dir) = options.index_cache_dir() {
                    index_cache::save(dir, path, &header_bytes, &indexes.0, &indexes.1);
                }
                indexes
            }
        };

        debug!(
            path = %path.display(),
            client_version = header.client_version(),
            crypt_method = ?header.crypt_method(),
            nodes = nodes.len(),
            blocks = blocks.len(),
            "opened PST file"
        );

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            options,
            header,
            nodes,
            blocks,
            named_props: OnceLock::new(),
        })
    }

    /// Release the file handle. Dropping the [PstFile] does the same.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closed PST file");
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &PstOptions {
        &self.options
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn nodes(&self) -> &NodeIndex {
        &self.nodes
    }

    pub fn blocks(&self) -> &BlockIndex {
        &self.blocks
    }

    pub fn node(&self, node: NodeId) -> NdbResult<&NodeEntry> {
        self.nodes.get(node)
    }

    /// See [NodeIndex::list_nids].
    pub fn list_nids(&self, id_type: NodeIdType, scope: Option<NodeId>) -> NdbResult<NodeIds<'_>> {
        self.nodes.list_nids(id_type, scope)
    }

    /// The data stream of `node`, or of its sub-node `local`, with any XBLOCK tree reassembled.
    pub fn read_nid(&self, node: NodeId, local: Option<NodeId>) -> NdbResult<Vec<u8>> {
        let block = self.nodes.data_block(node, local)?;
        let mut file = self.file.lock().map_err(|_| NdbError::FailedToLockFile)?;
        let mut store = BlockStore::new(&mut *file, &self.blocks, self.header.crypt_method());
        store.read_block(block)
    }

    /// The [NamedPropertyMap], read on first use. `None` if the file has no
    /// `NID_NAME_TO_ID_MAP` node.
    pub fn named_property_map(&self) -> MessagingResult<Option<&NamedPropertyMap>> {
        if let Some(named_props) = self.named_props.get() {
            return Ok(named_props.as_ref());
        }

        let named_props = match self.nodes.get(NID_NAME_TO_ID_MAP) {
            Ok(_) => {
                let context = PropertyContext::open_unnamed(self, NID_NAME_TO_ID_MAP, None)?;
                Some(NamedPropertyMap::read(&context)?)
            }
            Err(_) => {
                debug!("no NID_NAME_TO_ID_MAP node");
                None
            }
        };

        Ok(self.named_props.get_or_init(|| named_props).as_ref())
    }

    /// The PC of `NID_MESSAGE_STORE`.
    pub fn message_store(&self) -> LtpResult<PropertyContext<'_>> {
        PropertyContext::open(self, NID_MESSAGE_STORE, None)
    }

    /// The PC of `NID_ROOT_FOLDER`.
    pub fn root_folder(&self) -> LtpResult<PropertyContext<'_>> {
        PropertyContext::open(self, NID_ROOT_FOLDER, None)
    }
}

fn read_indexes(
    file: &mut File,
    header: &Header,
    max_tree_depth: u8,
) -> NdbResult<(NodeIndex, BlockIndex)> {
    let root = header.root();
    let blocks = BlockIndex::new(read_btree::<_, BlockBTreeEntry>(
        file,
        root.block_btree(),
        max_tree_depth,
    )?);
    let node_entries = read_btree::<_, NodeBTreeEntry>(file, root.node_btree(), max_tree_depth)?;

    let mut store = BlockStore::new(file, &blocks, header.crypt_method());
    let nodes = NodeIndex::build(&mut store, node_entries)?;
    Ok((nodes, blocks))
}

/// Render `data` as hex, 16 bytes per line: an `%08X` offset, the bytes as `%02X`, then the
/// printable ASCII characters with `.` for the rest.
pub fn hex_dump(data: &[u8]) -> String {
    const LINE_SIZE: usize = 16;

    let mut output = String::new();
    for (line, chunk) in data.chunks(LINE_SIZE).enumerate() {
        let _ = write!(output, "{:08X} ", line * LINE_SIZE);
        for byte in chunk {
            let _ = write!(output, "{byte:02X} ");
        }
        output.extend(std::iter::repeat_n(' ', 3 * (LINE_SIZE - chunk.len())));
        output.extend(chunk.iter().map(|byte| match *byte {
            byte @ 0x20..0x80 => char::from(byte),
            _ => '.',
        }));
        output.push('\n');
    }
    output
}
