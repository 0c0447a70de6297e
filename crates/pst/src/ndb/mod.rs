//! ## [Node Database (NDB) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/e4efaad0-1876-446e-9d34-bb921588f924)

use std::io;
use thiserror::Error;

use crate::ErrorKind;

pub mod block;
pub mod block_id;
pub mod block_ref;
pub mod header;
pub mod node_id;
pub mod node_index;
pub mod page;

pub use block::*;
pub use block_id::*;
pub use block_ref::*;
pub use header::*;
pub use node_id::*;
pub use node_index::*;
pub use page::*;

#[derive(Error, Debug)]
pub enum NdbError {
    #[error("Invalid nidType: 0x{0:02X}")]
    InvalidNodeIdType(u8),
    #[error("Invalid nidIndex: 0x{0:08X}")]
    InvalidNodeIndex(u32),
    #[error("Invalid bidIndex: 0x{0:016X}")]
    InvalidBlockIndex(u64),
    #[error("Invalid HEADER dwMagic: 0x{0:08X}")]
    InvalidNdbHeaderMagicValue(u32),
    #[error("Invalid HEADER wMagicClient: 0x{0:04X}")]
    InvalidNdbHeaderMagicClientValue(u16),
    #[error("Invalid HEADER wVer: 0x{0:04X}")]
    InvalidNdbVersion(u16),
    #[error("ANSI PST version: 0x{0:04X}")]
    AnsiPstVersion(u16),
    #[error("Invalid HEADER bCryptMethod: 0x{0:02X}")]
    InvalidNdbCryptMethod(u8),
    #[error("Unsupported HEADER bCryptMethod: NDB_CRYPT_CYCLIC")]
    CyclicCryptMethod,
    #[error("Invalid HEADER bSentinel: 0x{0:02X}")]
    InvalidNdbHeaderSentinelValue(u8),
    #[error("Mismatch between PAGETRAILER ptype and ptypeRepeat: (0x{0:02X}, 0x{1:02X})")]
    MismatchPageTypeRepeat(u8, u8),
    #[error("Invalid PAGETRAILER ptype: 0x{0:02X}")]
    InvalidPageType(u8),
    #[error("Invalid PAGETRAILER ptype: {0:?}")]
    UnexpectedPageType(PageType),
    #[error("Invalid BTPAGE cLevel: 0x{0:02X}")]
    InvalidBTreePageLevel(u8),
    #[error("Invalid BTPAGE cEnt: {0}")]
    InvalidBTreeEntryCount(usize),
    #[error("Invalid BTPAGE cEntMax: {0}")]
    InvalidBTreeEntryMaxCount(u8),
    #[error("Invalid BTPAGE cbEnt: {0}")]
    InvalidBTreeEntrySize(u8),
    #[error("BTPAGE nesting exceeds {0} levels")]
    BTreeDepthExceeded(u8),
    #[error("Invalid NBTENTRY nid: 0x{0:016X}")]
    InvalidNodeBTreeEntryNodeId(u64),
    #[error("Block not found in BBT: 0x{0:016X}")]
    BlockNotFound(u64),
    #[error("Node not found in NBT: {0:?}")]
    NodeNotFound(NodeId),
    #[error("Sub-node {1:?} not found in {0:?}")]
    SubNodeNotFound(NodeId, NodeId),
    #[error("Invalid BBTENTRY cb: 0x{0:04X}")]
    InvalidBlockSize(u16),
    #[error("Mismatch between BLOCKTRAILER cb and BBTENTRY cb: (0x{found:04X}, 0x{expected:04X})")]
    MismatchBlockTrailerSize { expected: u16, found: u16 },
    #[error("Mismatch between BLOCKTRAILER bid and requested bid: (0x{found:016X}, 0x{expected:016X})")]
    MismatchBlockTrailerId { expected: u64, found: u64 },
    #[error("Invalid XBLOCK btype: 0x{0:02X}")]
    InvalidInternalBlockType(u8),
    #[error("Invalid XBLOCK cLevel: 0x{0:02X}")]
    InvalidInternalBlockLevel(u8),
    #[error("Invalid XBLOCK cEnt: {0}")]
    InvalidInternalBlockEntryCount(u16),
    #[error("Invalid XBLOCK rgbid entry: 0x{0:016X}")]
    InvalidInternalBlockEntry(u64),
    #[error("Mismatch between XBLOCK lcbTotal and data size: (0x{found:08X}, 0x{expected:08X})")]
    MismatchInternalBlockTotalSize { expected: u32, found: u32 },
    #[error("Invalid SLBLOCK btype: 0x{0:02X}")]
    InvalidSubNodeBlockType(u8),
    #[error("Invalid SLBLOCK cLevel: 0x{0:02X}")]
    InvalidSubNodeBlockLevel(u8),
    #[error("Invalid SLBLOCK cEnt: {0}")]
    InvalidSubNodeBlockEntryCount(u16),
    #[error("Invalid SLENTRY nid: 0x{0:016X}")]
    InvalidSubNodeEntryNodeId(u64),
    #[error("Sub-node tree nested deeper than SIBLOCK -> SLBLOCK at 0x{0:016X}")]
    NestedSubNodeIndirection(u64),
    #[error("Nested sub-node trees exceed {0} levels")]
    SubNodeTreeDepthExceeded(u8),
    #[error("Failed to lock PST file")]
    FailedToLockFile,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NdbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NdbError::AnsiPstVersion(_) | NdbError::NestedSubNodeIndirection(_) => {
                ErrorKind::UnsupportedStructure
            }
            NdbError::BlockNotFound(_)
            | NdbError::NodeNotFound(_)
            | NdbError::SubNodeNotFound(..) => ErrorKind::DanglingReference,
            NdbError::FailedToLockFile => ErrorKind::Io,
            NdbError::Io(err) if err.kind() != io::ErrorKind::UnexpectedEof => ErrorKind::Io,
            _ => ErrorKind::FormatViolation,
        }
    }
}

impl From<NdbError> for io::Error {
    fn from(err: NdbError) -> io::Error {
        match err {
            NdbError::Io(err) => err,
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

pub type NdbResult<T> = Result<T, NdbError>;
