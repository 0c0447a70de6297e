//! ## [Lists, Tables, and Properties (LTP) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/4c24c7d2-5c5a-4b99-88b2-f4b84cc293ae)

use std::io;
use thiserror::Error;

use crate::ErrorKind;

pub mod heap;
pub mod prop_context;
pub mod prop_type;
pub mod tags;
pub mod tree;
pub mod value;

pub use heap::*;
pub use prop_context::*;
pub use prop_type::*;
pub use tree::*;
pub use value::*;

#[derive(Error, Debug)]
pub enum LtpError {
    #[error("Node Database error: {0}")]
    NodeDatabaseError(#[from] crate::ndb::NdbError),
    #[error("Invalid HNHDR bSig: 0x{0:02X}")]
    InvalidHeapNodeSignature(u8),
    #[error("Invalid HNHDR bClientSig: 0x{0:02X}")]
    InvalidHeapClientSignature(u8),
    #[error("Unexpected HNHDR bClientSig: {0:?}")]
    UnexpectedHeapClientSignature(HeapNodeType),
    #[error("Invalid HNHDR ibHnpm: 0x{0:04X}")]
    InvalidHeapPageMapOffset(u16),
    #[error("Invalid HNPAGEMAP rgibAlloc entry: 0x{0:04X}")]
    InvalidHeapPageAllocOffset(u16),
    #[error("HID 0x{0:08X} spans more than one heap block")]
    MultiBlockHeap(u32),
    #[error("HID 0x{hid:08X} (block {block}) index {index} is outside of {count} allocations")]
    HeapIndexOutOfRange {
        hid: u32,
        block: u16,
        index: u32,
        count: usize,
    },
    #[error("Invalid BTHHEADER bType: 0x{0:02X}")]
    InvalidHeapTreeNodeType(u8),
    #[error("Invalid BTHHEADER cbKey: {0}")]
    InvalidHeapTreeKeySize(u8),
    #[error("Invalid BTHHEADER cbEnt: {0}")]
    InvalidHeapTreeDataSize(u8),
    #[error("BTHHEADER with bIdxLevels {0} is not supported")]
    MultiLevelHeapTree(u8),
    #[error("BTH record allocation size {size} is not a multiple of {record_size}")]
    InvalidHeapTreeRecordsSize { size: usize, record_size: usize },
    #[error("Invalid PC BTH record size: cbKey {key_size}, cbEnt {entry_size}")]
    InvalidPropertyTreeRecordSize { key_size: u8, entry_size: u8 },
    #[error("Property 0x{0:04X} not found")]
    PropertyNotFound(u16),
    #[error("Decoding property type {0:?} is not supported")]
    UnsupportedPropertyType(PropertyType),
    #[error("Invalid {prop_type:?} value size: {size}")]
    InvalidPropertyValueSize { prop_type: PropertyType, size: usize },
    #[error("Invalid PtypBoolean value: 0x{0:08X}")]
    InvalidBoolean(u32),
    #[error("PtypTime value out of range: {0}")]
    InvalidTime(i64),
    #[error("Invalid multi-valued property offset: 0x{0:08X}")]
    InvalidMultiValueOffset(u32),
}

impl LtpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LtpError::NodeDatabaseError(err) => err.kind(),
            LtpError::MultiBlockHeap(_) | LtpError::MultiLevelHeapTree(_) => {
                ErrorKind::UnsupportedStructure
            }
            LtpError::HeapIndexOutOfRange { .. } => ErrorKind::OutOfRange,
            LtpError::PropertyNotFound(_) => ErrorKind::DanglingReference,
            LtpError::UnsupportedPropertyType(_) => ErrorKind::UnsupportedType,
            _ => ErrorKind::FormatViolation,
        }
    }
}

impl From<io::Error> for LtpError {
    fn from(err: io::Error) -> Self {
        LtpError::NodeDatabaseError(err.into())
    }
}

impl From<LtpError> for io::Error {
    fn from(err: LtpError) -> io::Error {
        match err {
            LtpError::NodeDatabaseError(err) => err.into(),
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

pub type LtpResult<T> = Result<T, LtpError>;
