//! ## [Messaging Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3f1bc553-d15d-4dcf-9b80-fbf1dd6c7e79)

use std::io;
use thiserror::Error;

use crate::{ltp::PropertyType, ErrorKind};

pub mod entry_id;
pub mod named_prop;

pub use entry_id::*;
pub use named_prop::*;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Node Database error: {0}")]
    NodeDatabaseError(#[from] crate::ndb::NdbError),
    #[error("Lists, Tables, and Properties error: {0}")]
    ListsTablesPropertiesError(#[from] crate::ltp::LtpError),
    #[error("Invalid EntryID rgbFlags: 0x{0:08X}")]
    InvalidEntryIdFlags(u32),
    #[error("Invalid EntryID size: {0}")]
    InvalidEntryIdSize(usize),
    #[error("Missing named property map stream 0x{0:04X}")]
    NamedPropertyStreamNotFound(u16),
    #[error("Invalid named property map stream 0x{prop_id:04X} type: {prop_type:?}")]
    InvalidNamedPropertyStreamType {
        prop_id: u16,
        prop_type: Option<PropertyType>,
    },
    #[error("Invalid named property map stream 0x{prop_id:04X} size: {size}")]
    InvalidNamedPropertyStreamSize { prop_id: u16, size: usize },
}

impl MessagingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MessagingError::NodeDatabaseError(err) => err.kind(),
            MessagingError::ListsTablesPropertiesError(err) => err.kind(),
            MessagingError::NamedPropertyStreamNotFound(_) => ErrorKind::DanglingReference,
            _ => ErrorKind::FormatViolation,
        }
    }
}

impl From<MessagingError> for io::Error {
    fn from(err: MessagingError) -> io::Error {
        match err {
            MessagingError::NodeDatabaseError(err) => err.into(),
            MessagingError::ListsTablesPropertiesError(err) => err.into(),
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
