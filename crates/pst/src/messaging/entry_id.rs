//! `EntryID` references to folders and messages in the same store.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use super::*;
use crate::ndb::NodeId;

/// A folder or message reference stored in properties such as `PidTagIpmSubTreeEntryId`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EntryId {
    record_key: [u8; 16],
    node: NodeId,
}

impl EntryId {
    pub const SIZE: usize = 24;

    pub fn new(record_key: [u8; 16], node: NodeId) -> Self {
        Self { record_key, node }
    }

    pub fn read(data: &[u8]) -> MessagingResult<Self> {
        if data.len() != Self::SIZE {
            return Err(MessagingError::InvalidEntryIdSize(data.len()));
        }

        let mut cursor = Cursor::new(data);

        // rgbFlags
        let flags = cursor
            .read_u32::<LittleEndian>()
            .map_err(crate::ndb::NdbError::from)?;
        if flags != 0 {
            return Err(MessagingError::InvalidEntryIdFlags(flags));
        }

        // uid
        let mut record_key = [0; 16];
        cursor
            .read_exact(&mut record_key)
            .map_err(crate::ndb::NdbError::from)?;

        // nid
        let node = NodeId::read(&mut cursor).map_err(crate::ndb::NdbError::from)?;

        Ok(Self { record_key, node })
    }

    /// `uid`: the `PidTagRecordKey` of the store that owns the entry.
    pub fn record_key(&self) -> &[u8; 16] {
        &self.record_key
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}
