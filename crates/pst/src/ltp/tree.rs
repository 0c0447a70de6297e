//! ## [BTree-on-Heap (BTH)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/2dd1a95a-c8b1-4ac5-87d1-10cb8de64053)

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::*;

/// [BTHHEADER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8e4ae05c-3c24-4103-b7e5-ffef6f244834)
#[derive(Clone, Copy, Debug)]
pub struct HeapTreeHeader {
    key_size: u8,
    entry_size: u8,
    levels: u8,
    root: HeapId,
}

impl HeapTreeHeader {
    pub fn read(data: &[u8]) -> LtpResult<Self> {
        let mut cursor = Cursor::new(data);

        // bType
        let heap_type = cursor.read_u8()?;
        if heap_type != HeapNodeType::Tree as u8 {
            return Err(LtpError::InvalidHeapTreeNodeType(heap_type));
        }

        // cbKey
        let key_size = cursor.read_u8()?;
        if !matches!(key_size, 2 | 4 | 8 | 16) {
            return Err(LtpError::InvalidHeapTreeKeySize(key_size));
        }

        // cbEnt
        let entry_size = cursor.read_u8()?;
        if !(1..=32).contains(&entry_size) {
            return Err(LtpError::InvalidHeapTreeDataSize(entry_size));
        }

        // bIdxLevels
        let levels = cursor.read_u8()?;

        // hidRoot
        let root = HeapId::from(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            key_size,
            entry_size,
            levels,
            root,
        })
    }

    pub fn key_size(&self) -> u8 {
        self.key_size
    }

    pub fn entry_size(&self) -> u8 {
        self.entry_size
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    /// Zero when the tree is empty.
    pub fn root(&self) -> HeapId {
        self.root
    }
}

/// [Leaf BTH (Data) Records](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/660db569-c8f7-4516-82ad-44709b1c667f)
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapTreeRecord<'a> {
    key: &'a [u8],
    data: &'a [u8],
}

impl<'a> HeapTreeRecord<'a> {
    pub fn key(&self) -> &'a [u8] {
        self.key
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// A BTH rooted at one allocation of a [HeapNode].
pub struct HeapTree<'a> {
    heap: &'a HeapNode,
    header: HeapTreeHeader,
}

impl<'a> HeapTree<'a> {
    pub fn new(heap: &'a HeapNode, header: HeapId) -> LtpResult<Self> {
        let header = HeapTreeHeader::read(heap.get(header)?)?;
        Ok(Self { heap, header })
    }

    pub fn header(&self) -> &HeapTreeHeader {
        &self.header
    }

    /// All leaf records, in the order they are stored. Only a tree whose records fit in the root
    /// allocation (`bIdxLevels == 0`) can be read.
    pub fn records(&self) -> LtpResult<Vec<HeapTreeRecord<'a>>> {
        if self.header.levels() > 0 {
            return Err(LtpError::MultiLevelHeapTree(self.header.levels()));
        }
        if self.header.root().is_null() {
            return Ok(Vec::new());
        }

        let key_size = usize::from(self.header.key_size());
        let record_size = key_size + usize::from(self.header.entry_size());
        let data = self.heap.get(self.header.root())?;
        if data.len() % record_size != 0 {
            return Err(LtpError::InvalidHeapTreeRecordsSize {
                size: data.len(),
                record_size,
            });
        }

        Ok(data
            .chunks_exact(record_size)
            .map(|record| {
                let (key, data) = record.split_at(key_size);
                HeapTreeRecord { key, data }
            })
            .collect())
    }
}
