//! [BREF](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/844a5ebf-488a-45fd-8fce-92a84d8e24a3)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use super::block_id::*;

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct BlockRef {
    block: BlockId,
    index: u64,
}

impl BlockRef {
    pub fn new(block: BlockId, index: u64) -> Self {
        Self { block, index }
    }

    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        // bid
        let block = BlockId::read(f)?;
        // ib
        let index = f.read_u64::<LittleEndian>()?;
        Ok(Self { block, index })
    }

    pub fn write(&self, f: &mut dyn Write) -> io::Result<()> {
        self.block.write(f)?;
        f.write_u64::<LittleEndian>(self.index)
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Absolute file offset (`ib`).
    pub fn index(&self) -> u64 {
        self.index
    }
}
