//! [BID (Block ID)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/d3155aa1-ccdd-4dee-a0a9-5363ccca5352)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fmt::Debug,
    io::{self, Read, Write},
};

use super::*;

pub const MAX_BLOCK_INDEX: u64 = 1_u64.rotate_right(2) - 1;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u64);

impl BlockId {
    pub fn new(is_internal: bool, index: u64) -> NdbResult<Self> {
        let is_internal = if is_internal { 0x2 } else { 0x0 };

        let shifted_index = index.rotate_left(2);
        if shifted_index & 0x3 != 0 {
            return Err(NdbError::InvalidBlockIndex(index));
        };

        Ok(Self(shifted_index | is_internal))
    }

    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        let value = f.read_u64::<LittleEndian>()?;
        Ok(Self(value))
    }

    pub fn write(&self, f: &mut dyn Write) -> io::Result<()> {
        f.write_u64::<LittleEndian>(self.0)
    }

    /// Internal blocks hold XBLOCK, XXBLOCK, SLBLOCK or SIBLOCK data and are never encoded.
    pub fn is_internal(&self) -> bool {
        self.0 & 0x2 == 0x2
    }

    pub fn index(&self) -> u64 {
        self.0 >> 2
    }

    /// `bidSub` and `bidData` use zero for "no block".
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_internal() {
            "Internal"
        } else {
            "Data"
        };
        write!(f, "BlockId {{ {kind}: 0x{:X} }}", self.index())
    }
}

impl From<u64> for BlockId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BlockId> for u64 {
    fn from(value: BlockId) -> Self {
        value.0
    }
}
