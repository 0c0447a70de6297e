//! [Blocks](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/a9c1981d-d1ea-457c-b39e-dc7fb0eb95d4)

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Seek, SeekFrom},
};
use tracing::{trace, warn};

use super::*;
use crate::{block_sig::compute_sig, encode::permute};

pub const MAX_BLOCK_SIZE: u16 = 8192;

/// Largest `cb` that still fits in one block next to its [BlockTrailer].
pub const MAX_BLOCK_DATA_SIZE: u16 = MAX_BLOCK_SIZE - BlockTrailer::SIZE;

/// Round a block (data and trailer) up to the 64-byte allocation granularity.
pub const fn block_size(size: u16) -> u16 {
    if size >= MAX_BLOCK_SIZE {
        MAX_BLOCK_SIZE
    } else {
        let size = if size < 64 { 64 } else { size };
        let tail = size % 64;
        if tail == 0 {
            size
        } else {
            size - tail + 64
        }
    }
}

/// [BLOCKTRAILER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/a14943ef-70c2-403f-898c-5bc3747117e1)
#[derive(Clone, Copy, Debug)]
pub struct BlockTrailer {
    size: u16,
    signature: u16,
    crc: u32,
    block_id: BlockId,
}

impl BlockTrailer {
    pub const SIZE: u16 = 16;

    pub fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let size = f.read_u16::<LittleEndian>()?;
        let signature = f.read_u16::<LittleEndian>()?;
        let crc = f.read_u32::<LittleEndian>()?;
        let block_id = BlockId::read(f)?;

        Ok(Self {
            size,
            signature,
            crc,
            block_id,
        })
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn signature(&self) -> u16 {
        self.signature
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }
}

/// Every live block, keyed by [BlockId], built from the leaves of the BBT.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct BlockIndex {
    entries: BTreeMap<BlockId, BlockBTreeEntry>,
}

impl BlockIndex {
    pub fn new(entries: impl IntoIterator<Item = BlockBTreeEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.block().block(), entry))
                .collect(),
        }
    }

    pub fn get(&self, block: BlockId) -> NdbResult<&BlockBTreeEntry> {
        self.entries
            .get(&block)
            .ok_or(NdbError::BlockNotFound(u64::from(block)))
    }

    pub fn entries(&self) -> impl Iterator<Item = &BlockBTreeEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `XBLOCK` or `XXBLOCK`
#[derive(Clone, Debug)]
pub struct DataTreeBlock {
    level: u8,
    total_size: u32,
    entries: Vec<BlockId>,
}

impl DataTreeBlock {
    const HEADER_SIZE: usize = 8;

    pub fn parse(data: &[u8]) -> NdbResult<Self> {
        let mut cursor = Cursor::new(data);

        // btype
        let block_type = cursor.read_u8()?;
        if block_type != 0x01 {
            return Err(NdbError::InvalidInternalBlockType(block_type));
        }

        // cLevel
        let level = cursor.read_u8()?;
        if !(1..=2).contains(&level) {
            return Err(NdbError::InvalidInternalBlockLevel(level));
        }

        // cEnt
        let entry_count = cursor.read_u16::<LittleEndian>()?;
        if Self::HEADER_SIZE + usize::from(entry_count) * 8 > data.len() {
            return Err(NdbError::InvalidInternalBlockEntryCount(entry_count));
        }

        // lcbTotal
        let total_size = cursor.read_u32::<LittleEndian>()?;

        // rgbid
        let entries = (0..entry_count)
            .map(|_| BlockId::read(&mut cursor))
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            level,
            total_size,
            entries,
        })
    }

    /// 1 for an XBLOCK, 2 for an XXBLOCK.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// `lcbTotal`: size of the reassembled stream.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn entries(&self) -> &[BlockId] {
        &self.entries
    }
}

/// Reads blocks through a borrowed file handle and the [BlockIndex].
pub struct BlockStore<'a, R: Read + Seek> {
    file: &'a mut R,
    index: &'a BlockIndex,
    crypt_method: NdbCryptMethod,
}

impl<'a, R: Read + Seek> BlockStore<'a, R> {
    pub fn new(file: &'a mut R, index: &'a BlockIndex, crypt_method: NdbCryptMethod) -> Self {
        Self {
            file,
            index,
            crypt_method,
        }
    }

    /// Read a single physical block. The trailer must agree with the BBT entry and the
    /// requested [BlockId]. Data blocks are decoded, internal blocks are returned as stored.
    pub fn read_raw(&mut self, block: BlockId) -> NdbResult<Vec<u8>> {
        let entry = self.index.get(block)?;
        let size = entry.size();
        if size > MAX_BLOCK_DATA_SIZE {
            return Err(NdbError::InvalidBlockSize(size));
        }

        let offset = entry.block().index();
        let padded_size = block_size(size + BlockTrailer::SIZE);
        trace!(?block, offset, size, padded_size, "read block");

        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0; usize::from(padded_size)];
        self.file.read_exact(&mut data)?;

        let trailer_offset = usize::from(padded_size - BlockTrailer::SIZE);
        let trailer = BlockTrailer::read(&mut &data[trailer_offset..])?;
        if trailer.size() != size {
            return Err(NdbError::MismatchBlockTrailerSize {
                expected: size,
                found: trailer.size(),
            });
        }
        if trailer.block_id() != block {
            return Err(NdbError::MismatchBlockTrailerId {
                expected: u64::from(block),
                found: u64::from(trailer.block_id()),
            });
        }

        let signature = compute_sig(offset, u64::from(block));
        if trailer.signature() != signature {
            warn!(
                ?block,
                expected = signature,
                found = trailer.signature(),
                "BLOCKTRAILER wSig mismatch"
            );
        }

        data.truncate(usize::from(size));
        if !block.is_internal() && self.crypt_method == NdbCryptMethod::Permute {
            permute::decode_block(&mut data);
        }

        Ok(data)
    }

    /// Read the logical stream behind a [BlockId], reassembling XBLOCK and XXBLOCK data trees.
    pub fn read_block(&mut self, block: BlockId) -> NdbResult<Vec<u8>> {
        if !block.is_internal() {
            return self.read_raw(block);
        }

        let root = DataTreeBlock::parse(&self.read_raw(block)?)?;
        let data_blocks = match root.level() {
            1 => root.entries().to_vec(),
            _ => {
                let mut data_blocks = Vec::new();
                for child in root.entries() {
                    if !child.is_internal() {
                        return Err(NdbError::InvalidInternalBlockEntry(u64::from(*child)));
                    }
                    let child = DataTreeBlock::parse(&self.read_raw(*child)?)?;
                    if child.level() != 1 {
                        return Err(NdbError::InvalidInternalBlockLevel(child.level()));
                    }
                    data_blocks.extend_from_slice(child.entries());
                }
                data_blocks
            }
        };

        let mut data = Vec::new();
        for block in data_blocks {
            if block.is_internal() {
                return Err(NdbError::InvalidInternalBlockEntry(u64::from(block)));
            }
            data.extend(self.read_raw(block)?);
        }

        if data.len() != root.total_size() as usize {
            return Err(NdbError::MismatchInternalBlockTotalSize {
                expected: root.total_size(),
                found: data.len() as u32,
            });
        }

        Ok(data)
    }
}
