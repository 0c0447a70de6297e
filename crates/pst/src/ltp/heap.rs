//! ## [HN (Heap-on-Node)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/77ce49a3-3772-4d8d-bb2c-2f7520a238a6)

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::Debug,
    io::{Cursor, Seek, SeekFrom},
};

use super::*;

const HEAP_SIGNATURE: u8 = 0xEC;

/// [HID](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/85b9e985-ea53-447f-b70c-eb82bfbdcbc9)
///
/// The low 5 bits are the `hidType` and must be zero. Everything above them is read as the
/// 1-based allocation index, so a non-zero `hidBlockIndex` shows up as an index past the end of
/// the first block's allocations.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapId(u32);

impl HeapId {
    pub fn new(index: u32) -> Self {
        Self(index << 5)
    }

    /// 1-based index into the allocation table.
    pub fn index(&self) -> LtpResult<u32> {
        if self.0 & 0x1F != 0 {
            return Err(LtpError::MultiBlockHeap(self.0));
        }
        Ok(self.0 >> 5)
    }

    /// `hidBlockIndex`: zero for every heap this crate can read.
    pub fn block_index(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Debug for HeapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeapId(0x{:08X})", self.0)
    }
}

impl From<u32> for HeapId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<HeapId> for u32 {
    fn from(value: HeapId) -> Self {
        value.0
    }
}

/// `bClientSig`
///
/// ### See also
/// [HeapNodeHeader]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HeapNodeType {
    /// `bTypeReserved1`
    Reserved1 = 0x6C,
    /// `bTypeTC`: Table Context (TC/HN)
    Table = 0x7C,
    /// `bTypeReserved2`
    Reserved2 = 0x8C,
    /// `bTypeReserved3`
    Reserved3 = 0x9C,
    /// `bTypeReserved4`
    Reserved4 = 0xA5,
    /// `bTypeReserved5`
    Reserved5 = 0xAC,
    /// `bTypeBTH`: BTree-on-Heap (BTH)
    Tree = 0xB5,
    /// `bTypePC`: Property Context (PC/BTH)
    Properties = 0xBC,
    /// `bTypeReserved6`
    Reserved6 = 0xCC,
}

impl TryFrom<u8> for HeapNodeType {
    type Error = LtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x6C => Ok(Self::Reserved1),
            0x7C => Ok(Self::Table),
            0x8C => Ok(Self::Reserved2),
            0x9C => Ok(Self::Reserved3),
            0xA5 => Ok(Self::Reserved4),
            0xAC => Ok(Self::Reserved5),
            0xB5 => Ok(Self::Tree),
            0xBC => Ok(Self::Properties),
            0xCC => Ok(Self::Reserved6),
            _ => Err(LtpError::InvalidHeapClientSignature(value)),
        }
    }
}

/// [HNHDR](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8e4ae05c-3c24-4103-b7e5-ffef6f244834)
#[derive(Clone, Copy, Debug)]
pub struct HeapNodeHeader {
    page_map_offset: u16,
    client_signature: HeapNodeType,
    user_root: HeapId,
    fill_levels: [u8; 8],
}

impl HeapNodeHeader {
    pub const SIZE: usize = 12;

    pub fn read(cursor: &mut Cursor<&[u8]>) -> LtpResult<Self> {
        // ibHnpm
        let page_map_offset = cursor.read_u16::<LittleEndian>()?;

        // bSig
        let signature = cursor.read_u8()?;
        if signature != HEAP_SIGNATURE {
            return Err(LtpError::InvalidHeapNodeSignature(signature));
        }

        // bClientSig
        let client_signature = HeapNodeType::try_from(cursor.read_u8()?)?;

        // hidUserRoot
        let user_root = HeapId::from(cursor.read_u32::<LittleEndian>()?);

        // rgbFillLevel
        let packed = cursor.read_u32::<LittleEndian>()?;
        let mut fill_levels = [0_u8; 8];
        for (index, level) in fill_levels.iter_mut().enumerate() {
            *level = ((packed >> (index * 4)) & 0x0F) as u8;
        }

        Ok(Self {
            page_map_offset,
            client_signature,
            user_root,
            fill_levels,
        })
    }

    pub fn page_map_offset(&self) -> u16 {
        self.page_map_offset
    }

    pub fn client_signature(&self) -> HeapNodeType {
        self.client_signature
    }

    pub fn user_root(&self) -> HeapId {
        self.user_root
    }

    /// `FILL_LEVEL_*` nibble for each of the first 8 blocks of the heap.
    pub fn fill_levels(&self) -> &[u8; 8] {
        &self.fill_levels
    }
}

/// One entry of `rgibAlloc`, resolved to a slice of the heap block.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct HeapNodePageAlloc {
    offset: u16,
    size: u16,
}

impl HeapNodePageAlloc {
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn size(&self) -> u16 {
        self.size
    }
}

/// [HNPAGEMAP](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/291653c0-b347-4c5b-ba41-85ad780b4ba4)
#[derive(Clone, Default, Debug)]
pub struct HeapNodePageMap {
    allocations: Vec<HeapNodePageAlloc>,
    free_count: u16,
}

impl HeapNodePageMap {
    /// Read `cAlloc + 1` cumulative offsets and turn neighbouring pairs into allocations. Every
    /// allocation has to end inside `block_size`.
    pub fn read(cursor: &mut Cursor<&[u8]>, block_size: usize) -> LtpResult<Self> {
        // cAlloc
        let alloc_count = cursor.read_u16::<LittleEndian>()?;

        // cFree
        let free_count = cursor.read_u16::<LittleEndian>()?;

        // rgibAlloc
        let offsets = (0..=alloc_count)
            .map(|_| cursor.read_u16::<LittleEndian>())
            .collect::<Result<Vec<_>, _>>()?;

        let allocations = offsets
            .windows(2)
            .map(|pair| {
                let (start, end) = (pair[0], pair[1]);
                if end < start {
                    return Err(LtpError::InvalidHeapPageAllocOffset(end));
                }
                if usize::from(end) > block_size {
                    return Err(LtpError::InvalidHeapPageAllocOffset(end));
                }
                Ok(HeapNodePageAlloc {
                    offset: start,
                    size: end - start,
                })
            })
            .collect::<LtpResult<Vec<_>>>()?;

        Ok(Self {
            allocations,
            free_count,
        })
    }

    pub fn allocations(&self) -> &[HeapNodePageAlloc] {
        &self.allocations
    }

    pub fn free_count(&self) -> u16 {
        self.free_count
    }
}

/// A single-block heap, owning the decoded block it was parsed from.
#[derive(Clone, Debug)]
pub struct HeapNode {
    data: Vec<u8>,
    header: HeapNodeHeader,
    page_map: HeapNodePageMap,
}

impl HeapNode {
    pub fn parse(data: Vec<u8>) -> LtpResult<Self> {
        let (header, page_map) = {
            let mut cursor = Cursor::new(data.as_slice());
            let header = HeapNodeHeader::read(&mut cursor)?;

            let page_map_offset = header.page_map_offset();
            if usize::from(page_map_offset) < HeapNodeHeader::SIZE
                || usize::from(page_map_offset) >= data.len()
            {
                return Err(LtpError::InvalidHeapPageMapOffset(page_map_offset));
            }

            cursor.seek(SeekFrom::Start(u64::from(page_map_offset)))?;
            let page_map = HeapNodePageMap::read(&mut cursor, data.len())?;
            (header, page_map)
        };

        Ok(Self {
            data,
            header,
            page_map,
        })
    }

    pub fn header(&self) -> &HeapNodeHeader {
        &self.header
    }

    pub fn allocations(&self) -> &[HeapNodePageAlloc] {
        self.page_map.allocations()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Resolve a [HeapId] to its allocation. Index 0 is the page map itself and never valid.
    pub fn get(&self, hid: HeapId) -> LtpResult<&[u8]> {
        let index = hid.index()?;
        let count = self.allocations().len();
        let alloc = index
            .checked_sub(1)
            .and_then(|index| self.allocations().get(index as usize))
            .ok_or(LtpError::HeapIndexOutOfRange {
                hid: u32::from(hid),
                block: hid.block_index(),
                index,
                count,
            })?;

        let start = usize::from(alloc.offset());
        let end = start + usize::from(alloc.size());
        Ok(&self.data[start..end])
    }
}
