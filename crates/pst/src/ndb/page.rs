//! [Pages](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5774b4f2-cdc4-453e-996a-8c8230116930)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use tracing::trace;

use super::*;

pub const PAGE_SIZE: usize = 512;

/// `ptype`
///
/// ### See also
/// [PageTrailer]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PageType {
    /// `ptypeBBT`: Block BTree page
    BlockBTree = 0x80,
    /// `ptypeNBT`: Node BTree page
    NodeBTree = 0x81,
    /// `ptypeFMap`: Free Map page
    FreeMap = 0x82,
    /// `ptypePMap`: Allocation Page Map page
    AllocationPageMap = 0x83,
    /// `ptypeAMap`: Allocation Map page
    AllocationMap = 0x84,
    /// `ptypeFPMap`: Free Page Map page
    FreePageMap = 0x85,
    /// `ptypeDL`: Density List page
    DensityList = 0x86,
}

impl TryFrom<u8> for PageType {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(PageType::BlockBTree),
            0x81 => Ok(PageType::NodeBTree),
            0x82 => Ok(PageType::FreeMap),
            0x83 => Ok(PageType::AllocationPageMap),
            0x84 => Ok(PageType::AllocationMap),
            0x85 => Ok(PageType::FreePageMap),
            0x86 => Ok(PageType::DensityList),
            _ => Err(NdbError::InvalidPageType(value)),
        }
    }
}

/// [PAGETRAILER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/f4ccb38a-930a-4db4-98df-a69c195926ba)
#[derive(Clone, Copy, Debug)]
pub struct PageTrailer {
    page_type: PageType,
    signature: u16,
    crc: u32,
    block_id: BlockId,
}

impl PageTrailer {
    pub const SIZE: usize = 16;

    pub fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let mut page_type = [0_u8; 2];
        f.read_exact(&mut page_type)?;
        if page_type[0] != page_type[1] {
            return Err(NdbError::MismatchPageTypeRepeat(page_type[0], page_type[1]));
        }
        let page_type = PageType::try_from(page_type[0])?;
        let signature = f.read_u16::<LittleEndian>()?;
        let crc = f.read_u32::<LittleEndian>()?;
        let block_id = BlockId::read(f)?;

        Ok(Self {
            page_type,
            signature,
            crc,
            block_id,
        })
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
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

/// Leaf record of one of the two root B-trees.
pub trait BTreeEntry: Sized + Copy {
    const ENTRY_SIZE: u8;
    const PAGE_TYPE: PageType;

    fn read(f: &mut dyn Read) -> NdbResult<Self>;
    fn write(&self, f: &mut dyn Write) -> io::Result<()>;
}

/// [BTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/bc8052a3-f300-4022-be31-f0f408fffca0)
#[derive(Clone, Copy, Debug)]
pub struct IntermediateEntry {
    key: u64,
    block: BlockRef,
}

impl IntermediateEntry {
    pub const ENTRY_SIZE: u8 = 24;

    pub fn read(f: &mut dyn Read) -> NdbResult<Self> {
        // btkey
        let key = f.read_u64::<LittleEndian>()?;
        // BREF
        let block = BlockRef::read(f)?;
        Ok(Self { key, block })
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn block(&self) -> BlockRef {
        self.block
    }
}

/// [BBTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/53a4b926-8ac4-45c9-9c6d-8358d951dbcd)
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct BlockBTreeEntry {
    block: BlockRef,
    size: u16,
    ref_count: u16,
}

impl BlockBTreeEntry {
    pub fn new(block: BlockRef, size: u16, ref_count: u16) -> Self {
        Self {
            block,
            size,
            ref_count,
        }
    }

    pub fn block(&self) -> BlockRef {
        self.block
    }

    /// `cb`: size of the raw data, excluding the trailer and padding.
    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn ref_count(&self) -> u16 {
        self.ref_count
    }

    pub fn is_internal(&self) -> bool {
        self.block.block().is_internal()
    }
}

impl BTreeEntry for BlockBTreeEntry {
    const ENTRY_SIZE: u8 = 24;
    const PAGE_TYPE: PageType = PageType::BlockBTree;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        // BREF
        let block = BlockRef::read(f)?;
        // cb
        let size = f.read_u16::<LittleEndian>()?;
        // cRef
        let ref_count = f.read_u16::<LittleEndian>()?;
        // dwPadding
        f.read_u32::<LittleEndian>()?;

        Ok(Self {
            block,
            size,
            ref_count,
        })
    }

    fn write(&self, f: &mut dyn Write) -> io::Result<()> {
        self.block.write(f)?;
        f.write_u16::<LittleEndian>(self.size)?;
        f.write_u16::<LittleEndian>(self.ref_count)?;
        f.write_u32::<LittleEndian>(0)
    }
}

/// [NBTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/53a4b926-8ac4-45c9-9c6d-8358d951dbcd)
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct NodeBTreeEntry {
    node: NodeId,
    data: BlockId,
    sub_node: Option<BlockId>,
    parent: Option<NodeId>,
}

impl NodeBTreeEntry {
    pub fn new(
        node: NodeId,
        data: BlockId,
        sub_node: Option<BlockId>,
        parent: Option<NodeId>,
    ) -> Self {
        Self {
            node,
            data,
            sub_node,
            parent,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn data(&self) -> BlockId {
        self.data
    }

    pub fn sub_node(&self) -> Option<BlockId> {
        self.sub_node
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

impl BTreeEntry for NodeBTreeEntry {
    const ENTRY_SIZE: u8 = 32;
    const PAGE_TYPE: PageType = PageType::NodeBTree;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        // nid
        let node = f.read_u64::<LittleEndian>()?;
        let Ok(node) = u32::try_from(node) else {
            return Err(NdbError::InvalidNodeBTreeEntryNodeId(node));
        };
        let node = NodeId::from(node);

        // bidData
        let data = BlockId::read(f)?;

        // bidSub
        let sub_node = BlockId::read(f)?;
        let sub_node = if sub_node.is_null() {
            None
        } else {
            Some(sub_node)
        };

        // nidParent
        let parent = NodeId::read(f)?;
        let parent = if u32::from(parent) == 0 {
            None
        } else {
            Some(parent)
        };

        // dwPadding
        f.read_u32::<LittleEndian>()?;

        Ok(Self {
            node,
            data,
            sub_node,
            parent,
        })
    }

    fn write(&self, f: &mut dyn Write) -> io::Result<()> {
        // nid
        f.write_u64::<LittleEndian>(u64::from(u32::from(self.node)))?;
        // bidData
        self.data.write(f)?;
        // bidSub
        self.sub_node.unwrap_or_default().write(f)?;
        // nidParent
        self.parent.unwrap_or_default().write(f)?;
        // dwPadding
        f.write_u32::<LittleEndian>(0)
    }
}

const BTREE_ENTRIES_SIZE: usize = 488;

/// Deepest `cLevel` a [BTPAGE](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/4f0cd8e7-c2d0-4975-90a4-d417cfca77f8) may declare.
pub const MAX_BTREE_DEPTH: u8 = 8;

/// [BTPAGE](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/4f0cd8e7-c2d0-4975-90a4-d417cfca77f8)
#[derive(Debug)]
pub enum BTreePage<Entry: BTreeEntry> {
    Intermediate {
        level: u8,
        entries: Vec<IntermediateEntry>,
    },
    Leaf(Vec<Entry>),
}

impl<Entry: BTreeEntry> BTreePage<Entry> {
    pub fn read<R: Read + Seek>(f: &mut R, page: BlockRef) -> NdbResult<Self> {
        f.seek(SeekFrom::Start(page.index()))?;

        let mut buffer = [0_u8; PAGE_SIZE];
        f.read_exact(&mut buffer)?;
        Self::parse(&buffer)
    }

    pub fn parse(buffer: &[u8; PAGE_SIZE]) -> NdbResult<Self> {
        let mut cursor = Cursor::new(&buffer[..]);
        cursor.seek(SeekFrom::Start(BTREE_ENTRIES_SIZE as u64))?;

        // cEnt
        let entry_count = usize::from(cursor.read_u8()?);

        // cEntMax
        let max_entries = cursor.read_u8()?;

        // cbEnt
        let entry_size = cursor.read_u8()?;

        // cLevel
        let level = cursor.read_u8()?;
        if level > MAX_BTREE_DEPTH {
            return Err(NdbError::InvalidBTreePageLevel(level));
        }

        // dwPadding
        cursor.read_u32::<LittleEndian>()?;

        // pageTrailer
        let trailer = PageTrailer::read(&mut cursor)?;
        if trailer.page_type() != Entry::PAGE_TYPE {
            return Err(NdbError::UnexpectedPageType(trailer.page_type()));
        }

        let expected_size = if level == 0 {
            Entry::ENTRY_SIZE
        } else {
            IntermediateEntry::ENTRY_SIZE
        };
        if entry_size < expected_size {
            return Err(NdbError::InvalidBTreeEntrySize(entry_size));
        }

        let max_count = BTREE_ENTRIES_SIZE / usize::from(entry_size);
        if usize::from(max_entries) != max_count {
            return Err(NdbError::InvalidBTreeEntryMaxCount(max_entries));
        }
        if entry_count > max_count {
            return Err(NdbError::InvalidBTreeEntryCount(entry_count));
        }

        // rgentries
        let entries = buffer[..BTREE_ENTRIES_SIZE]
            .chunks_exact(usize::from(entry_size))
            .take(entry_count);
        if level == 0 {
            let entries = entries
                .map(|mut entry| Entry::read(&mut entry))
                .collect::<NdbResult<Vec<_>>>()?;
            Ok(Self::Leaf(entries))
        } else {
            let entries = entries
                .map(|mut entry| IntermediateEntry::read(&mut entry))
                .collect::<NdbResult<Vec<_>>>()?;
            Ok(Self::Intermediate { level, entries })
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }
}

/// Walk a B-tree from its root page and return every leaf entry in key order.
///
/// Descent uses an explicit stack. Each child page must sit exactly one level below its parent,
/// and the root may not declare more than `max_depth` levels, so a corrupt file cannot send the
/// walk into a cycle.
pub fn read_btree<R, Entry>(f: &mut R, root: BlockRef, max_depth: u8) -> NdbResult<Vec<Entry>>
where
    R: Read + Seek,
    Entry: BTreeEntry,
{
    let mut leaves = Vec::new();
    let mut pending = vec![(root, None)];

    while let Some((page, expected_level)) = pending.pop() {
        trace!(?page, ?expected_level, "read BTPAGE");

        match BTreePage::<Entry>::read(f, page)? {
            BTreePage::Intermediate { level, entries } => {
                let valid = match expected_level {
                    Some(expected) => level == expected,
                    None => level <= max_depth,
                };
                if !valid {
                    return Err(match expected_level {
                        Some(_) => NdbError::InvalidBTreePageLevel(level),
                        None => NdbError::BTreeDepthExceeded(max_depth),
                    });
                }

                pending.extend(
                    entries
                        .iter()
                        .rev()
                        .map(|entry| (entry.block(), Some(level - 1))),
                );
            }
            BTreePage::Leaf(entries) => {
                if let Some(expected) = expected_level.filter(|level| *level != 0) {
                    return Err(NdbError::InvalidBTreePageLevel(expected));
                }
                leaves.extend(entries);
            }
        }
    }

    Ok(leaves)
}
