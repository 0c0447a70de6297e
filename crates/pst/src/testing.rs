//! Writers for small synthetic PST files and their pieces, used by the unit tests.

use byteorder::{LittleEndian, WriteBytesExt};
use std::{
    collections::BTreeMap,
    io::{Cursor, Write},
};
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

use crate::{
    block_sig::compute_sig,
    encode::permute,
    ltp::{Guid, HeapId, HeapNodeType, PropertyType},
    messaging::{NAMEID_STREAM_ENTRY, NAMEID_STREAM_GUID, NAMEID_STREAM_STRING},
    ndb::*,
};

/// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Unicode `HEADER` bytes.
#[derive(Clone, Copy)]
pub struct HeaderBuilder {
    node_btree: BlockRef,
    block_btree: BlockRef,
    crypt_method: u8,
    version: u16,
    file_eof: u64,
}

impl Default for HeaderBuilder {
    fn default() -> Self {
        Self::new(BlockRef::default(), BlockRef::default())
    }
}

impl HeaderBuilder {
    pub fn new(node_btree: BlockRef, block_btree: BlockRef) -> Self {
        Self {
            node_btree,
            block_btree,
            crypt_method: 0,
            version: 23,
            file_eof: 0,
        }
    }

    pub fn crypt_method(mut self, crypt_method: u8) -> Self {
        self.crypt_method = crypt_method;
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn file_eof(mut self, file_eof: u64) -> Self {
        self.file_eof = file_eof;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut f = Vec::with_capacity(HEADER_SIZE);

        // dwMagic, dwCRCPartial, wMagicClient, wVer, wVerClient
        f.write_u32::<LittleEndian>(HEADER_MAGIC).unwrap();
        f.write_u32::<LittleEndian>(0).unwrap();
        f.write_u16::<LittleEndian>(HEADER_MAGIC_CLIENT).unwrap();
        f.write_u16::<LittleEndian>(self.version).unwrap();
        f.write_u16::<LittleEndian>(19).unwrap();

        // bPlatformCreate, bPlatformAccess, dwReserved1, dwReserved2, bidUnused
        f.extend_from_slice(&[0x01, 0x01]);
        f.extend_from_slice(&[0; 16]);

        // bidNextP, dwUnique, rgnid, qwUnused
        f.write_u64::<LittleEndian>(0x400).unwrap();
        f.write_u32::<LittleEndian>(1).unwrap();
        f.extend_from_slice(&[0; 128]);
        f.write_u64::<LittleEndian>(0).unwrap();

        // root
        f.write_u32::<LittleEndian>(0).unwrap();
        f.write_u64::<LittleEndian>(self.file_eof).unwrap();
        f.extend_from_slice(&[0; 24]);
        self.node_btree.write(&mut f).unwrap();
        self.block_btree.write(&mut f).unwrap();
        f.extend_from_slice(&[0x02, 0, 0, 0]);

        // dwAlign, rgbFM, rgbFP
        f.write_u32::<LittleEndian>(0).unwrap();
        f.extend_from_slice(&[0xFF; 256]);

        // bSentinel, bCryptMethod, rgbReserved, bidNextB, dwCRCFull
        f.extend_from_slice(&[0x80, self.crypt_method, 0, 0]);
        f.write_u64::<LittleEndian>(0x4).unwrap();
        f.write_u32::<LittleEndian>(0).unwrap();

        // rgbReserved2, bReserved, rgbReserved3
        f.extend_from_slice(&[0; 36]);

        assert_eq!(f.len(), HEADER_SIZE);
        f
    }
}

const BTREE_ENTRIES_SIZE: usize = PAGE_SIZE - PageTrailer::SIZE - 8;

/// One `BTPAGE`.
pub struct BTreePageBuilder {
    page_type: PageType,
    level: u8,
    entry_size: u8,
    count: u8,
    entries: Vec<u8>,
    block: BlockId,
}

impl BTreePageBuilder {
    pub fn leaf<E: BTreeEntry>(entries: &[E]) -> Self {
        let mut data = Vec::new();
        for entry in entries {
            entry.write(&mut data).unwrap();
        }
        Self {
            page_type: E::PAGE_TYPE,
            level: 0,
            entry_size: E::ENTRY_SIZE,
            count: entries.len() as u8,
            entries: data,
            block: BlockId::default(),
        }
    }

    pub fn intermediate<E: BTreeEntry>(level: u8, entries: &[(u64, BlockRef)]) -> Self {
        let mut data = Vec::new();
        for (key, block) in entries {
            data.write_u64::<LittleEndian>(*key).unwrap();
            block.write(&mut data).unwrap();
        }
        Self {
            page_type: E::PAGE_TYPE,
            level,
            entry_size: IntermediateEntry::ENTRY_SIZE,
            count: entries.len() as u8,
            entries: data,
            block: BlockId::default(),
        }
    }

    pub fn block(mut self, block: BlockId) -> Self {
        self.block = block;
        self
    }

    /// Pad every entry out to `entry_size` bytes.
    pub fn entry_size(mut self, entry_size: u8) -> Self {
        self.entries = self
            .entries
            .chunks(usize::from(self.entry_size))
            .flat_map(|entry| {
                let mut entry = entry.to_vec();
                entry.resize(usize::from(entry_size), 0);
                entry
            })
            .collect();
        self.entry_size = entry_size;
        self
    }

    pub fn build(&self) -> [u8; PAGE_SIZE] {
        assert!(self.entries.len() <= BTREE_ENTRIES_SIZE);

        let mut page = [0_u8; PAGE_SIZE];
        page[..self.entries.len()].copy_from_slice(&self.entries);

        let mut f = Cursor::new(&mut page[BTREE_ENTRIES_SIZE..]);
        // cEnt, cEntMax, cbEnt, cLevel, dwPadding
        f.write_all(&[
            self.count,
            (BTREE_ENTRIES_SIZE / usize::from(self.entry_size)) as u8,
            self.entry_size,
            self.level,
        ])
        .unwrap();
        f.write_u32::<LittleEndian>(0).unwrap();

        // pageTrailer
        f.write_all(&[self.page_type as u8, self.page_type as u8]).unwrap();
        f.write_u16::<LittleEndian>(0).unwrap();
        f.write_u32::<LittleEndian>(0).unwrap();
        self.block.write(&mut f).unwrap();

        page
    }
}

/// `data` followed by its padding and `BLOCKTRAILER`, as stored at `offset`.
pub fn block_bytes(block: BlockId, offset: u64, data: &[u8]) -> Vec<u8> {
    let size = data.len() as u16;
    let padded_size = usize::from(block_size(size + BlockTrailer::SIZE));

    let mut f = data.to_vec();
    f.resize(padded_size - usize::from(BlockTrailer::SIZE), 0);
    f.write_u16::<LittleEndian>(size).unwrap();
    f.write_u16::<LittleEndian>(compute_sig(offset, u64::from(block)))
        .unwrap();
    f.write_u32::<LittleEndian>(0).unwrap();
    block.write(&mut f).unwrap();
    f
}

/// An `XBLOCK` (`level` 1) or `XXBLOCK` (`level` 2).
pub fn data_tree_block_bytes(level: u8, total_size: u32, entries: &[BlockId]) -> Vec<u8> {
    let mut f = vec![0x01, level];
    f.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    f.write_u32::<LittleEndian>(total_size).unwrap();
    for entry in entries {
        entry.write(&mut f).unwrap();
    }
    f
}

/// An `SLBLOCK`.
pub fn sub_node_leaf_bytes(entries: &[SubNodeEntry]) -> Vec<u8> {
    let mut f = vec![0x02, 0x00];
    f.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    f.write_u32::<LittleEndian>(0).unwrap();
    for entry in entries {
        f.write_u64::<LittleEndian>(u64::from(u32::from(entry.node())))
            .unwrap();
        entry.data().write(&mut f).unwrap();
        entry.sub_node().unwrap_or_default().write(&mut f).unwrap();
    }
    f
}

/// An `SIBLOCK`.
pub fn sub_node_intermediate_bytes(entries: &[(NodeId, BlockId)]) -> Vec<u8> {
    let mut f = vec![0x02, 0x01];
    f.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    f.write_u32::<LittleEndian>(0).unwrap();
    for (node, block) in entries {
        f.write_u64::<LittleEndian>(u64::from(u32::from(*node)))
            .unwrap();
        block.write(&mut f).unwrap();
    }
    f
}

/// Blocks laid out back to back, with a matching [BlockIndex].
pub struct BlockFile {
    data: Vec<u8>,
    entries: Vec<BlockBTreeEntry>,
}

impl BlockFile {
    pub fn new() -> Self {
        Self {
            data: vec![0; 64],
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, block: BlockId, data: &[u8]) -> &mut Self {
        let offset = self.data.len() as u64;
        self.data.extend(block_bytes(block, offset, data));
        self.entries.push(BlockBTreeEntry::new(
            BlockRef::new(block, offset),
            data.len() as u16,
            1,
        ));
        self
    }

    pub fn finish(self) -> (Cursor<Vec<u8>>, BlockIndex) {
        (Cursor::new(self.data), BlockIndex::new(self.entries))
    }
}

/// A single-block heap with its allocations in order.
pub struct HeapBuilder {
    client_signature: HeapNodeType,
    user_root: HeapId,
    allocations: Vec<Vec<u8>>,
}

impl HeapBuilder {
    pub fn new(client_signature: HeapNodeType) -> Self {
        Self {
            client_signature,
            user_root: HeapId::default(),
            allocations: Vec::new(),
        }
    }

    pub fn allocate(&mut self, data: &[u8]) -> HeapId {
        self.allocations.push(data.to_vec());
        HeapId::new(self.allocations.len() as u32)
    }

    pub fn user_root(&mut self, hid: HeapId) -> &mut Self {
        self.user_root = hid;
        self
    }

    /// `HNHDR`, the allocations, then the `HNPAGEMAP` as the last bytes of the block.
    pub fn build(&self) -> Vec<u8> {
        let mut data = vec![0; 12];
        let mut offsets = vec![data.len() as u16];
        for allocation in &self.allocations {
            data.extend_from_slice(allocation);
            offsets.push(data.len() as u16);
        }
        if data.len() % 2 != 0 {
            data.push(0);
        }

        let page_map_offset = data.len() as u16;
        let mut f = Cursor::new(&mut data[..12]);
        // ibHnpm, bSig, bClientSig, hidUserRoot, rgbFillLevel
        f.write_u16::<LittleEndian>(page_map_offset).unwrap();
        f.write_all(&[0xEC, self.client_signature as u8]).unwrap();
        f.write_u32::<LittleEndian>(u32::from(self.user_root)).unwrap();
        f.write_u32::<LittleEndian>(0).unwrap();

        // cAlloc, cFree, rgibAlloc
        data.write_u16::<LittleEndian>(self.allocations.len() as u16)
            .unwrap();
        data.write_u16::<LittleEndian>(0).unwrap();
        for offset in offsets {
            data.write_u16::<LittleEndian>(offset).unwrap();
        }
        data
    }
}

enum PropertyValue {
    Inline(u32),
    Heap(Vec<u8>),
    Node(NodeId),
}

/// A PC heap: the `BTHHEADER` is the user root and the records sit in one leaf allocation.
#[derive(Default)]
pub struct PropertyContextBuilder {
    records: BTreeMap<u16, (u16, PropertyValue)>,
}

impl PropertyContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inline(&mut self, prop_id: u16, prop_type: PropertyType, value: u32) -> &mut Self {
        self.raw(prop_id, prop_type.into(), value)
    }

    pub fn heap(&mut self, prop_id: u16, prop_type: PropertyType, data: &[u8]) -> &mut Self {
        self.records.insert(
            prop_id,
            (prop_type.into(), PropertyValue::Heap(data.to_vec())),
        );
        self
    }

    /// The value lives in the owning node's sub-node `node`.
    pub fn node(&mut self, prop_id: u16, prop_type: PropertyType, node: NodeId) -> &mut Self {
        self.records
            .insert(prop_id, (prop_type.into(), PropertyValue::Node(node)));
        self
    }

    /// A record with `dwValueHnid` exactly as given.
    pub fn raw(&mut self, prop_id: u16, prop_type: u16, value: u32) -> &mut Self {
        self.records
            .insert(prop_id, (prop_type, PropertyValue::Inline(value)));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut heap = HeapBuilder::new(HeapNodeType::Properties);

        let mut records = Vec::new();
        for (prop_id, (prop_type, value)) in &self.records {
            let value = match value {
                PropertyValue::Inline(value) => *value,
                PropertyValue::Heap(data) => u32::from(heap.allocate(data)),
                PropertyValue::Node(node) => u32::from(*node),
            };
            records.write_u16::<LittleEndian>(*prop_id).unwrap();
            records.write_u16::<LittleEndian>(*prop_type).unwrap();
            records.write_u32::<LittleEndian>(value).unwrap();
        }

        let root = if records.is_empty() {
            HeapId::default()
        } else {
            heap.allocate(&records)
        };

        let mut header = vec![HeapNodeType::Tree as u8, 2, 6, 0];
        header.write_u32::<LittleEndian>(u32::from(root)).unwrap();
        let header = heap.allocate(&header);
        heap.user_root(header);
        heap.build()
    }
}

/// The three binary streams of `NID_NAME_TO_ID_MAP`.
#[derive(Default)]
pub struct NamedPropertyMapBuilder {
    guids: Vec<Guid>,
    entries: Vec<(u32, u16, u16)>,
    strings: Vec<u8>,
}

impl NamedPropertyMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the GUID stream and return the `wGuid` index that refers to it.
    pub fn guid(&mut self, guid: Guid) -> u16 {
        self.guids.push(guid);
        (self.guids.len() + 2) as u16
    }

    pub fn number(&mut self, prop_index: u16, guid: u16, id: u32) -> &mut Self {
        self.raw(id, guid << 1, prop_index)
    }

    pub fn string(&mut self, prop_index: u16, guid: u16, name: &str) -> &mut Self {
        let offset = self.strings.len() as u32;
        let name: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        self.strings
            .write_u32::<LittleEndian>(name.len() as u32)
            .unwrap();
        self.strings.extend_from_slice(&name);
        while self.strings.len() % 4 != 0 {
            self.strings.push(0);
        }
        self.raw(offset, (guid << 1) | 1, prop_index)
    }

    /// An `NAMEID` record with `dwPropertyID`, `N` plus `wGuid`, and `wPropIdx` as given.
    pub fn raw(&mut self, id: u32, guid_bits: u16, prop_index: u16) -> &mut Self {
        self.entries.push((id, guid_bits, prop_index));
        self
    }

    pub fn build(&self) -> PropertyContextBuilder {
        let mut guids = Vec::new();
        for guid in &self.guids {
            guids.write_u32::<LittleEndian>(guid.data1()).unwrap();
            guids.write_u16::<LittleEndian>(guid.data2()).unwrap();
            guids.write_u16::<LittleEndian>(guid.data3()).unwrap();
            guids.extend_from_slice(guid.data4());
        }

        let mut entries = Vec::new();
        for (id, guid_bits, prop_index) in &self.entries {
            entries.write_u32::<LittleEndian>(*id).unwrap();
            entries.write_u16::<LittleEndian>(*guid_bits).unwrap();
            entries.write_u16::<LittleEndian>(*prop_index).unwrap();
        }

        let mut context = PropertyContextBuilder::new();
        context.heap(NAMEID_STREAM_GUID, PropertyType::Binary, &guids);
        context.heap(NAMEID_STREAM_ENTRY, PropertyType::Binary, &entries);
        if !self.strings.is_empty() {
            context.heap(NAMEID_STREAM_STRING, PropertyType::Binary, &self.strings);
        }
        context
    }
}

const FIRST_BLOCK_OFFSET: usize = 2 * PAGE_SIZE;
const MAX_DATA_TREE_ENTRIES: usize = (MAX_BLOCK_DATA_SIZE as usize - 8) / 8;

/// A whole file: header, blocks, then the NBT and BBT pages.
pub struct PstBuilder {
    crypt_method: NdbCryptMethod,
    block_limit: usize,
    next_block: u64,
    blocks: Vec<(BlockId, Vec<u8>)>,
    nodes: Vec<NodeBTreeEntry>,
}

impl Default for PstBuilder {
    fn default() -> Self {
        Self {
            crypt_method: NdbCryptMethod::None,
            block_limit: usize::from(MAX_BLOCK_DATA_SIZE),
            next_block: 1,
            blocks: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

impl PstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn crypt_method(&mut self, crypt_method: NdbCryptMethod) -> &mut Self {
        self.crypt_method = crypt_method;
        self
    }

    /// Largest payload stored in a single data block before [PstBuilder::data] splits it.
    pub fn block_limit(&mut self, block_limit: usize) -> &mut Self {
        self.block_limit = block_limit.clamp(1, usize::from(MAX_BLOCK_DATA_SIZE));
        self
    }

    fn add_block(&mut self, is_internal: bool, data: Vec<u8>) -> BlockId {
        let block = BlockId::new(is_internal, self.next_block).unwrap();
        self.next_block += 1;
        self.blocks.push((block, data));
        block
    }

    /// Store `data` as one data block, or as an XBLOCK or XXBLOCK tree when it is too big.
    pub fn data(&mut self, data: &[u8]) -> BlockId {
        if data.len() <= self.block_limit {
            return self.add_block(false, data.to_vec());
        }

        let leaves: Vec<_> = data
            .chunks(self.block_limit)
            .map(|chunk| (self.add_block(false, chunk.to_vec()), chunk.len()))
            .collect();

        let xblocks: Vec<_> = leaves
            .chunks(MAX_DATA_TREE_ENTRIES)
            .map(|chunk| {
                let total = chunk.iter().map(|(_, size)| size).sum::<usize>();
                let ids: Vec<_> = chunk.iter().map(|(block, _)| *block).collect();
                let xblock = data_tree_block_bytes(1, total as u32, &ids);
                self.add_block(true, xblock)
            })
            .collect();

        match xblocks.as_slice() {
            [xblock] => *xblock,
            _ => {
                let xxblock = data_tree_block_bytes(2, data.len() as u32, &xblocks);
                self.add_block(true, xxblock)
            }
        }
    }

    pub fn sub_nodes(&mut self, entries: &[SubNodeEntry]) -> BlockId {
        self.add_block(true, sub_node_leaf_bytes(entries))
    }

    pub fn node(
        &mut self,
        node: NodeId,
        parent: Option<NodeId>,
        data: BlockId,
        sub_node: Option<BlockId>,
    ) -> &mut Self {
        self.nodes
            .push(NodeBTreeEntry::new(node, data, sub_node, parent));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut file = vec![0; FIRST_BLOCK_OFFSET];

        let mut block_entries = Vec::with_capacity(self.blocks.len());
        for (block, data) in &self.blocks {
            let mut data = data.clone();
            if !block.is_internal() && self.crypt_method == NdbCryptMethod::Permute {
                permute::encode_block(&mut data);
            }

            let offset = file.len() as u64;
            file.extend(block_bytes(*block, offset, &data));
            block_entries.push(BlockBTreeEntry::new(
                BlockRef::new(*block, offset),
                data.len() as u16,
                1,
            ));
        }
        block_entries.sort_by_key(|entry| entry.block().block());

        let mut node_entries = self.nodes.clone();
        node_entries.sort_by_key(NodeBTreeEntry::node);

        file.resize(file.len().next_multiple_of(PAGE_SIZE), 0);
        let mut next_page = self.next_block;
        let node_btree = write_btree(&mut file, &mut next_page, &node_entries, |entry| {
            u64::from(u32::from(entry.node()))
        });
        let block_btree = write_btree(&mut file, &mut next_page, &block_entries, |entry| {
            u64::from(entry.block().block())
        });

        let header = HeaderBuilder::new(node_btree, block_btree)
            .crypt_method(self.crypt_method as u8)
            .file_eof(file.len() as u64)
            .build();
        file[..HEADER_SIZE].copy_from_slice(&header);
        file
    }

    pub fn write_temp(&self) -> NamedTempFile {
        init_tracing();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.build()).unwrap();
        file.flush().unwrap();
        file
    }
}

fn append_page(file: &mut Vec<u8>, next_page: &mut u64, page: BTreePageBuilder) -> BlockRef {
    let block = BlockId::new(false, *next_page).unwrap();
    *next_page += 1;

    let offset = file.len() as u64;
    file.extend_from_slice(&page.block(block).build());
    BlockRef::new(block, offset)
}

/// Leaf pages for `entries`, then intermediate levels until a single root page is left.
fn write_btree<E: BTreeEntry>(
    file: &mut Vec<u8>,
    next_page: &mut u64,
    entries: &[E],
    key: impl Fn(&E) -> u64,
) -> BlockRef {
    if entries.is_empty() {
        return append_page(file, next_page, BTreePageBuilder::leaf::<E>(&[]));
    }

    let per_leaf = BTREE_ENTRIES_SIZE / usize::from(E::ENTRY_SIZE);
    let mut pages: Vec<_> = entries
        .chunks(per_leaf)
        .map(|chunk| {
            let page = append_page(file, next_page, BTreePageBuilder::leaf(chunk));
            (key(&chunk[0]), page)
        })
        .collect();

    let per_page = BTREE_ENTRIES_SIZE / usize::from(IntermediateEntry::ENTRY_SIZE);
    let mut level = 0;
    while pages.len() > 1 {
        level += 1;
        pages = pages
            .chunks(per_page)
            .map(|chunk| {
                let page = BTreePageBuilder::intermediate::<E>(level, chunk);
                (chunk[0].0, append_page(file, next_page, page))
            })
            .collect();
    }

    pages[0].1
}
