//! Node entries from the NBT, classified by type and joined with their sub-node trees.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    collections::{btree_map, BTreeMap},
    io::{Cursor, Read, Seek},
    ops::Bound,
};
use tracing::warn;

use super::*;

/// Nested `bidSub` chains deeper than this are rejected.
pub const MAX_SUB_NODE_DEPTH: u8 = 8;

/// One resolved `SLENTRY`.
/// The `node` is only unique within the owning top-level node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SubNodeEntry {
    node: NodeId,
    data: BlockId,
    sub_node: Option<BlockId>,
}

impl SubNodeEntry {
    pub fn new(node: NodeId, data: BlockId, sub_node: Option<BlockId>) -> Self {
        Self {
            node,
            data,
            sub_node,
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

    pub fn id_type(&self) -> Option<NodeIdType> {
        self.node.id_type().ok()
    }
}

/// `SLBLOCK` or `SIBLOCK`
#[derive(Clone, Debug)]
pub enum SubNodeTreeBlock {
    Leaf(Vec<SubNodeEntry>),
    Intermediate(Vec<(NodeId, BlockId)>),
}

impl SubNodeTreeBlock {
    const HEADER_SIZE: usize = 8;

    pub fn parse(data: &[u8]) -> NdbResult<Self> {
        let mut cursor = Cursor::new(data);

        // btype
        let block_type = cursor.read_u8()?;
        if block_type != 0x02 {
            return Err(NdbError::InvalidSubNodeBlockType(block_type));
        }

        // cLevel
        let level = cursor.read_u8()?;
        let entry_size = match level {
            0 => 24,
            1 => 16,
            _ => return Err(NdbError::InvalidSubNodeBlockLevel(level)),
        };

        // cEnt
        let entry_count = cursor.read_u16::<LittleEndian>()?;
        if Self::HEADER_SIZE + usize::from(entry_count) * entry_size > data.len() {
            return Err(NdbError::InvalidSubNodeBlockEntryCount(entry_count));
        }

        // dwPadding
        cursor.read_u32::<LittleEndian>()?;

        if level == 0 {
            let entries = (0..entry_count)
                .map(|_| {
                    // nid
                    let node = read_sub_node_id(&mut cursor)?;
                    // bidData
                    let data = BlockId::read(&mut cursor)?;
                    // bidSub
                    let sub_node = BlockId::read(&mut cursor)?;
                    let sub_node = if sub_node.is_null() {
                        None
                    } else {
                        Some(sub_node)
                    };
                    Ok(SubNodeEntry::new(node, data, sub_node))
                })
                .collect::<NdbResult<Vec<_>>>()?;
            Ok(Self::Leaf(entries))
        } else {
            let entries = (0..entry_count)
                .map(|_| {
                    // nid
                    let node = read_sub_node_id(&mut cursor)?;
                    // bid
                    let block = BlockId::read(&mut cursor)?;
                    Ok((node, block))
                })
                .collect::<NdbResult<Vec<_>>>()?;
            Ok(Self::Intermediate(entries))
        }
    }
}

fn read_sub_node_id(f: &mut dyn Read) -> NdbResult<NodeId> {
    let node = f.read_u64::<LittleEndian>()?;
    let Ok(node) = u32::try_from(node) else {
        return Err(NdbError::InvalidSubNodeEntryNodeId(node));
    };
    Ok(NodeId::from(node))
}

/// Read the sub-node tree at `block` and fold every entry, including the ones reached through a
/// nested `bidSub`, into `sub_nodes`.
pub fn read_sub_node_tree<R: Read + Seek>(
    store: &mut BlockStore<'_, R>,
    block: BlockId,
    sub_nodes: &mut BTreeMap<NodeId, SubNodeEntry>,
) -> NdbResult<()> {
    let mut pending = vec![(block, 0_u8)];

    while let Some((block, depth)) = pending.pop() {
        if depth > MAX_SUB_NODE_DEPTH {
            return Err(NdbError::SubNodeTreeDepthExceeded(MAX_SUB_NODE_DEPTH));
        }

        let entries = match SubNodeTreeBlock::parse(&store.read_raw(block)?)? {
            SubNodeTreeBlock::Leaf(entries) => entries,
            SubNodeTreeBlock::Intermediate(children) => {
                let mut entries = Vec::new();
                for (_, child) in children {
                    match SubNodeTreeBlock::parse(&store.read_raw(child)?)? {
                        SubNodeTreeBlock::Leaf(leaves) => entries.extend(leaves),
                        SubNodeTreeBlock::Intermediate(_) => {
                            return Err(NdbError::NestedSubNodeIndirection(u64::from(child)))
                        }
                    }
                }
                entries
            }
        };

        for entry in entries.into_iter().rev() {
            if let Some(nested) = entry.sub_node() {
                pending.push((nested, depth + 1));
            }

            match sub_nodes.entry(entry.node()) {
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                btree_map::Entry::Occupied(existing) if *existing.get() != entry => {
                    warn!(
                        node = ?entry.node(),
                        kept = ?existing.get().data(),
                        skipped = ?entry.data(),
                        "duplicate SLENTRY nid"
                    );
                }
                btree_map::Entry::Occupied(_) => {}
            }
        }
    }

    Ok(())
}

/// A node from the NBT with its derived type and flattened sub-node map.
#[derive(Clone, PartialEq, Debug)]
pub struct NodeEntry {
    entry: NodeBTreeEntry,
    id_type: Option<NodeIdType>,
    sub_nodes: BTreeMap<NodeId, SubNodeEntry>,
}

impl NodeEntry {
    pub fn new(entry: NodeBTreeEntry, sub_nodes: impl IntoIterator<Item = SubNodeEntry>) -> Self {
        Self {
            entry,
            id_type: entry.node().id_type().ok(),
            sub_nodes: sub_nodes
                .into_iter()
                .map(|sub_node| (sub_node.node(), sub_node))
                .collect(),
        }
    }

    pub fn btree_entry(&self) -> &NodeBTreeEntry {
        &self.entry
    }

    pub fn node(&self) -> NodeId {
        self.entry.node()
    }

    pub fn data(&self) -> BlockId {
        self.entry.data()
    }

    pub fn sub_node(&self) -> Option<BlockId> {
        self.entry.sub_node()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.entry.parent()
    }

    /// `None` when the low 5 bits of the nid are not a defined `nidType`.
    pub fn id_type(&self) -> Option<NodeIdType> {
        self.id_type
    }

    pub fn well_known(&self) -> Option<WellKnownNode> {
        self.node().well_known()
    }

    pub fn type_code(&self) -> &'static str {
        self.id_type
            .map(|id_type| id_type.code())
            .unwrap_or("NID_TYPE_UNKNOWN")
    }

    pub fn sub_nodes(&self) -> impl Iterator<Item = &SubNodeEntry> {
        self.sub_nodes.values()
    }

    pub fn find_sub_node(&self, node: NodeId) -> Option<&SubNodeEntry> {
        self.sub_nodes.get(&node)
    }
}

/// Every live node, keyed by [NodeId], built once when the file is opened.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct NodeIndex {
    nodes: BTreeMap<NodeId, NodeEntry>,
}

impl NodeIndex {
    pub fn new(nodes: impl IntoIterator<Item = NodeEntry>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|node| (node.node(), node)).collect(),
        }
    }

    /// Classify the NBT leaves and resolve each `bidSub` into a flat sub-node map.
    pub fn build<R: Read + Seek>(
        store: &mut BlockStore<'_, R>,
        entries: impl IntoIterator<Item = NodeBTreeEntry>,
    ) -> NdbResult<Self> {
        let mut nodes = BTreeMap::new();
        for entry in entries {
            let mut sub_nodes = BTreeMap::new();
            if let Some(block) = entry.sub_node() {
                read_sub_node_tree(store, block, &mut sub_nodes)?;
            }
            nodes.insert(
                entry.node(),
                NodeEntry {
                    entry,
                    id_type: entry.node().id_type().ok(),
                    sub_nodes,
                },
            );
        }
        Ok(Self { nodes })
    }

    pub fn get(&self, node: NodeId) -> NdbResult<&NodeEntry> {
        self.nodes.get(&node).ok_or(NdbError::NodeNotFound(node))
    }

    pub fn entries(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The block holding the data of `node`, or of its sub-node `local` when given.
    pub fn data_block(&self, node: NodeId, local: Option<NodeId>) -> NdbResult<BlockId> {
        let entry = self.get(node)?;
        match local {
            Some(local) => entry
                .find_sub_node(local)
                .map(SubNodeEntry::data)
                .ok_or(NdbError::SubNodeNotFound(node, local)),
            None => Ok(entry.data()),
        }
    }

    /// Enumerate `(owner, local)` pairs whose node type is `id_type`.
    ///
    /// Without a `scope`, top-level matches come back as `(nid, None)`, each followed by its own
    /// matching sub-nodes as `(nid, Some(local))`. With a `scope`, only that node's sub-nodes are
    /// listed.
    pub fn list_nids(&self, id_type: NodeIdType, scope: Option<NodeId>) -> NdbResult<NodeIds<'_>> {
        let nodes = match scope {
            Some(scope) => {
                self.get(scope)?;
                self.nodes
                    .range((Bound::Included(scope), Bound::Included(scope)))
            }
            None => self.nodes.range(..),
        };

        Ok(NodeIds {
            id_type,
            scoped: scope.is_some(),
            nodes,
            current: None,
        })
    }
}

/// Iterator returned by [NodeIndex::list_nids].
pub struct NodeIds<'a> {
    id_type: NodeIdType,
    scoped: bool,
    nodes: btree_map::Range<'a, NodeId, NodeEntry>,
    current: Option<(NodeId, btree_map::Values<'a, NodeId, SubNodeEntry>)>,
}

impl Iterator for NodeIds<'_> {
    type Item = (NodeId, Option<NodeId>);

    fn next(&mut self) -> Option<Self::Item> {
        let id_type = self.id_type;
        loop {
            if let Some((owner, sub_nodes)) = self.current.as_mut() {
                if let Some(sub_node) = sub_nodes.find(|entry| entry.id_type() == Some(id_type)) {
                    return Some((*owner, Some(sub_node.node())));
                }
                self.current = None;
            }

            let (_, node) = self.nodes.next()?;
            self.current = Some((node.node(), node.sub_nodes.values()));
            if !self.scoped && node.id_type() == Some(id_type) {
                return Some((node.node(), None));
            }
        }
    }
}
