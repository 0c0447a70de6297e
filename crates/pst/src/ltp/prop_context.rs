//! ## [Property Context (PC)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/294c83c6-ff92-42f5-b6b6-876c29fa9737)

use byteorder::{ByteOrder, LittleEndian};
use std::{collections::BTreeMap, fmt::Debug};
use tracing::{trace, warn};

use super::{tags::*, *};
use crate::{ndb::NodeId, PstFile};

/// [PC BTH Record](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/7daab6f5-ce65-437e-80d5-1b1be4088bd3)
#[derive(Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    prop_id: u16,
    prop_type: u16,
    value: u32,
    code: String,
}

impl PropertyRecord {
    pub const SIZE: usize = 8;

    pub fn new(prop_id: u16, prop_type: u16, value: u32) -> Self {
        Self {
            prop_id,
            prop_type,
            value,
            code: tag_code(prop_id),
        }
    }

    fn parse(key: &[u8], data: &[u8]) -> Self {
        // wPropId
        let prop_id = LittleEndian::read_u16(key);
        // wPropType
        let prop_type = LittleEndian::read_u16(&data[..2]);
        // dwValueHnid
        let value = LittleEndian::read_u32(&data[2..]);
        Self::new(prop_id, prop_type, value)
    }

    pub fn prop_id(&self) -> u16 {
        self.prop_id
    }

    /// Raw `wPropType`, which may not be a known [PropertyType].
    pub fn prop_type(&self) -> u16 {
        self.prop_type
    }

    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::try_from(self.prop_type).ok()
    }

    /// `dwValueHnid`
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Display name: a well-known tag, a named property, or `0x%04X`.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
    }

    pub fn is_named(&self) -> bool {
        self.prop_id >= NAMED_PROPERTY_BASE
    }
}

impl Debug for PropertyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PropertyRecord(0x{:04X} {} type 0x{:04X} value 0x{:08X})",
            self.prop_id, self.code, self.prop_type, self.value
        )
    }
}

/// The property records of one node (or sub-node), with the heap they point into.
pub struct PropertyContext<'a> {
    pst: &'a PstFile,
    node: NodeId,
    local: Option<NodeId>,
    heap: HeapNode,
    records: BTreeMap<u16, PropertyRecord>,
}

impl<'a> PropertyContext<'a> {
    /// Open the PC of `node`, or of its sub-node `local`, and label named properties from the
    /// file's named property map.
    pub fn open(pst: &'a PstFile, node: NodeId, local: Option<NodeId>) -> LtpResult<Self> {
        let mut context = Self::open_unnamed(pst, node, local)?;
        if context.records.values().any(PropertyRecord::is_named) {
            match pst.named_property_map() {
                Ok(Some(named_props)) => named_props.enrich(context.records.values_mut()),
                Ok(None) => {}
                Err(err) => warn!(?node, %err, "named properties left unlabeled"),
            }
        }
        Ok(context)
    }

    /// Open the PC without consulting the named property map.
    pub fn open_unnamed(pst: &'a PstFile, node: NodeId, local: Option<NodeId>) -> LtpResult<Self> {
        let heap = HeapNode::parse(pst.read_nid(node, local)?)?;

        let client_signature = heap.header().client_signature();
        if client_signature != HeapNodeType::Properties {
            return Err(LtpError::UnexpectedHeapClientSignature(client_signature));
        }

        let tree = HeapTree::new(&heap, heap.header().user_root())?;
        let key_size = tree.header().key_size();
        let entry_size = tree.header().entry_size();
        if key_size != 2 || entry_size != 6 {
            return Err(LtpError::InvalidPropertyTreeRecordSize {
                key_size,
                entry_size,
            });
        }

        let records: BTreeMap<_, _> = tree
            .records()?
            .into_iter()
            .map(|record| PropertyRecord::parse(record.key(), record.data()))
            .map(|record| (record.prop_id(), record))
            .collect();
        trace!(?node, ?local, records = records.len(), "open property context");

        Ok(Self {
            pst,
            node,
            local,
            heap,
            records,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn local(&self) -> Option<NodeId> {
        self.local
    }

    pub fn heap(&self) -> &HeapNode {
        &self.heap
    }

    pub fn records(&self) -> impl Iterator<Item = &PropertyRecord> {
        self.records.values()
    }

    pub fn record(&self, prop_id: u16) -> LtpResult<&PropertyRecord> {
        self.records
            .get(&prop_id)
            .ok_or(LtpError::PropertyNotFound(prop_id))
    }

    /// The raw value bytes of `prop_id`.
    ///
    /// Types no wider than 4 bytes come straight from `dwValueHnid`. Anything else treats
    /// `dwValueHnid` as an HNID: a HID into this PC's heap, or a NID in the owning node's
    /// sub-node tree.
    pub fn get_buffer(&self, prop_id: u16) -> LtpResult<Vec<u8>> {
        let record = self.record(prop_id)?;

        if let Some(size) = record
            .property_type()
            .filter(PropertyType::is_inline)
            .and_then(|prop_type| prop_type.fixed_size())
        {
            return Ok(record.value().to_le_bytes()[..size].to_vec());
        }

        let hnid = record.value();
        if hnid == 0 {
            return Ok(Vec::new());
        }

        if hnid & 0x1F == 0 {
            Ok(self.heap.get(HeapId::from(hnid))?.to_vec())
        } else {
            Ok(self.pst.read_nid(self.node, Some(NodeId::from(hnid)))?)
        }
    }

    /// Decode `prop_id` in the file's configured time zone.
    pub fn get(&self, prop_id: u16) -> LtpResult<TypedValue> {
        let record = self.record(prop_id)?;
        let buffer = self.get_buffer(prop_id)?;
        TypedValue::decode(record.prop_type(), &buffer, self.pst.options().time_zone())
    }

    /// Decode the property named `name`, or `None` if this PC does not have it.
    pub fn get_value(&self, name: &str) -> LtpResult<Option<TypedValue>> {
        match self.find(name) {
            Some(prop_id) => self.get(prop_id).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_value_or(&self, name: &str, default: TypedValue) -> LtpResult<TypedValue> {
        Ok(self.get_value(name)?.unwrap_or(default))
    }

    /// The first of `names` present in this PC.
    pub fn resolve_alias<'n>(&self, names: &[&'n str]) -> Option<&'n str> {
        names.iter().copied().find(|name| self.find(name).is_some())
    }

    fn find(&self, name: &str) -> Option<u16> {
        tag_for_name(name)
            .filter(|prop_id| self.records.contains_key(prop_id))
            .or_else(|| {
                self.records
                    .values()
                    .find(|record| record.code() == name)
                    .map(PropertyRecord::prop_id)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messaging::{NAMEID_STREAM_ENTRY, NAMEID_STREAM_GUID},
        ndb::{NodeIdType, SubNodeEntry, NID_NAME_TO_ID_MAP, NID_ROOT_FOLDER},
        testing::{PropertyContextBuilder, PstBuilder},
        ErrorKind,
    };

    fn message_id() -> NodeId {
        NodeId::new(NodeIdType::NormalMessage, 1).unwrap()
    }

    fn open_file(properties: &PropertyContextBuilder, sub_nodes: &[(NodeId, &[u8])]) -> PstFile {
        let mut builder = PstBuilder::new();
        let data = builder.data(&properties.build());
        let sub_node = if sub_nodes.is_empty() {
            None
        } else {
            let entries: Vec<_> = sub_nodes
                .iter()
                .map(|(node, payload)| SubNodeEntry::new(*node, builder.data(payload), None))
                .collect();
            Some(builder.sub_nodes(&entries))
        };
        builder.node(message_id(), Some(NID_ROOT_FOLDER), data, sub_node);

        let file = builder.write_temp();
        PstFile::open(file.path()).unwrap()
    }

    fn utf16(value: &str) -> Vec<u8> {
        value.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn test_inline_value() {
        let mut properties = PropertyContextBuilder::new();
        // Looks like HID index 50, which this heap does not have.
        properties.inline(0x0E07, PropertyType::Integer32, 0x0640);
        properties.inline(0x0E1B, PropertyType::Boolean, 1);
        let pst = open_file(&properties, &[]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        assert_eq!(context.get_buffer(0x0E07).unwrap(), 0x0640_u32.to_le_bytes());
        assert_eq!(
            context.get_value("MessageFlags").unwrap(),
            Some(TypedValue::Integer32(0x0640))
        );
        assert_eq!(
            context.get_value("HasAttachments").unwrap(),
            Some(TypedValue::Boolean(true))
        );
    }

    #[test]
    fn test_heap_value() {
        let mut properties = PropertyContextBuilder::new();
        properties.heap(0x0037, PropertyType::Unicode, &utf16("Quarterly report"));
        let pst = open_file(&properties, &[]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        let record = context.record(0x0037).unwrap();
        assert_eq!(record.value() & 0x1F, 0);
        assert_eq!(record.code(), "SubjectW");

        let hid = HeapId::from(record.value());
        assert_eq!(context.get_buffer(0x0037).unwrap(), context.heap().get(hid).unwrap());
        assert_eq!(
            context.get_value("SubjectW").unwrap(),
            Some(TypedValue::Unicode("Quarterly report".into()))
        );
    }

    #[test]
    fn test_sub_node_value() {
        let body = NodeId::new(NodeIdType::ListsTablesProperties, 1).unwrap();
        let payload = utf16("A body larger than the heap would like to hold");

        let mut properties = PropertyContextBuilder::new();
        properties.node(0x1000, PropertyType::Unicode, body);
        let pst = open_file(&properties, &[(body, &payload)]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        assert_eq!(context.get_buffer(0x1000).unwrap(), payload);
        assert_eq!(
            context.get_value("BodyW").unwrap(),
            Some(TypedValue::Unicode(
                "A body larger than the heap would like to hold".into()
            ))
        );
    }

    #[test]
    fn test_empty_hnid() {
        let mut properties = PropertyContextBuilder::new();
        properties.raw(0x0037, PropertyType::Unicode.into(), 0);
        let pst = open_file(&properties, &[]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        assert!(context.get_buffer(0x0037).unwrap().is_empty());
        assert_eq!(
            context.get_value("SubjectW").unwrap(),
            Some(TypedValue::Unicode(String::new()))
        );
    }

    #[test]
    fn test_property_not_found() {
        let mut properties = PropertyContextBuilder::new();
        properties.inline(0x0E07, PropertyType::Integer32, 1);
        let pst = open_file(&properties, &[]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        let Err(err @ LtpError::PropertyNotFound(0x0037)) = context.get_buffer(0x0037) else {
            panic!("PidTagSubject is not in this PC");
        };
        assert_eq!(err.kind(), ErrorKind::DanglingReference);
        assert_eq!(context.get_value("SubjectW").unwrap(), None);
        assert_eq!(
            context
                .get_value_or("SubjectW", TypedValue::Unicode("(no subject)".into()))
                .unwrap(),
            TypedValue::Unicode("(no subject)".into())
        );
    }

    #[test]
    fn test_resolve_alias() {
        let mut properties = PropertyContextBuilder::new();
        properties.heap(0x3707, PropertyType::Unicode, &utf16("report.pdf"));
        let pst = open_file(&properties, &[]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        assert_eq!(
            context.resolve_alias(&["AttachLongFilename", "AttachLongFilenameW"]),
            Some("AttachLongFilenameW")
        );
        assert_eq!(
            context.resolve_alias(&["AttachFilename", "AttachFilenameW"]),
            None
        );
    }

    #[test]
    fn test_unknown_tag_code() {
        let mut properties = PropertyContextBuilder::new();
        properties.inline(0x1234, PropertyType::Integer32, 7);
        let pst = open_file(&properties, &[]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        assert_eq!(context.record(0x1234).unwrap().code(), "0x1234");
        assert_eq!(
            context.get_value("0x1234").unwrap(),
            Some(TypedValue::Integer32(7))
        );
    }

    #[test]
    fn test_unsupported_type() {
        let mut properties = PropertyContextBuilder::new();
        properties.heap(0x3701, PropertyType::Object, &[0; 8]);
        let pst = open_file(&properties, &[]);

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        let Err(err) = context.get(0x3701) else {
            panic!("PtypObject has no decoder");
        };
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(context.get_buffer(0x3701).unwrap(), [0; 8]);
    }

    #[test]
    fn test_not_a_property_context() {
        let mut builder = PstBuilder::new();
        let heap = crate::testing::HeapBuilder::new(HeapNodeType::Table).build();
        let data = builder.data(&heap);
        builder.node(message_id(), Some(NID_ROOT_FOLDER), data, None);
        let file = builder.write_temp();
        let pst = PstFile::open(file.path()).unwrap();

        let Err(LtpError::UnexpectedHeapClientSignature(HeapNodeType::Table)) =
            PropertyContext::open(&pst, message_id(), None)
        else {
            panic!("bClientSig should be bTypePC");
        };
    }

    #[test]
    fn test_corrupt_named_property_map() {
        let mut names = PropertyContextBuilder::new();
        names.heap(NAMEID_STREAM_GUID, PropertyType::Binary, &[]);
        names.heap(NAMEID_STREAM_ENTRY, PropertyType::Binary, &[0; 7]);

        let mut properties = PropertyContextBuilder::new();
        properties.inline(0x0E07, PropertyType::Integer32, 1);
        properties.inline(0x8000, PropertyType::Integer32, 2);

        let mut builder = PstBuilder::new();
        let data = builder.data(&names.build());
        builder.node(NID_NAME_TO_ID_MAP, None, data, None);
        let data = builder.data(&properties.build());
        builder.node(message_id(), Some(NID_ROOT_FOLDER), data, None);
        let file = builder.write_temp();
        let pst = PstFile::open(file.path()).unwrap();

        assert!(pst.named_property_map().is_err());

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        assert_eq!(context.record(0x8000).unwrap().code(), "0x8000");
        assert_eq!(context.get(0x8000).unwrap(), TypedValue::Integer32(2));
        assert_eq!(
            context.get_value("MessageFlags").unwrap(),
            Some(TypedValue::Integer32(1))
        );
    }
}
