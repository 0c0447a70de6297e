//! ## [Named Property Lookup Map](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/e17e195d-0454-4b9b-b398-c9127a26a678)

use byteorder::{ByteOrder, LittleEndian};
use std::{collections::BTreeMap, fmt::Display};
use tracing::{debug, warn};

use super::*;
use crate::ltp::{
    tags::NAMED_PROPERTY_BASE, Guid, LtpError, PropertyContext, PropertyRecord, PropertyType,
};

pub const PS_MAPI: Guid = Guid::new(
    0x00020328,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

pub const PS_PUBLIC_STRINGS: Guid = Guid::new(
    0x00020329,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// `PidTagNameidStreamGuid`
pub const NAMEID_STREAM_GUID: u16 = 0x0002;
/// `PidTagNameidStreamEntry`
pub const NAMEID_STREAM_ENTRY: u16 = 0x0003;
/// `PidTagNameidStreamString`
pub const NAMEID_STREAM_STRING: u16 = 0x0004;

const NAMEID_ENTRY_SIZE: usize = 8;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum NamedPropertyName {
    /// `dwPropertyID` is a numeric identifier.
    Number(u32),
    /// `dwPropertyID` was an offset into the string stream.
    String(String),
}

impl Display for NamedPropertyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamedPropertyName::Number(id) => write!(f, "0x{id:04X}"),
            NamedPropertyName::String(name) => write!(f, "{name}"),
        }
    }
}

/// `NAMEID`: one named property, keyed by its property ID.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NamedProperty {
    prop_id: u16,
    guid: Option<Guid>,
    name: NamedPropertyName,
}

impl NamedProperty {
    /// The property ID in the `0x8000` range that PCs use for this name.
    pub fn prop_id(&self) -> u16 {
        self.prop_id
    }

    pub fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }

    pub fn name(&self) -> &NamedPropertyName {
        &self.name
    }
}

/// Maps named property IDs to their `(name, GUID)` pair, read from `NID_NAME_TO_ID_MAP`.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct NamedPropertyMap {
    entries: BTreeMap<u16, NamedProperty>,
}

impl NamedPropertyMap {
    pub fn read(context: &PropertyContext<'_>) -> MessagingResult<Self> {
        let guids = read_stream(context, NAMEID_STREAM_GUID)?;
        if guids.len() % Guid::SIZE != 0 {
            return Err(MessagingError::InvalidNamedPropertyStreamSize {
                prop_id: NAMEID_STREAM_GUID,
                size: guids.len(),
            });
        }
        let guids: Vec<_> = guids
            .chunks_exact(Guid::SIZE)
            .filter_map(|guid| <&[u8; Guid::SIZE]>::try_from(guid).ok())
            .map(Guid::from_bytes)
            .collect();

        let entries = read_stream(context, NAMEID_STREAM_ENTRY)?;
        if entries.len() % NAMEID_ENTRY_SIZE != 0 {
            return Err(MessagingError::InvalidNamedPropertyStreamSize {
                prop_id: NAMEID_STREAM_ENTRY,
                size: entries.len(),
            });
        }

        let strings = match read_stream(context, NAMEID_STREAM_STRING) {
            Err(MessagingError::NamedPropertyStreamNotFound(_)) => {
                debug!("no PidTagNameidStreamString");
                Vec::new()
            }
            strings => strings?,
        };

        let mut map = BTreeMap::new();
        for entry in entries.chunks_exact(NAMEID_ENTRY_SIZE) {
            // dwPropertyID
            let id = LittleEndian::read_u32(&entry[..4]);
            // N, wGuid
            let guid_index = LittleEndian::read_u16(&entry[4..6]);
            // wPropIdx
            let prop_index = LittleEndian::read_u16(&entry[6..]);

            let Some(prop_id) = NAMED_PROPERTY_BASE.checked_add(prop_index) else {
                warn!(prop_index, "NAMEID wPropIdx out of range");
                continue;
            };

            let guid = match guid_index >> 1 {
                0 => None,
                1 => Some(PS_MAPI),
                2 => Some(PS_PUBLIC_STRINGS),
                index => {
                    let guid = guids.get(usize::from(index - 3)).copied();
                    if guid.is_none() {
                        warn!(prop_id, index, count = guids.len(), "NAMEID wGuid not in GUID stream");
                    }
                    guid
                }
            };

            let name = if guid_index & 0x0001 == 0 {
                NamedPropertyName::Number(id)
            } else {
                match read_string(&strings, id) {
                    Some(name) => NamedPropertyName::String(name),
                    None => {
                        warn!(prop_id, offset = id, "NAMEID string offset not in string stream");
                        continue;
                    }
                }
            };

            map.insert(
                prop_id,
                NamedProperty {
                    prop_id,
                    guid,
                    name,
                },
            );
        }

        debug!(entries = map.len(), "read named property map");
        Ok(Self { entries: map })
    }

    pub fn get(&self, prop_id: u16) -> Option<&NamedProperty> {
        self.entries.get(&prop_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedProperty> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label named records with their names. Other records are left alone.
    pub fn enrich<'r>(&self, records: impl IntoIterator<Item = &'r mut PropertyRecord>) {
        for record in records {
            if !record.is_named() {
                continue;
            }
            if let Some(named) = self.get(record.prop_id()) {
                record.set_code(named.name().to_string());
            }
        }
    }
}

fn read_stream(context: &PropertyContext<'_>, prop_id: u16) -> MessagingResult<Vec<u8>> {
    let record = match context.record(prop_id) {
        Ok(record) => record,
        Err(LtpError::PropertyNotFound(_)) => {
            return Err(MessagingError::NamedPropertyStreamNotFound(prop_id))
        }
        Err(err) => return Err(err.into()),
    };

    let prop_type = record.property_type();
    if prop_type != Some(PropertyType::Binary) {
        return Err(MessagingError::InvalidNamedPropertyStreamType { prop_id, prop_type });
    }

    Ok(context.get_buffer(prop_id)?)
}

/// A length-prefixed UTF-16LE name at `offset` in the string stream.
fn read_string(strings: &[u8], offset: u32) -> Option<String> {
    let start = usize::try_from(offset).ok()?;
    let size = strings.get(start..start.checked_add(4)?)?;
    let size = usize::try_from(LittleEndian::read_u32(size)).ok()?;
    let data = strings.get(start + 4..(start + 4).checked_add(size)?)?;

    let units: Vec<u16> = data.chunks_exact(2).map(LittleEndian::read_u16).collect();
    Some(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ndb::{NodeId, NodeIdType, NID_NAME_TO_ID_MAP, NID_ROOT_FOLDER},
        testing::{NamedPropertyMapBuilder, PropertyContextBuilder, PstBuilder},
        PstFile,
    };

    const PSETID_COMMON: Guid = Guid::new(
        0x00062008,
        0x0000,
        0x0000,
        [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
    );

    fn message_id() -> NodeId {
        NodeId::new(NodeIdType::NormalMessage, 1).unwrap()
    }

    fn open_file(names: &NamedPropertyMapBuilder, message: Option<&PropertyContextBuilder>) -> PstFile {
        let mut builder = PstBuilder::new();
        let data = builder.data(&names.build().build());
        builder.node(NID_NAME_TO_ID_MAP, None, data, None);

        if let Some(message) = message {
            let data = builder.data(&message.build());
            builder.node(message_id(), Some(NID_ROOT_FOLDER), data, None);
        }

        let file = builder.write_temp();
        PstFile::open(file.path()).unwrap()
    }

    #[test]
    fn test_read_map() {
        let mut names = NamedPropertyMapBuilder::new();
        let common = names.guid(PSETID_COMMON);
        names.number(0, common, 0x8503);
        names.string(1, 2, "Keywords");
        names.number(2, 1, 0x0037);
        let pst = open_file(&names, None);

        let map = pst.named_property_map().unwrap().unwrap();
        assert_eq!(map.len(), 3);

        let reminder = map.get(0x8000).unwrap();
        assert_eq!(reminder.guid(), Some(&PSETID_COMMON));
        assert_eq!(reminder.name(), &NamedPropertyName::Number(0x8503));

        let keywords = map.get(0x8001).unwrap();
        assert_eq!(keywords.guid(), Some(&PS_PUBLIC_STRINGS));
        assert_eq!(keywords.name(), &NamedPropertyName::String("Keywords".into()));

        assert_eq!(map.get(0x8002).unwrap().guid(), Some(&PS_MAPI));
    }

    #[test]
    fn test_read_map_twice() {
        let mut names = NamedPropertyMapBuilder::new();
        names.string(0, 2, "Keywords");
        let pst = open_file(&names, None);

        let context = PropertyContext::open_unnamed(&pst, NID_NAME_TO_ID_MAP, None).unwrap();
        let first = NamedPropertyMap::read(&context).unwrap();
        let second = NamedPropertyMap::read(&context).unwrap();
        assert_eq!(first, second);
        assert_eq!(Some(&first), pst.named_property_map().unwrap());
    }

    #[test]
    fn test_missing_guid() {
        let mut names = NamedPropertyMapBuilder::new();
        names.number(0, 7, 0x8503);
        let pst = open_file(&names, None);

        let map = pst.named_property_map().unwrap().unwrap();
        assert_eq!(map.get(0x8000).unwrap().guid(), None);
    }

    #[test]
    fn test_bad_string_offset() {
        let mut names = NamedPropertyMapBuilder::new();
        names.raw(0x1000, (2 << 1) | 1, 0);
        names.string(1, 2, "Keywords");
        let pst = open_file(&names, None);

        let map = pst.named_property_map().unwrap().unwrap();
        assert!(map.get(0x8000).is_none());
        assert!(map.get(0x8001).is_some());
    }

    #[test]
    fn test_enrich() {
        let mut names = NamedPropertyMapBuilder::new();
        names.string(0, 2, "Keywords");

        let mut message = PropertyContextBuilder::new();
        message.inline(0x0E07, PropertyType::Integer32, 1);
        message.inline(0x8000, PropertyType::Integer32, 2);
        message.inline(0x8001, PropertyType::Integer32, 3);
        let pst = open_file(&names, Some(&message));

        let context = PropertyContext::open(&pst, message_id(), None).unwrap();
        assert_eq!(context.record(0x0E07).unwrap().code(), "MessageFlags");
        assert_eq!(context.record(0x8000).unwrap().code(), "Keywords");
        assert_eq!(context.record(0x8001).unwrap().code(), "0x8001");
        assert_eq!(
            context.get_value("Keywords").unwrap(),
            Some(crate::ltp::TypedValue::Integer32(2))
        );
    }

    #[test]
    fn test_enrich_below_named_range() {
        let mut names = NamedPropertyMapBuilder::new();
        names.string(0, 2, "Keywords");
        let pst = open_file(&names, None);
        let map = pst.named_property_map().unwrap().unwrap();

        let mut records = vec![
            PropertyRecord::new(0x0037, PropertyType::Unicode.into(), 0x20),
            PropertyRecord::new(0x1234, PropertyType::Integer32.into(), 0),
        ];
        let before = records.clone();
        map.enrich(records.iter_mut());
        assert_eq!(records, before);
    }

    #[test]
    fn test_no_map() {
        let mut builder = PstBuilder::new();
        let data = builder.data(&PropertyContextBuilder::new().build());
        builder.node(NID_ROOT_FOLDER, None, data, None);
        let file = builder.write_temp();
        let pst = PstFile::open(file.path()).unwrap();

        assert!(pst.named_property_map().unwrap().is_none());
    }

    #[test]
    fn test_read_string() {
        let mut strings = 4_u32.to_le_bytes().to_vec();
        strings.extend_from_slice(&[b'O', 0, b'K', 0]);
        assert_eq!(read_string(&strings, 0).as_deref(), Some("OK"));
        assert_eq!(read_string(&strings, 6), None);
        assert_eq!(read_string(&strings, u32::MAX), None);
    }
}
