//! Display names for well-known property tags.
//!
//! Names ending in `W` are the wide-character (`PtypString`) spelling of the property. Callers
//! that accept either spelling look both up with [PropertyContext::resolve_alias](super::PropertyContext::resolve_alias).

/// First property ID reserved for named properties.
pub const NAMED_PROPERTY_BASE: u16 = 0x8000;

const PROPERTY_TAGS: &[(u16, &str)] = &[
    // Message store
    (0x0FF9, "RecordKey"),
    (0x35E0, "IpmSubTreeEntryId"),
    (0x35E3, "IpmWastebasketEntryId"),
    (0x35E7, "FinderEntryId"),
    // Folder
    (0x3001, "DisplayNameW"),
    (0x3602, "ContentCount"),
    (0x3603, "ContentUnreadCount"),
    (0x360A, "Subfolders"),
    (0x3613, "ContainerClassW"),
    (0x6635, "PstHiddenCount"),
    (0x6636, "PstHiddenUnread"),
    (0x00E3, "ReplItemId"),
    (0x0E33, "ReplChangenum"),
    (0x0E34, "ReplVersionHistory"),
    (0x0E38, "ReplFlags"),
    (0x67F2, "LtpRowId"),
    (0x67F3, "LtpRowVer"),
    // Message
    (0x0017, "Importance"),
    (0x001A, "MessageClassW"),
    (0x0036, "Sensitivity"),
    (0x0037, "SubjectW"),
    (0x0039, "ClientSubmitTime"),
    (0x0042, "SentRepresentingNameW"),
    (0x0057, "MessageToMe"),
    (0x0058, "MessageCcMe"),
    (0x0070, "ConversationTopicW"),
    (0x0071, "ConversationIndex"),
    (0x007D, "TransportMessageHeadersW"),
    (0x0C1A, "SenderNameW"),
    (0x0C1F, "SenderEmailAddressW"),
    (0x0E03, "DisplayCcW"),
    (0x0E04, "DisplayToW"),
    (0x0E06, "MessageDeliveryTime"),
    (0x0E07, "MessageFlags"),
    (0x0E08, "MessageSize"),
    (0x0E17, "MessageStatus"),
    (0x0E1B, "HasAttachments"),
    (0x0E30, "ReplItemid"),
    (0x0E3C, "ReplCopiedfromVersionhistory"),
    (0x0E3D, "ReplCopiedfromItemid"),
    (0x1000, "BodyW"),
    (0x1009, "RtfCompressed"),
    (0x1013, "BodyHtml"),
    (0x1035, "InternetMessageIdW"),
    (0x1097, "ItemTemporaryFlags"),
    (0x3007, "CreationTime"),
    (0x3008, "LastModificationTime"),
    (0x65C6, "SecureSubmitFlags"),
    // Attachment
    (0x0E20, "AttachSize"),
    (0x3701, "AttachDataObject"),
    (0x3703, "AttachExtensionW"),
    (0x3704, "AttachFilenameW"),
    (0x3705, "AttachMethod"),
    (0x3707, "AttachLongFilenameW"),
    (0x370B, "RenderingPosition"),
    (0x370E, "AttachMimeTagW"),
    (0x3712, "AttachContentIdW"),
    (0x3714, "AttachFlags"),
    // Recipient
    (0x0C15, "RecipientType"),
    (0x3003, "EmailAddressW"),
    (0x39FE, "SmtpAddressW"),
];

pub fn tag_name(prop_id: u16) -> Option<&'static str> {
    PROPERTY_TAGS
        .iter()
        .find(|(tag, _)| *tag == prop_id)
        .map(|(_, name)| *name)
}

/// The display name of `prop_id`, or `0x%04X` when it is not a well-known tag.
pub fn tag_code(prop_id: u16) -> String {
    tag_name(prop_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("0x{prop_id:04X}"))
}

pub fn tag_for_name(name: &str) -> Option<u16> {
    PROPERTY_TAGS
        .iter()
        .find(|(_, tag_name)| *tag_name == name)
        .map(|(tag, _)| *tag)
}
