//! [HEADER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/c9876f5a-664b-46a3-9887-ba63f113abf5)

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use super::{block_id::*, block_ref::*, *};

/// `dwMagic`
///
/// ### See also
/// [Header]
pub const HEADER_MAGIC: u32 = u32::from_be_bytes(*b"NDB!");

/// `wMagicClient`
pub const HEADER_MAGIC_CLIENT: u16 = u16::from_be_bytes(*b"MS");

/// Size of the Unicode `HEADER` structure, starting at offset 0 of the file.
pub const HEADER_SIZE: usize = 564;

const NDB_SENTINEL: u8 = 0x80;

/// `wVer`
///
/// ### See also
/// [Header]
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum NdbVersion {
    Ansi = 15,
    #[default]
    Unicode = 23,
}

impl TryFrom<u16> for NdbVersion {
    type Error = NdbError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            14..=15 => Ok(NdbVersion::Ansi),
            23 => Ok(NdbVersion::Unicode),
            _ => Err(NdbError::InvalidNdbVersion(value)),
        }
    }
}

/// `bCryptMethod`
///
/// ### See also
/// [Header]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum NdbCryptMethod {
    /// `NDB_CRYPT_NONE`: Data blocks are not encoded
    #[default]
    None = 0x00,
    /// `NDB_CRYPT_PERMUTE`: Encoded with the [Permutation algorithm](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5faf4800-645d-49d1-9457-2ac40eb467bd)
    Permute = 0x01,
    /// `NDB_CRYPT_CYCLIC`: Encoded with the [Cyclic algorithm](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/9979fc01-0a3e-496f-900f-a6a867951f23)
    Cyclic = 0x02,
}

impl TryFrom<u8> for NdbCryptMethod {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(NdbCryptMethod::None),
            0x01 => Ok(NdbCryptMethod::Permute),
            0x02 => Ok(NdbCryptMethod::Cyclic),
            _ => Err(NdbError::InvalidNdbCryptMethod(value)),
        }
    }
}

/// `fAMapValid`
///
/// ### See also
/// [Root]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum AmapStatus {
    /// `INVALID_AMAP`: One or more AMaps in the PST are INVALID
    #[default]
    Invalid = 0x00,
    /// `VALID_AMAP1`: Deprecated. Implementations SHOULD NOT use this value. The AMaps are VALID.
    Valid1 = 0x01,
    /// `VALID_AMAP2`: The AMaps are VALID.
    Valid2 = 0x02,
}

impl From<u8> for AmapStatus {
    fn from(value: u8) -> Self {
        match value {
            0x01 => AmapStatus::Valid1,
            0x02 => AmapStatus::Valid2,
            _ => AmapStatus::Invalid,
        }
    }
}

/// [ROOT](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/32ce8c94-4757-46c8-a169-3fd21abee584)
#[derive(Clone, Copy, Default, Debug)]
pub struct Root {
    file_eof_index: u64,
    amap_last_index: u64,
    amap_free_size: u64,
    pmap_free_size: u64,
    node_btree: BlockRef,
    block_btree: BlockRef,
    amap_is_valid: AmapStatus,
}

impl Root {
    pub fn new(node_btree: BlockRef, block_btree: BlockRef) -> Self {
        Self {
            node_btree,
            block_btree,
            ..Default::default()
        }
    }

    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        // dwReserved
        f.read_u32::<LittleEndian>()?;

        // ibFileEof
        let file_eof_index = f.read_u64::<LittleEndian>()?;

        // ibAMapLast
        let amap_last_index = f.read_u64::<LittleEndian>()?;

        // cbAMapFree
        let amap_free_size = f.read_u64::<LittleEndian>()?;

        // cbPMapFree
        let pmap_free_size = f.read_u64::<LittleEndian>()?;

        // BREFNBT
        let node_btree = BlockRef::read(f)?;

        // BREFBBT
        let block_btree = BlockRef::read(f)?;

        // fAMapValid
        let amap_is_valid = AmapStatus::from(f.read_u8()?);

        // bReserved, wReserved
        f.read_u8()?;
        f.read_u16::<LittleEndian>()?;

        Ok(Self {
            file_eof_index,
            amap_last_index,
            amap_free_size,
            pmap_free_size,
            node_btree,
            block_btree,
            amap_is_valid,
        })
    }

    pub fn file_eof_index(&self) -> u64 {
        self.file_eof_index
    }

    pub fn amap_last_index(&self) -> u64 {
        self.amap_last_index
    }

    pub fn amap_free_size(&self) -> u64 {
        self.amap_free_size
    }

    pub fn pmap_free_size(&self) -> u64 {
        self.pmap_free_size
    }

    pub fn node_btree(&self) -> BlockRef {
        self.node_btree
    }

    pub fn block_btree(&self) -> BlockRef {
        self.block_btree
    }

    pub fn amap_is_valid(&self) -> AmapStatus {
        self.amap_is_valid
    }
}

/// Unicode `HEADER`. The CRC fields are kept as read; they are not verified.
#[derive(Clone, Debug)]
pub struct Header {
    crc_partial: u32,
    client_version: u16,
    next_page: BlockId,
    unique: u32,
    nids: [u32; 32],
    root: Root,
    crypt_method: NdbCryptMethod,
    next_block: BlockId,
    crc_full: u32,
}

impl Header {
    pub fn read(f: &mut dyn Read) -> NdbResult<Self> {
        // dwMagic
        let magic = f.read_u32::<LittleEndian>()?;
        if magic != HEADER_MAGIC {
            return Err(NdbError::InvalidNdbHeaderMagicValue(magic));
        }

        // dwCRCPartial
        let crc_partial = f.read_u32::<LittleEndian>()?;

        // wMagicClient
        let magic = f.read_u16::<LittleEndian>()?;
        if magic != HEADER_MAGIC_CLIENT {
            return Err(NdbError::InvalidNdbHeaderMagicClientValue(magic));
        }

        // wVer
        let version = f.read_u16::<LittleEndian>()?;
        if NdbVersion::try_from(version)? != NdbVersion::Unicode {
            return Err(NdbError::AnsiPstVersion(version));
        }

        // wVerClient
        let client_version = f.read_u16::<LittleEndian>()?;

        // bPlatformCreate, bPlatformAccess
        f.read_u8()?;
        f.read_u8()?;

        // dwReserved1, dwReserved2
        f.read_u32::<LittleEndian>()?;
        f.read_u32::<LittleEndian>()?;

        // bidUnused
        f.read_u64::<LittleEndian>()?;

        // bidNextP
        let next_page = BlockId::read(f)?;

        // dwUnique
        let unique = f.read_u32::<LittleEndian>()?;

        // rgnid
        let mut nids = [0_u32; 32];
        for nid in nids.iter_mut() {
            *nid = f.read_u32::<LittleEndian>()?;
        }

        // qwUnused
        f.read_u64::<LittleEndian>()?;

        // root
        let root = Root::read(f)?;

        // dwAlign
        f.read_u32::<LittleEndian>()?;

        // rgbFM, rgbFP
        let mut free_maps = [0_u8; 256];
        f.read_exact(&mut free_maps)?;

        // bSentinel
        let sentinel = f.read_u8()?;
        if sentinel != NDB_SENTINEL {
            return Err(NdbError::InvalidNdbHeaderSentinelValue(sentinel));
        }

        // bCryptMethod
        let crypt_method = NdbCryptMethod::try_from(f.read_u8()?)?;
        if crypt_method == NdbCryptMethod::Cyclic {
            return Err(NdbError::CyclicCryptMethod);
        }

        // rgbReserved
        f.read_u16::<LittleEndian>()?;

        // bidNextB
        let next_block = BlockId::read(f)?;

        // dwCRCFull
        let crc_full = f.read_u32::<LittleEndian>()?;

        // rgbReserved2, bReserved, rgbReserved3 (total 36 bytes)
        let mut reserved = [0_u8; 36];
        f.read_exact(&mut reserved)?;

        Ok(Self {
            crc_partial,
            client_version,
            next_page,
            unique,
            nids,
            root,
            crypt_method,
            next_block,
            crc_full,
        })
    }

    pub fn version(&self) -> NdbVersion {
        NdbVersion::Unicode
    }

    pub fn client_version(&self) -> u16 {
        self.client_version
    }

    pub fn crypt_method(&self) -> NdbCryptMethod {
        self.crypt_method
    }

    pub fn next_block(&self) -> BlockId {
        self.next_block
    }

    pub fn next_page(&self) -> BlockId {
        self.next_page
    }

    pub fn unique(&self) -> u32 {
        self.unique
    }

    /// `rgnid`: next available index for each `nidType`.
    pub fn nids(&self) -> &[u32; 32] {
        &self.nids
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn crc_partial(&self) -> u32 {
        self.crc_partial
    }

    pub fn crc_full(&self) -> u32 {
        self.crc_full
    }
}
