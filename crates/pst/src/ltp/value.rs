//! Typed property values decoded from raw PC buffers.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use chrono::{DateTime, FixedOffset};
use std::{
    fmt::{Debug, Display},
    io::Cursor,
};
use tracing::warn;

use super::*;

/// 100-nanosecond ticks between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

/// `PtypGuid`: `Data1`, `Data2` and `Data3` are little-endian, `Data4` is a byte array.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    pub const SIZE: usize = 16;

    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut data4 = [0_u8; 8];
        data4.copy_from_slice(&data[8..]);
        Self {
            data1: LittleEndian::read_u32(&data[..4]),
            data2: LittleEndian::read_u16(&data[4..6]),
            data3: LittleEndian::read_u16(&data[6..8]),
            data4,
        }
    }

    pub fn data1(&self) -> u32 {
        self.data1
    }

    pub fn data2(&self) -> u16 {
        self.data2
    }

    pub fn data3(&self) -> u16 {
        self.data3
    }

    pub fn data4(&self) -> &[u8; 8] {
        &self.data4
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-",
            self.data1, self.data2, self.data3, self.data4[0], self.data4[1]
        )?;
        for byte in &self.data4[2..] {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guid({self})")
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum TypedValue {
    Null,
    Integer16(i16),
    Integer32(i32),
    Floating32(f32),
    Floating64(f64),
    /// Scaled by 10,000.
    Currency(i64),
    /// Days since December 30, 1899.
    FloatingTime(f64),
    ErrorCode(u32),
    Boolean(bool),
    Integer64(i64),
    String8(String),
    Unicode(String),
    Time(DateTime<FixedOffset>),
    Guid(Guid),
    Binary(Vec<u8>),

    MultipleInteger16(Vec<i16>),
    MultipleInteger32(Vec<i32>),
    MultipleFloating32(Vec<f32>),
    MultipleFloating64(Vec<f64>),
    MultipleCurrency(Vec<i64>),
    MultipleFloatingTime(Vec<f64>),
    MultipleInteger64(Vec<i64>),
    MultipleString8(Vec<String>),
    MultipleUnicode(Vec<String>),
    MultipleTime(Vec<DateTime<FixedOffset>>),
    MultipleGuid(Vec<Guid>),
    MultipleBinary(Vec<Vec<u8>>),

    /// A `wPropType` this crate has no decoder for, with the raw buffer.
    Unknown { prop_type: u16, data: Vec<u8> },
}

impl TypedValue {
    /// Decode `data` as `prop_type`. Unknown type codes come back as [TypedValue::Unknown];
    /// known types without a decoder fail with [LtpError::UnsupportedPropertyType].
    pub fn decode(prop_type: u16, data: &[u8], time_zone: &FixedOffset) -> LtpResult<Self> {
        let Ok(prop_type) = PropertyType::try_from(prop_type) else {
            return Ok(Self::Unknown {
                prop_type,
                data: data.to_vec(),
            });
        };

        if let Some(size) = prop_type.fixed_size() {
            if data.len() < size && prop_type != PropertyType::Guid {
                return Err(LtpError::InvalidPropertyValueSize {
                    prop_type,
                    size: data.len(),
                });
            }
        }

        let mut cursor = Cursor::new(data);
        Ok(match prop_type {
            PropertyType::Null => Self::Null,
            PropertyType::Integer16 => Self::Integer16(cursor.read_i16::<LittleEndian>()?),
            PropertyType::Integer32 => Self::Integer32(cursor.read_i32::<LittleEndian>()?),
            PropertyType::Floating32 => Self::Floating32(cursor.read_f32::<LittleEndian>()?),
            PropertyType::Floating64 => Self::Floating64(cursor.read_f64::<LittleEndian>()?),
            PropertyType::Currency => Self::Currency(cursor.read_i64::<LittleEndian>()?),
            PropertyType::FloatingTime => {
                Self::FloatingTime(cursor.read_f64::<LittleEndian>()?)
            }
            PropertyType::ErrorCode => Self::ErrorCode(cursor.read_u32::<LittleEndian>()?),
            PropertyType::Boolean => match cursor.read_u32::<LittleEndian>()? {
                1 => Self::Boolean(true),
                0 => Self::Boolean(false),
                invalid => {
                    warn!(value = invalid, "PtypBoolean is neither 0 nor 1");
                    return Err(LtpError::InvalidBoolean(invalid));
                }
            },
            PropertyType::Integer64 => Self::Integer64(cursor.read_i64::<LittleEndian>()?),
            PropertyType::String8 => Self::String8(decode_string8(data)),
            PropertyType::Unicode => Self::Unicode(decode_unicode(data)),
            PropertyType::Time => {
                Self::Time(decode_time(cursor.read_i64::<LittleEndian>()?, time_zone)?)
            }
            PropertyType::Guid => match <&[u8; Guid::SIZE]>::try_from(data) {
                Ok(guid) => Self::Guid(Guid::from_bytes(guid)),
                Err(_) => {
                    warn!(size = data.len(), "PtypGuid is not 16 bytes, using PtypBinary");
                    Self::Binary(data.to_vec())
                }
            },
            PropertyType::Binary => Self::Binary(data.to_vec()),

            PropertyType::MultipleInteger16 => Self::MultipleInteger16(
                fixed_values(prop_type, data, 2)?
                    .map(LittleEndian::read_i16)
                    .collect(),
            ),
            PropertyType::MultipleInteger32 => Self::MultipleInteger32(
                fixed_values(prop_type, data, 4)?
                    .map(LittleEndian::read_i32)
                    .collect(),
            ),
            PropertyType::MultipleFloating32 => Self::MultipleFloating32(
                fixed_values(prop_type, data, 4)?
                    .map(LittleEndian::read_f32)
                    .collect(),
            ),
            PropertyType::MultipleFloating64 => Self::MultipleFloating64(
                fixed_values(prop_type, data, 8)?
                    .map(LittleEndian::read_f64)
                    .collect(),
            ),
            PropertyType::MultipleCurrency => Self::MultipleCurrency(
                fixed_values(prop_type, data, 8)?
                    .map(LittleEndian::read_i64)
                    .collect(),
            ),
            PropertyType::MultipleFloatingTime => Self::MultipleFloatingTime(
                fixed_values(prop_type, data, 8)?
                    .map(LittleEndian::read_f64)
                    .collect(),
            ),
            PropertyType::MultipleInteger64 => Self::MultipleInteger64(
                fixed_values(prop_type, data, 8)?
                    .map(LittleEndian::read_i64)
                    .collect(),
            ),
            PropertyType::MultipleTime => Self::MultipleTime(
                fixed_values(prop_type, data, 8)?
                    .map(|value| decode_time(LittleEndian::read_i64(value), time_zone))
                    .collect::<LtpResult<_>>()?,
            ),
            PropertyType::MultipleGuid => Self::MultipleGuid(
                fixed_values(prop_type, data, Guid::SIZE)?
                    .filter_map(|value| <&[u8; Guid::SIZE]>::try_from(value).ok())
                    .map(Guid::from_bytes)
                    .collect(),
            ),
            PropertyType::MultipleString8 => Self::MultipleString8(
                variable_values(data)?
                    .into_iter()
                    .map(decode_string8)
                    .collect(),
            ),
            PropertyType::MultipleUnicode => Self::MultipleUnicode(
                variable_values(data)?
                    .into_iter()
                    .map(decode_unicode)
                    .collect(),
            ),
            PropertyType::MultipleBinary => Self::MultipleBinary(
                variable_values(data)?
                    .into_iter()
                    .map(<[u8]>::to_vec)
                    .collect(),
            ),

            PropertyType::Object
            | PropertyType::ServerId
            | PropertyType::Restriction
            | PropertyType::RuleAction => {
                return Err(LtpError::UnsupportedPropertyType(prop_type));
            }
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Unicode(value) | Self::String8(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(value) => Some(value),
            _ => None,
        }
    }
}

/// Convert a `PtypTime` tick count to an instant in `time_zone`.
pub fn decode_time(ticks: i64, time_zone: &FixedOffset) -> LtpResult<DateTime<FixedOffset>> {
    let unix_ticks = ticks
        .checked_sub(FILETIME_UNIX_EPOCH)
        .ok_or(LtpError::InvalidTime(ticks))?;
    let seconds = unix_ticks.div_euclid(FILETIME_TICKS_PER_SECOND);
    let nanos = unix_ticks.rem_euclid(FILETIME_TICKS_PER_SECOND) * 100;
    let time = DateTime::from_timestamp(seconds, nanos as u32).ok_or(LtpError::InvalidTime(ticks))?;
    Ok(time.with_timezone(time_zone))
}

/// UTF-16LE up to the first NUL, invalid sequences replaced with U+FFFD.
fn decode_unicode(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// 8-bit characters up to the first NUL, each byte taken as its Latin-1 code point.
fn decode_string8(data: &[u8]) -> String {
    data.iter()
        .take_while(|byte| **byte != 0)
        .map(|byte| char::from(*byte))
        .collect()
}

fn fixed_values(
    prop_type: PropertyType,
    data: &[u8],
    size: usize,
) -> LtpResult<std::slice::ChunksExact<'_, u8>> {
    if data.len() % size != 0 {
        return Err(LtpError::InvalidPropertyValueSize {
            prop_type,
            size: data.len(),
        });
    }
    Ok(data.chunks_exact(size))
}

/// Split a variable-size multi-valued buffer: `ulCount`, `ulCount` offsets, then the values.
fn variable_values(data: &[u8]) -> LtpResult<Vec<&[u8]>> {
    let mut cursor = Cursor::new(data);
    let count = cursor.read_u32::<LittleEndian>()?;

    let header_size = 4_u64 + 4 * u64::from(count);
    if header_size > data.len() as u64 {
        return Err(LtpError::InvalidMultiValueOffset(count));
    }

    let offsets = (0..count)
        .map(|_| cursor.read_u32::<LittleEndian>())
        .collect::<Result<Vec<_>, _>>()?;

    let end = data.len() as u32;
    offsets
        .iter()
        .enumerate()
        .map(|(index, start)| {
            let next = offsets.get(index + 1).copied().unwrap_or(end);
            if u64::from(*start) < header_size || next < *start || next > end {
                return Err(LtpError::InvalidMultiValueOffset(*start));
            }
            Ok(&data[*start as usize..next as usize])
        })
        .collect()
}
