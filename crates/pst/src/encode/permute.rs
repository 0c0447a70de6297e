//! ## [Permutative Encoding](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5faf4800-645d-49d1-9457-2ac40eb467bd)
//!
//! Applied to the payload of data blocks only. Internal blocks and pages are stored in the clear.

use super::*;

/// Encode data block contents in place, for building encoded fixtures.
#[cfg(test)]
pub fn encode_block(data: &mut [u8]) {
    permute(data, key_data_r());
}

/// Decode data block contents in place.
pub fn decode_block(data: &mut [u8]) {
    permute(data, key_data_i());
}

fn permute(data: &mut [u8], table: &[u8; 256]) {
    for b in data.iter_mut() {
        *b = table[usize::from(*b)];
    }
}
