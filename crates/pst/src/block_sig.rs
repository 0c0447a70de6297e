//! ## [Block Signature](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/e700a913-9db5-46a4-ac76-37cabea823e1)

/// Compute the `wSig` of a block from its file offset (`ib`) and `bid`.
pub fn compute_sig(index: u64, block_id: u64) -> u16 {
    let value = index ^ block_id;
    (value >> 16) as u16 ^ (value as u16)
}
