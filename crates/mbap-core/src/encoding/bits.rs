//! Modbus bit packing: bit `i` lives in byte `i / 8`, least-significant bit first.

/// Number of bytes needed to carry `count` packed bits.
pub const fn packed_len(count: usize) -> usize {
    count.div_ceil(8)
}

/// Packs `values` into `out`, zero-padding the tail of the last byte.
///
/// `out` must hold at least [`packed_len`]`(values.len())` bytes; extra bytes are zeroed.
pub fn pack_bits(values: &[bool], out: &mut [u8]) {
    out.fill(0);
    for (i, value) in values.iter().enumerate() {
        if *value {
            out[i / 8] |= 1u8 << (i % 8);
        }
    }
}

/// Reads bit `index` from a packed byte slice.
pub fn bit_at(packed: &[u8], index: usize) -> Option<bool> {
    let byte = packed.get(index / 8)?;
    Some((byte & (1u8 << (index % 8))) != 0)
}
