//! Bit-level access to report buffers.
//!
//! Bits are numbered from the least significant bit of byte 0 upward, so a
//! field starting at bit offset 12 takes the high nibble of byte 1 as its
//! lowest bits. Fields may straddle any number of byte boundaries.

/// Extract `bits` (at most 32) bits starting at bit `offset`.
///
/// Fields that reach past the end of `buf` decode to zero.
pub fn get_bits(buf: &[u8], offset: usize, bits: usize) -> u32 {
    if bits == 0 || bits > 32 || offset + bits > buf.len() * 8 {
        return 0;
    }

    let mut value = 0u32;
    let mut byte_offset = offset / 8;
    let mut bit_offset = offset % 8;
    let mut remaining = bits;

    while remaining > 0 {
        let available = 8 - bit_offset;
        let take = available.min(remaining);
        let mask = (0xffu16 >> (8 - take)) as u8;
        let chunk = (buf[byte_offset] >> bit_offset) & mask;
        value |= (chunk as u32) << (bits - remaining);

        remaining -= take;
        byte_offset += 1;
        bit_offset = 0;
    }

    value
}

/// Store the low `bits` (at most 32) bits of `value` at bit `offset`.
///
/// Bits outside the field are left untouched. Writes reaching past the end
/// of `buf` are ignored.
pub fn set_bits(buf: &mut [u8], offset: usize, bits: usize, value: u32) {
    if bits == 0 || bits > 32 || offset + bits > buf.len() * 8 {
        return;
    }

    let mut byte_offset = offset / 8;
    let mut bit_offset = offset % 8;
    let mut written = 0;

    while written < bits {
        let take = (8 - bit_offset).min(bits - written);
        let mask = ((0xffu16 >> (8 - take)) as u8) << bit_offset;
        let chunk = (((value >> written) as u8) << bit_offset) & mask;
        buf[byte_offset] = (buf[byte_offset] & !mask) | chunk;

        written += take;
        byte_offset += 1;
        bit_offset = 0;
    }
}

/// Copy `len` whole bytes starting at bit `offset` into `dest`.
///
/// Bytes beyond the end of `buf` read as zero.
pub fn get_bytes(buf: &[u8], offset: usize, dest: &mut [u8]) {
    for (i, byte) in dest.iter_mut().enumerate() {
        *byte = get_bits(buf, offset + i * 8, 8) as u8;
    }
}
