use byteorder::{BigEndian, ByteOrder};

/// Set bit `bit` of `x` on if `toggle` is true, otherwise off.
pub fn bit(bit: u32, x: u32, toggle: bool) -> u32 {
    if toggle {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(bit: u32, x: u32) -> bool {
    (x >> bit) & 1 == 1
}

/// Append `v` to `bytes` in network byte order.
pub fn put_u16(bytes: &mut Vec<u8>, v: u16) {
    let mut buf = [0; 2];
    BigEndian::write_u16(&mut buf, v);
    bytes.extend_from_slice(&buf);
}

pub fn put_u32(bytes: &mut Vec<u8>, v: u32) {
    let mut buf = [0; 4];
    BigEndian::write_u32(&mut buf, v);
    bytes.extend_from_slice(&buf);
}

pub fn put_u64(bytes: &mut Vec<u8>, v: u64) {
    let mut buf = [0; 8];
    BigEndian::write_u64(&mut buf, v);
    bytes.extend_from_slice(&buf);
}
