//! PKCS#7 padding over 32-byte blocks, as used by the callback cipher.
//!
//! AES itself works on 16-byte blocks; the callback protocol pads to 32 and
//! then runs CBC with no further padding.

pub const BLOCK_SIZE: usize = 32;

/// Append `n` bytes of value `n`, where `n = 32 - len % 32` (1..=32).
pub fn pad(data: &[u8]) -> Vec<u8> {
    let amount = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + amount);
    out.extend_from_slice(data);
    out.resize(data.len() + amount, amount as u8);
    out
}

/// Strip padding. An out-of-range trailing byte is treated as "no padding"
/// and the input is returned unchanged.
pub fn unpad(data: &[u8]) -> &[u8] {
    let Some(&last) = data.last() else {
        return data;
    };
    let amount = last as usize;
    if amount == 0 || amount > BLOCK_SIZE || amount > data.len() {
        return data;
    }
    &data[..data.len() - amount]
}
