//! Handshake transform for the `W` request
//!
//! Two accumulator passes over an 18-byte challenge: a reverse multiply-xor
//! chain, then a forward pass mixed with a fixed table. The reply is the
//! first 17 transformed bytes and is only produced when the final
//! accumulator is zero.

/// Challenge length
pub const CHALLENGE_LEN: usize = 18;
/// Reply length
pub const RESPONSE_LEN: usize = 17;

const TABLE: [u8; CHALLENGE_LEN] = [
    0xC4, 0x46, 0x14, 0xEF, 0x47, 0xFF, 0xC9, 0x8B, 0xDD, 0xAB, 0xFA, 0x28, 0x63, 0x3B, 0xB8,
    0x29, 0xE6, 0xCF,
];

/// Transforms `challenge`; `None` when its checksum does not vanish
pub fn respond(challenge: &[u8; CHALLENGE_LEN]) -> Option<[u8; RESPONSE_LEN]> {
    let mut buf = *challenge;

    let mut x: u8 = 5;
    for b in buf.iter_mut().rev() {
        x ^= b.wrapping_mul(11);
        *b = x;
    }

    x = 83;
    for (b, t) in buf.iter_mut().zip(TABLE) {
        x = (t ^ b.wrapping_mul(5)).wrapping_add(x.wrapping_mul(3));
        *b = x;
    }

    if x != 0 {
        return None;
    }
    let mut out = [0u8; RESPONSE_LEN];
    out.copy_from_slice(&buf[..RESPONSE_LEN]);
    Some(out)
}
