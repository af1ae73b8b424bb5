// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Nix-flavoured base32 encoding.
//!
//! Nix renders hashes with a 32-character alphabet that omits `e`, `o`, `u`
//! and `t` (to avoid accidental words) and emits digits in reverse bit
//! order compared to RFC 4648. Indirect garbage-collector roots are named
//! by the base32 rendering of a digest, so the encoding must match Nix
//! byte for byte.

// omitted: E O U T
const BASE32_CHARS: &[u8] = b"0123456789abcdfghijklmnpqrsvwxyz";

/// Encode `bytes` as a nix-base32 string.
pub fn nix_base32_encode(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let len = (bytes.len() * 8 - 1) / 5 + 1;
    let mut out = Vec::with_capacity(len);

    for n in (0..len).rev() {
        let b = n * 5;
        let i = b / 8;
        let j = b % 8;
        let mut v = bytes[i] >> j;
        if j > 3 && i + 1 < bytes.len() {
            v |= bytes[i + 1] << (8 - j);
        }
        out.push(BASE32_CHARS[(v & 0x1f) as usize]);
    }

    // Infallible: every byte comes from BASE32_CHARS.
    String::from_utf8(out).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(nix_base32_encode(b""), "");
    }

    /// Matches `nix-hash --type sha1 --to-base32` output for the
    /// corresponding digests.
    #[test]
    fn test_known_digests() {
        // sha1("abc")
        let sha1_abc: [u8; 20] = [
            0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
            0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d,
        ];
        assert_eq!(
            nix_base32_encode(&sha1_abc),
            "kpcd173cq987hw957sx6m0868wv3x6d9"
        );
    }

    #[test]
    fn test_length() {
        // 20-byte digests (160 bits) encode to 32 characters.
        assert_eq!(nix_base32_encode(&[0u8; 20]).len(), 32);
        assert_eq!(nix_base32_encode(&[0xff; 20]).len(), 32);
    }
}
