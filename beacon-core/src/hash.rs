//! Hash primitive
//!
//! A deterministic 160-bit digest (the classic 80-round SHA-1 schedule)
//! rendered as 40 lowercase hex characters. It partitions cookie names by
//! domain and derives visitor identifiers; nothing in this crate relies on it
//! for security.
//!
//! ```rust
//! use beacon_core::hash::digest;
//!
//! assert_eq!(digest(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
//! assert_eq!(digest("abc").len(), 40);
//! ```

/// Initial register values
const H_INIT: [u32; 5] = [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476, 0xC3D2_E1F0];

/// Block size in bytes
const BLOCK_LEN: usize = 64;

/// Digest an arbitrary byte string into 40 lowercase hex characters.
///
/// Strings are hashed as their UTF-8 bytes.
pub fn digest(input: impl AsRef<[u8]>) -> String {
    hex::encode(digest_bytes(input.as_ref()))
}

/// Digest into the raw 20-byte form.
pub fn digest_bytes(input: &[u8]) -> [u8; 20] {
    let mut state = H_INIT;

    for block in pad(input).chunks_exact(BLOCK_LEN) {
        compress(&mut state, block);
    }

    let mut out = [0u8; 20];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// Append the terminal bit, zero-fill to 448 mod 512 bits, then the
/// 64-bit big-endian bit length.
fn pad(input: &[u8]) -> Vec<u8> {
    let bit_len = (input.len() as u64).wrapping_mul(8);

    let mut message = Vec::with_capacity(input.len() + BLOCK_LEN + 8);
    message.extend_from_slice(input);
    message.push(0x80);
    while message.len() % BLOCK_LEN != BLOCK_LEN - 8 {
        message.push(0);
    }
    message.extend_from_slice(&bit_len.to_be_bytes());
    message
}

fn compress(state: &mut [u32; 5], block: &[u8]) {
    let mut w = [0u32; 80];

    for (i, word) in block.chunks_exact(4).enumerate() {
        w[i] = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    }
    for i in 16..80 {
        w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
    }

    let [mut a, mut b, mut c, mut d, mut e] = *state;

    for (i, word) in w.iter().enumerate() {
        let (f, k) = match i {
            0..=19 => ((b & c) | (!b & d), 0x5A82_7999),
            20..=39 => (b ^ c ^ d, 0x6ED9_EBA1),
            40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1B_BCDC),
            _ => (b ^ c ^ d, 0xCA62_C1D6),
        };

        let temp = a
            .rotate_left(5)
            .wrapping_add(f)
            .wrapping_add(e)
            .wrapping_add(k)
            .wrapping_add(*word);
        e = d;
        d = c;
        c = b.rotate_left(30);
        b = a;
        a = temp;
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
    state[4] = state[4].wrapping_add(e);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn reference(input: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(input);
        hex::encode(hasher.finalize())
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(digest(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(digest("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            digest("The quick brown fox jumps over the lazy dog"),
            "2fd4e1c67a2d28fced849ee1bb76e7391b93eb12"
        );
    }

    #[test]
    fn test_padding_boundaries_match_reference() {
        // 55/56/63/64/65 bytes straddle the one- and two-block padding cases
        for len in [0usize, 1, 55, 56, 57, 63, 64, 65, 119, 120, 128, 1000] {
            let input = vec![b'x'; len];
            assert_eq!(digest(&input), reference(&input), "length {len}");
        }
    }

    #[test]
    fn test_utf8_input() {
        let input = "crème brûlée – 日本語";
        assert_eq!(digest(input), reference(input.as_bytes()));
    }

    #[test]
    fn test_output_shape() {
        for input in ["", "a", "example.com/", "Mozilla/5.0 (X11; Linux x86_64)"] {
            let hex = digest(input);
            assert_eq!(hex.len(), 40);
            assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            assert_eq!(hex, digest(input));
        }
    }
}
