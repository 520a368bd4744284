//! Minimal ABI encoding helpers
//!
//! Calldata here is selector + 32-byte words, built by hand the same way the
//! balance reads do it. Only what the three adapters need; anything fancier
//! belongs in a real codegen layer.

use alloy::primitives::{Address, Bytes, U256};

pub type Word = [u8; 32];

/// selector + words -> calldata
pub fn encode_call(selector: [u8; 4], words: &[Word]) -> Bytes {
    let mut data = Vec::with_capacity(4 + words.len() * 32);
    data.extend_from_slice(&selector);
    for word in words {
        data.extend_from_slice(word);
    }
    Bytes::from(data)
}

pub fn word_address(addr: Address) -> Word {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    word
}

pub fn word_u256(value: U256) -> Word {
    value.to_be_bytes::<32>()
}

pub fn word_u64(value: u64) -> Word {
    word_u256(U256::from(value))
}

/// Signed 24-bit tick, sign-extended to a full word.
pub fn word_i24(value: i32) -> Word {
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut word = [fill; 32];
    word[28..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Reads the `index`-th 32-byte word of a return payload as U256.
pub fn decode_u256(data: &[u8], index: usize) -> Option<U256> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return None;
    }
    Some(U256::from_be_slice(&data[start..end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn encodes_selector_and_words() {
        let addr = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        let data = encode_call([0x70, 0xa0, 0x82, 0x31], &[word_address(addr)]);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
        // Address is right-aligned in its word
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], addr.as_slice());
    }

    #[test]
    fn negative_tick_sign_extends() {
        let word = word_i24(-887220);
        assert_eq!(word[0], 0xff);
        let positive = word_i24(887220);
        assert_eq!(positive[0], 0x00);
        assert_eq!(&positive[28..], &887220i32.to_be_bytes());
    }

    #[test]
    fn decode_u256_reads_words_in_order() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&word_u64(7));
        payload.extend_from_slice(&word_u64(9));
        assert_eq!(decode_u256(&payload, 0), Some(U256::from(7u64)));
        assert_eq!(decode_u256(&payload, 1), Some(U256::from(9u64)));
        assert_eq!(decode_u256(&payload, 2), None);
    }
}
