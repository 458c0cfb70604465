//! Repeating-key XOR used by every Mozi sample to hide its config.
//!
//! Byte `i` of the ciphertext is `plain[i] ^ KEY[i % 16]`.  Each byte depends
//! only on its own index, so the transform is its own inverse and encrypt and
//! decrypt are the same call.

/// The hardcoded key shared by all known Mozi builds.
pub const MOZI_XOR_KEY: [u8; 16] = [
    0x4e,0x66,0x5a,0x8f, 0x80,0xc8,0xac,0x23,
    0x8d,0xac,0x47,0x06, 0xd5,0x4f,0x6f,0x7e,
];

/// XOR `data` with the key in place, starting at key index 0.
pub fn xor_in_place(data: &mut [u8]) {
    for (byte, k) in data.iter_mut().zip(MOZI_XOR_KEY.iter().cycle()) {
        *byte ^= k;
    }
}

/// Decrypt (or, equivalently, encrypt) `data` into a new buffer.
pub fn decrypt(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    xor_in_place(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_header_decrypts_to_ss_tag() {
        assert_eq!(decrypt(&[0x15, 0x15, 0x29, 0xd2]), b"[ss]".to_vec());
    }

    #[test]
    fn key_repeats_every_sixteen_bytes() {
        let zeros = [0u8; 40];
        let out = decrypt(&zeros);
        assert_eq!(&out[..16], &MOZI_XOR_KEY);
        assert_eq!(&out[16..32], &MOZI_XOR_KEY);
        assert_eq!(&out[32..], &MOZI_XOR_KEY[..8]);
    }

    #[test]
    fn empty_input_is_untouched() {
        assert!(decrypt(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn xor_is_self_inverse(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
            prop_assert_eq!(decrypt(&decrypt(&data)), data);
        }
    }
}
