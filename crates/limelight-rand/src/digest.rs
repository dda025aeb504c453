use sha3::{Digest, Sha3_512};

/// SHA3-512 of a UTF-8 string, hex encoded. The one hash function used for
/// sampler derivation, ledger chaining, and secret commitments.
pub fn sha3_hex(text: &str) -> String {
    let mut hasher = Sha3_512::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA3-512 of raw bytes, hex encoded.
pub fn sha3_hex_bytes(data: &[u8]) -> String {
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_is_stable_and_512_bits() {
        let a = sha3_hex("limelight");
        let b = sha3_hex("limelight");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        assert_ne!(a, sha3_hex("limelight "));
    }

    #[test]
    fn str_and_byte_digests_agree() {
        assert_eq!(sha3_hex("seed"), sha3_hex_bytes(b"seed"));
    }
}
