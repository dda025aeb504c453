//! Commit-reveal secret handling.
//!
//! The server publishes SHA3-512(server_secret) up front and keeps the raw
//! value in the ledger. The client secret starts random and is evolved by
//! every tracked message in the show thread, so nobody (server included)
//! can steer a pick without the audience's messages cooperating.

use limelight_rand::digest::sha3_hex;

/// Fresh 16-byte hex secret from OS randomness.
pub fn random_secret() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// Public commitment to a secret.
pub fn commitment(secret: &str) -> String {
    sha3_hex(secret)
}

/// Evolve the client secret with one thread message. The message id is part
/// of the input so identical texts still produce distinct evolutions.
pub fn evolve_client_secret(current: &str, message_id: &str, text: &str) -> String {
    sha3_hex(&format!("{current}{message_id}{text}"))
}

/// Sampling seed for a pick: client secret then server secret, concatenated.
pub fn seed(client_secret: &str, server_secret: &str) -> String {
    format!("{client_secret}{server_secret}")
}

/// Fingerprint stored with each pick so seed reuse is detectable.
pub fn seed_fingerprint(seed: &str) -> String {
    sha3_hex(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_secrets_are_32_hex_chars_and_distinct() {
        let a = random_secret();
        let b = random_secret();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn evolution_is_deterministic_and_order_sensitive() {
        let start = "aabbccdd";
        let one = evolve_client_secret(start, "M1", "hello");
        let two = evolve_client_secret(&one, "M2", "world");

        assert_eq!(one, evolve_client_secret(start, "M1", "hello"));
        assert_ne!(one, two);

        // Swapping the message order changes the end state.
        let swapped = evolve_client_secret(&evolve_client_secret(start, "M2", "world"), "M1", "hello");
        assert_ne!(two, swapped);
    }

    #[test]
    fn message_id_distinguishes_identical_texts() {
        let start = "aabbccdd";
        assert_ne!(
            evolve_client_secret(start, "M1", "same"),
            evolve_client_secret(start, "M2", "same"),
        );
    }

    #[test]
    fn commitment_matches_digest_of_secret() {
        let secret = "00ff00ff";
        assert_eq!(commitment(secret), sha3_hex(secret));
        assert_eq!(commitment(secret).len(), 128);
    }
}
