// API keys for programmatic access
// Decision: keys are prefixed with "gw_" for identification
// Decision: the full key is shown only once at creation; only the SHA-256
// hash touches the database

use rand::Rng;
use sha2::{Digest, Sha256};

/// API key prefix for identification
pub const API_KEY_PREFIX: &str = "gw_";
const API_KEY_BYTES: usize = 32; // 256 bits = 64 hex chars

/// Generated API key (full key shown only at creation)
#[derive(Debug)]
pub struct GeneratedApiKey {
    /// Full key (gw_<random>)
    pub key: String,
    /// SHA-256 hash for database storage
    pub key_hash: String,
}

/// Generate a new API key
pub fn generate_api_key() -> GeneratedApiKey {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..API_KEY_BYTES).map(|_| rng.gen()).collect();
    let key = format!("{}{}", API_KEY_PREFIX, hex::encode(&random_bytes));
    let key_hash = hash_api_key(&key);

    GeneratedApiKey { key, key_hash }
}

/// Hash an API key for storage and lookup
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Cheap shape check before hitting the database
pub fn is_valid_api_key_format(key: &str) -> bool {
    let Some(key_part) = key.strip_prefix(API_KEY_PREFIX) else {
        return false;
    };
    key_part.len() == API_KEY_BYTES * 2 && key_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_valid_format() {
        let key = generate_api_key();
        assert!(key.key.starts_with(API_KEY_PREFIX));
        assert!(is_valid_api_key_format(&key.key));
        assert_eq!(key.key_hash, hash_api_key(&key.key));
    }

    #[test]
    fn keys_are_unique() {
        let one = generate_api_key();
        let two = generate_api_key();
        assert_ne!(one.key, two.key);
        assert_ne!(one.key_hash, two.key_hash);
    }

    #[test]
    fn format_check_rejects_garbage() {
        assert!(!is_valid_api_key_format("gw_1234"));
        assert!(!is_valid_api_key_format(
            "sk_0000000000000000000000000000000000000000000000000000000000000000"
        ));
        assert!(!is_valid_api_key_format(
            "gw_gggggggggggggggggggggggggggggggggggggggggggggggggggggggggggggggg"
        ));
    }

    #[test]
    fn hashing_is_deterministic() {
        let key = "gw_00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff";
        assert_eq!(hash_api_key(key), hash_api_key(key));
    }
}
