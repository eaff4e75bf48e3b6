//! Container handle and id derivation

use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Prefix of every container id
pub const ID_PREFIX: &str = "c_";

/// Hex digits of the handle digest kept in an id
const ID_HASH_NIBBLES: usize = 15;

/// Produce a fresh random handle: 32 lowercase hex characters
pub fn generate_handle() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Derive the container id for a handle.
///
/// The id is `c_` followed by the uppercase hex of the first 60 bits of a
/// SHA-1 of the handle — deterministic, filesystem-safe, and short enough
/// for a local account name.
pub fn generate_id(handle: &str) -> String {
    let digest = Sha1::digest(handle.as_bytes());
    let hex = hex::encode_upper(digest);
    format!("{}{}", ID_PREFIX, &hex[..ID_HASH_NIBBLES])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_deterministic() {
        let first = generate_id("handle");
        let second = generate_id("handle");
        assert_eq!(first, second);

        // Known digest: SHA-1("handle") = a2dd7ec666aacd57...
        assert_eq!(first, "c_A2DD7EC666AACD5");
    }

    #[test]
    fn test_generate_id_shape() {
        for handle in ["a", "some-handle", "0123456789abcdef0123456789abcdef"] {
            let id = generate_id(handle);
            assert!(id.starts_with(ID_PREFIX));
            assert_eq!(id.len(), 17);
            assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_distinct_handles_get_distinct_ids() {
        assert_ne!(generate_id("one"), generate_id("two"));
        assert_eq!(generate_id("foo"), "c_0BEEC7B5EA3F0FD");
    }

    #[test]
    fn test_generate_handle_is_32_hex() {
        let handle = generate_handle();
        assert_eq!(handle.len(), 32);
        assert!(handle.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(generate_handle(), generate_handle());
    }
}
