use rand::Rng;
use sha2::{Digest, Sha256};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a uniformly random short code over `[a-zA-Z0-9]` of the given
/// length. Keyspace at length 6 is 62^6 ≈ 5.68e10 (§3 Invariant 5).
pub fn generate_short_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Extract the short code from a redirect request path per §4.5 step 1:
/// strip one leading `/`, truncate at the next `/`.
pub fn extract_short_code(path: &str) -> &str {
    let stripped = path.strip_prefix('/').unwrap_or(path);
    match stripped.find('/') {
        Some(idx) => &stripped[..idx],
        None => stripped,
    }
}

/// Deterministic weak unique-visitor key: lowercase hex SHA-256 of
/// `ip_address || user_agent`.
pub fn hash_visitor(ip_address: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip_address.as_bytes());
    hasher.update(user_agent.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_has_requested_length_and_charset() {
        for _ in 0..200 {
            let code = generate_short_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn extract_short_code_matches_spec_table() {
        assert_eq!(extract_short_code("/abc/def"), "abc");
        assert_eq!(extract_short_code("/"), "");
        assert_eq!(extract_short_code("/abc"), "abc");
        assert_eq!(extract_short_code("/abc/"), "abc");
    }

    #[test]
    fn hash_visitor_is_deterministic() {
        let a = hash_visitor("1.2.3.4", "curl/8.0");
        let b = hash_visitor("1.2.3.4", "curl/8.0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn hash_visitor_matches_raw_sha256() {
        let mut hasher = Sha256::new();
        hasher.update(b"1.2.3.4curl/8.0");
        let expected: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(hash_visitor("1.2.3.4", "curl/8.0"), expected);
    }

    #[test]
    fn hash_visitor_differs_for_different_inputs() {
        assert_ne!(
            hash_visitor("1.2.3.4", "curl/8.0"),
            hash_visitor("1.2.3.5", "curl/8.0")
        );
    }
}
