use bcrypt::{hash, verify, DEFAULT_COST};

/// Hash a cleartext password for storage (used by embedders that keep a
/// password file rather than cleartext secrets).
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, DEFAULT_COST)
}

/// Constant-time-ish verification; malformed hashes simply fail.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    verify(password, hashed).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let hashed = hash_password("topsecret").unwrap();
        assert!(verify_password("topsecret", &hashed));
        assert!(!verify_password("other", &hashed));
    }

    #[test]
    fn malformed_hash_fails_closed() {
        assert!(!verify_password("x", "not-a-bcrypt-hash"));
    }
}
