use sha2::{Digest, Sha256};

/// Hex digest of `salt || value`. Used for stored credentials (account
/// passwords, household join secrets, verification codes) so nothing
/// secret ever lands in a table column in clear.
pub(crate) fn salted_sha256(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_depends_on_salt() {
        assert_ne!(salted_sha256("a", "pw"), salted_sha256("b", "pw"));
        assert_eq!(salted_sha256("a", "pw"), salted_sha256("a", "pw"));
    }
}
