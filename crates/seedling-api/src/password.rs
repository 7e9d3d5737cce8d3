//! Password hashing with PBKDF2-HMAC-SHA256.
//!
//! Stored form: `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`. The
//! iteration count travels with the hash, so raising the configured count
//! only affects new passwords.

use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let hash = derive(password, &salt, self.iterations);
        format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            hex::encode(salt),
            hex::encode(hash)
        )
    }

    /// Check `password` against a stored hash. Malformed hashes never match.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.split('$');
        let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        if scheme != SCHEME {
            return false;
        }
        let (Ok(iterations), Ok(salt), Ok(expected)) = (
            iterations.parse::<u32>(),
            hex::decode(salt),
            hex::decode(expected),
        ) else {
            return false;
        };
        if iterations == 0 || expected.len() != HASH_LEN {
            return false;
        }
        let actual = derive(password, &salt, iterations);
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hasher = PasswordHasher::new(10);
        let stored = hasher.hash("correct horse");

        assert!(stored.starts_with("pbkdf2-sha256$10$"));
        assert!(hasher.verify("correct horse", &stored));
        assert!(!hasher.verify("battery staple", &stored));
    }

    #[test]
    fn salts_differ() {
        let hasher = PasswordHasher::new(10);
        assert_ne!(hasher.hash("pw"), hasher.hash("pw"));
    }

    #[test]
    fn iteration_count_comes_from_stored_hash() {
        let stored = PasswordHasher::new(5).hash("pw");
        assert!(PasswordHasher::new(1000).verify("pw", &stored));
    }

    #[test]
    fn malformed_hashes_never_match() {
        let hasher = PasswordHasher::new(10);
        for stored in [
            "",
            "plain",
            "bcrypt$10$00$00",
            "pbkdf2-sha256$x$00$00",
            "pbkdf2-sha256$10$zz$00",
            "pbkdf2-sha256$10$00$00",
            "pbkdf2-sha256$0$00$00$extra",
        ] {
            assert!(!hasher.verify("pw", stored), "{stored}");
        }
    }
}
