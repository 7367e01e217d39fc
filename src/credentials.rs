//! Credential generation for tenant databases.
//!
//! Names and passwords produced here are interpolated into autocommit DDL by
//! [`crate::engine::PostgresAdminEngine`], so their alphabets are restricted
//! to characters that never need quoting: `[a-z0-9_]` for names and
//! `[A-Za-z0-9]` for passwords.

use argon2::{
    Argon2,
    password_hash::{
        self, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;
use zeroize::Zeroizing;

pub const DATABASE_PREFIX: &str = "tenant_";
pub const ROLE_PREFIX: &str = "user_";
pub const PASSWORD_MIN_LEN: usize = 12;
pub const PASSWORD_MAX_LEN: usize = 16;

/// Hex characters kept from the 128-bit token.
const TOKEN_LEN: usize = 16;

/// Database and role names generated for one provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentifiers {
    pub database_name: String,
    pub role_name: String,
}

/// Generate a fresh `tenant_<token>` / `user_<token>` pair.
///
/// The token is a truncated random UUID. Uniqueness is enforced by the
/// metadata store; callers retry on conflict.
pub fn new_identifiers() -> TenantIdentifiers {
    let simple = Uuid::new_v4().simple().to_string();
    let token = &simple[..TOKEN_LEN];
    TenantIdentifiers {
        database_name: format!("{DATABASE_PREFIX}{token}"),
        role_name: format!("{ROLE_PREFIX}{token}"),
    }
}

/// Generate a random alphanumeric password of 12 to 16 characters.
pub fn new_password() -> Zeroizing<String> {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN);
    Zeroizing::new(
        (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect(),
    )
}

/// Hash a password for storage as an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

/// Check a plaintext password against a value produced by [`hash_password`].
///
/// Unparseable stored values never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::collections::HashSet;

    #[test]
    fn identifiers_use_safe_alphabet_and_shared_token() {
        let db_re = Regex::new(r"^tenant_[0-9a-f]+$").unwrap();
        let role_re = Regex::new(r"^user_[0-9a-f]+$").unwrap();

        for _ in 0..200 {
            let ids = new_identifiers();
            assert!(db_re.is_match(&ids.database_name), "{}", ids.database_name);
            assert!(role_re.is_match(&ids.role_name), "{}", ids.role_name);
            assert_eq!(
                ids.database_name.trim_start_matches(DATABASE_PREFIX),
                ids.role_name.trim_start_matches(ROLE_PREFIX)
            );
        }
    }

    #[test]
    fn identifiers_do_not_repeat() {
        let names: HashSet<_> = (0..1000).map(|_| new_identifiers().database_name).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn passwords_are_alphanumeric_and_bounded() {
        let mut lengths = HashSet::new();
        for _ in 0..500 {
            let password = new_password();
            assert!((PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password.len()));
            assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
            lengths.insert(password.len());
        }
        // 500 draws over 5 lengths
        assert_eq!(lengths.len(), PASSWORD_MAX_LEN - PASSWORD_MIN_LEN + 1);
    }

    #[test]
    fn hash_round_trips_and_rejects_wrong_password() {
        let stored = hash_password("Abcdef123456").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(!stored.contains("Abcdef123456"));
        assert!(verify_password("Abcdef123456", &stored));
        assert!(!verify_password("Abcdef123457", &stored));
        assert!(!verify_password("Abcdef123456", "plain$text"));
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(
            hash_password("samePassword1").unwrap(),
            hash_password("samePassword1").unwrap()
        );
    }
}
