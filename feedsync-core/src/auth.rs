//! Email and password sign-in
//!
//! Registration stores a salted SHA-256 hash of the password next to the
//! account's user id. Signing in looks the credential up by email and checks
//! the password against it; the resulting user id becomes the viewer identity.

use crate::registration::is_valid_email;
use crate::store::CredentialStore;
use crate::{FeedError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

/// Stored sign-in credential of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Account the credential signs in to
    pub user_id: String,
    /// Lowercased, trimmed email
    pub email: String,
    /// Random per-credential salt, hex
    pub salt: String,
    /// `sha256(salt || password)`, hex
    pub password_hash: String,
}

impl Credential {
    /// Hash `password` under a fresh salt
    pub fn new(user_id: impl Into<String>, email: &str, password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let password_hash = hash_password(&salt, password);
        Self {
            user_id: user_id.into(),
            email: normalize_email(email),
            salt,
            password_hash,
        }
    }

    /// Whether `password` matches
    pub fn verify(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }
}

/// Canonical form used to store and look up emails
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check an email and password, returning the account's user id
///
/// Form problems come back as [`FeedError::Validation`]; an unknown email or
/// a wrong password as [`FeedError::InvalidCredentials`], without saying which.
pub async fn sign_in(store: &dyn CredentialStore, email: &str, password: &str) -> Result<String> {
    let email = email.trim();
    if email.is_empty() || !is_valid_email(email) {
        return Err(FeedError::Validation(
            "Enter a valid email address.".to_string(),
        ));
    }
    if password.trim().is_empty() {
        return Err(FeedError::Validation("Enter your password.".to_string()));
    }

    match store.find(email).await? {
        Some(credential) if credential.verify(password) => {
            info!("Signed in as {}", credential.user_id);
            Ok(credential.user_id)
        }
        _ => {
            warn!("Failed sign-in for {}", normalize_email(email));
            Err(FeedError::InvalidCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCredentialStore;
    use tokio_test::assert_ok;

    #[test]
    fn test_verify() {
        let credential = Credential::new("u1", " Ana@Example.com ", "secret1");

        assert_eq!(credential.email, "ana@example.com");
        assert!(credential.verify("secret1"));
        assert!(!credential.verify("secret2"));
        assert!(!credential.password_hash.contains("secret1"));
    }

    #[test]
    fn test_salt_differs_per_credential() {
        let a = Credential::new("u1", "a@example.com", "secret1");
        let b = Credential::new("u2", "b@example.com", "secret1");

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.password_hash, b.password_hash);
    }

    #[tokio::test]
    async fn test_sign_in() {
        let store = InMemoryCredentialStore::new();
        store
            .put(Credential::new("u1", "ana@example.com", "secret1"))
            .await
            .unwrap();

        let user_id = assert_ok!(sign_in(&store, "ANA@example.com", "secret1").await);
        assert_eq!(user_id, "u1");

        assert!(matches!(
            sign_in(&store, "ana@example.com", "wrong-pw").await,
            Err(FeedError::InvalidCredentials)
        ));
        assert!(matches!(
            sign_in(&store, "nobody@example.com", "secret1").await,
            Err(FeedError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_sign_in_form_checks() {
        let store = InMemoryCredentialStore::new();

        match sign_in(&store, "not-an-email", "secret1").await {
            Err(FeedError::Validation(msg)) => assert_eq!(msg, "Enter a valid email address."),
            other => panic!("unexpected {:?}", other),
        }
        match sign_in(&store, "ana@example.com", "  ").await {
            Err(FeedError::Validation(msg)) => assert_eq!(msg, "Enter your password."),
            other => panic!("unexpected {:?}", other),
        }
    }
}
