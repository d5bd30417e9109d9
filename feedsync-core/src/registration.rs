//! Account registration
//!
//! Validates sign-up input and turns it into the profile document other
//! participants see.

use crate::{FeedError, Result, UserProfile};
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

/// Minimum password length accepted at sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9+_.\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok())
        .as_ref()
        .map(|pattern| pattern.is_match(email))
        .unwrap_or(false)
}

/// Sign-up form
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    /// Optional profile picture
    pub avatar_url: Option<String>,
}

impl Registration {
    /// Check the form
    ///
    /// Rules apply in order and the first failure is returned as
    /// [`FeedError::Validation`] with a user-facing message.
    pub fn validate(&self) -> Result<()> {
        let required = [
            self.name.trim(),
            self.phone.trim(),
            self.email.trim(),
            self.password.as_str(),
            self.confirm_password.as_str(),
        ];
        if required.iter().any(|field| field.is_empty()) {
            return Err(FeedError::Validation(
                "All fields except photo are required.".to_string(),
            ));
        }

        if !is_valid_email(self.email.trim()) {
            return Err(FeedError::Validation("Invalid email format.".to_string()));
        }

        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(FeedError::Validation(format!(
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            )));
        }

        if self.password != self.confirm_password {
            return Err(FeedError::Validation("Passwords do not match.".to_string()));
        }

        Ok(())
    }

    /// Validate and build the profile stored for `user_id`
    pub fn into_profile(self, user_id: impl Into<String>) -> Result<UserProfile> {
        self.validate()?;

        Ok(UserProfile {
            user_id: user_id.into(),
            display_name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
            avatar_url: self
                .avatar_url
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            created_at: Some(Utc::now()),
        })
    }
}
