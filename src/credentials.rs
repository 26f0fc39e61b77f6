//! Account credential handling.
//!
//! The credential is loaded once at process start and re-used across login
//! retries. The raw secret never goes over the wire: the login form carries
//! a salted one-way hash instead.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct Credential {
    username: String,
    secret: SecretString,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The value submitted in place of the raw secret: the secret is
    /// uppercase-normalized, concatenated with the server-issued salt,
    /// digested with SHA-256 and rendered as uppercase hex.
    pub fn hashed_secret(&self, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.expose_secret().to_uppercase().as_bytes());
        hasher.update(salt.as_bytes());
        format!("{:X}", hasher.finalize())
    }

    /// Load from a JSON file with `username`/`password` keys.
    pub fn from_file(path: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        struct Stored {
            username: String,
            password: String,
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read account file {}", path.display()))?;
        let stored: Stored = serde_json::from_str(&text)
            .with_context(|| format!("parse account file {}", path.display()))?;
        Ok(Self::new(stored.username, stored.password))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
