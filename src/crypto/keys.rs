// iPusnas Core - Borrowed e-book acquisition and unlocking
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Per-book key and password derivation
//!
//! # Inputs
//! - User id (from the session)
//! - Book id
//! - Library partner id (the lending library)
//! - Borrow key (from the borrow authorization)
//!
//! # Outputs
//! - Content key
//! - PDF owner/user password (fed to the password remover)
//! - Container entry password (for wrapped archives)
//!
//! The service's real scheme plugs in through [`KeyDeriver`]; none ships
//! with this crate. [`FixtureDeriver`] is a SHA-256 construction with the same
//! shape for tests and fixture content. It does not unlock real books.
//! [`UnconfiguredDeriver`] refuses every derivation.
//!
//! Secrets are never logged. `Debug` on [`DerivationInput`] and
//! [`DerivedSecrets`] is redacted.

use crate::error::{PusnasError, Result};
use crate::models::BookIdentity;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain separation labels
const CONTENT_KEY_LABEL: &[u8] = b"content-key";
const PDF_PASSWORD_LABEL: &[u8] = b"pdf-password";
const CONTAINER_PASSWORD_LABEL: &[u8] = b"container-password";

/// Length of the hex PDF password
const PDF_PASSWORD_LEN: usize = 32;

/// Identifiers a derivation is computed from
#[derive(Clone, PartialEq, Eq)]
pub struct DerivationInput<'a> {
    pub user_id: &'a str,
    pub book_id: &'a str,
    pub library_partner_id: &'a str,
    pub borrow_key: &'a str,
}

impl<'a> DerivationInput<'a> {
    pub fn new(identity: &'a BookIdentity, borrow_key: &'a str) -> Self {
        Self {
            user_id: &identity.user_id,
            book_id: &identity.book_id,
            library_partner_id: &identity.library_partner_id,
            borrow_key,
        }
    }

    /// Reject empty values and values with whitespace or control characters
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("user id", self.user_id),
            ("book id", self.book_id),
            ("library partner id", self.library_partner_id),
            ("borrow key", self.borrow_key),
        ];

        for (name, value) in fields {
            if value.is_empty() {
                return Err(PusnasError::DerivationError(format!("{} is empty", name)));
            }
            if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(PusnasError::DerivationError(format!(
                    "{} contains whitespace or control characters",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DerivationInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivationInput")
            .field("user_id", &self.user_id)
            .field("book_id", &self.book_id)
            .field("library_partner_id", &self.library_partner_id)
            .field("borrow_key", &"<redacted>")
            .finish()
    }
}

/// Secrets for one book. In memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedSecrets {
    pub content_key: String,
    pub pdf_password: String,
    pub container_password: String,
}

impl fmt::Debug for DerivedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedSecrets")
            .field("content_key", &"<redacted>")
            .field("pdf_password", &"<redacted>")
            .field("container_password", &"<redacted>")
            .finish()
    }
}

/// Deterministic, pure derivation of per-book secrets
pub trait KeyDeriver: Send + Sync {
    fn derive(&self, input: &DerivationInput<'_>) -> Result<DerivedSecrets>;
}

/// Deriver used when no scheme has been configured.
///
/// Every call fails with `ConfigurationError`, so protected books stop at the
/// derive stage instead of being tried with made-up passwords.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredDeriver;

impl KeyDeriver for UnconfiguredDeriver {
    fn derive(&self, input: &DerivationInput<'_>) -> Result<DerivedSecrets> {
        Err(PusnasError::ConfigurationError(format!(
            "book {} is DRM protected and no key derivation scheme is configured",
            input.book_id
        )))
    }
}

/// SHA-256 derivation for tests and fixture content. Not the service's scheme.
///
/// ```text
/// content_key        = hex(SHA256("content-key" 0 user 0 book 0 partner 0 borrow_key))
/// pdf_password       = hex(SHA256("pdf-password" 0 content_key))[..32]
/// container_password = base64url(SHA256("container-password" 0 content_key))
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureDeriver;

impl FixtureDeriver {
    pub fn new() -> Self {
        Self
    }
}

impl KeyDeriver for FixtureDeriver {
    fn derive(&self, input: &DerivationInput<'_>) -> Result<DerivedSecrets> {
        input.validate()?;

        let content_key = hex::encode(labelled_digest(
            CONTENT_KEY_LABEL,
            &[
                input.user_id,
                input.book_id,
                input.library_partner_id,
                input.borrow_key,
            ],
        ));

        let mut pdf_password = hex::encode(labelled_digest(PDF_PASSWORD_LABEL, &[&content_key]));
        pdf_password.truncate(PDF_PASSWORD_LEN);

        let container_password =
            URL_SAFE_NO_PAD.encode(labelled_digest(CONTAINER_PASSWORD_LABEL, &[&content_key]));

        Ok(DerivedSecrets {
            content_key,
            pdf_password,
            container_password,
        })
    }
}

fn labelled_digest(label: &[u8], parts: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    hasher.finalize().into()
}
