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


//! iPusnas catalog and session access
//!
//! The acquisition pipeline only sees the two traits defined here:
//! - [`SessionProvider`]: who is logged in
//! - [`CatalogService`]: book metadata and borrow authorizations
//!
//! [`client::PusnasClient`] and [`auth::TokenStore`] are the HTTP and
//! token-file implementations.

pub mod auth;
pub mod client;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// Re-export commonly used types
pub use auth::TokenStore;
pub use client::{LoginData, LoginResponse, PusnasClient};

/// Logged-in user
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Catalog metadata of one book
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookDetail {
    pub id: String,
    pub title: String,
    pub uses_drm: bool,
    /// Declared file extension, as sent by the service
    pub file_ext: Option<String>,
}

/// Permission to download one borrowed book
#[derive(Clone, PartialEq, Eq)]
pub struct BorrowAuthorization {
    pub file_url: String,
    pub borrow_key: String,
    /// Lending library ("epustaka") id
    pub library_partner_id: String,
}

impl fmt::Debug for BorrowAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowAuthorization")
            .field("file_url", &self.file_url.split('?').next().unwrap_or_default())
            .field("borrow_key", &"<redacted>")
            .field("library_partner_id", &self.library_partner_id)
            .finish()
    }
}

/// Entry of the user's borrow shelf
///
/// Only the id and title are interpreted; everything else the service sends
/// is kept in `extra` and passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowedBook {
    #[serde(deserialize_with = "string_or_number")]
    pub book_id: String,
    #[serde(default)]
    pub book_title: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Source of the current session
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// `Ok(None)` when nobody is logged in
    async fn session(&self) -> Result<Option<Session>>;
}

/// Remote catalog lookups. Failures surface as `UpstreamError`.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn book_detail(&self, session: &Session, book_id: &str) -> Result<BookDetail>;

    async fn borrow_authorization(
        &self,
        session: &Session,
        book_id: &str,
    ) -> Result<BorrowAuthorization>;
}

/// Ids arrive as numbers or strings depending on the endpoint
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Flags arrive as booleans, 0/1, or strings
pub(crate) fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().map_or(false, |v| v != 0.0)),
        Value::String(s) => Ok(matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean flag, got {}",
            other
        ))),
    }
}
