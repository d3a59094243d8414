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


//! Per-run book data
//!
//! Both types are assembled by the orchestrator from catalog responses and
//! live for one acquisition only.

use crate::api::{BookDetail, BorrowAuthorization, Session};
use serde::Serialize;
use std::fmt;

/// Identifiers of one book for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookIdentity {
    pub book_id: String,
    pub title: String,
    pub user_id: String,
    pub library_partner_id: String,
}

impl BookIdentity {
    pub fn new(session: &Session, detail: &BookDetail, grant: &BorrowAuthorization) -> Self {
        Self {
            book_id: detail.id.clone(),
            title: detail.title.clone(),
            user_id: session.user_id.clone(),
            library_partner_id: grant.library_partner_id.clone(),
        }
    }
}

/// Short-lived permission to fetch one book. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct BorrowGrant {
    pub file_url: String,
    pub borrow_key: String,
    pub uses_drm: bool,
    /// Extension the catalog declares for the file, lowercase without dot
    pub declared_extension: Option<String>,
}

impl BorrowGrant {
    pub fn new(detail: &BookDetail, grant: &BorrowAuthorization) -> Self {
        Self {
            file_url: grant.file_url.clone(),
            borrow_key: grant.borrow_key.clone(),
            uses_drm: detail.uses_drm,
            declared_extension: detail
                .file_ext
                .as_deref()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty()),
        }
    }
}

impl fmt::Debug for BorrowGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowGrant")
            .field("file_url", &self.file_url.split('?').next().unwrap_or_default())
            .field("borrow_key", &"<redacted>")
            .field("uses_drm", &self.uses_drm)
            .field("declared_extension", &self.declared_extension)
            .finish()
    }
}
