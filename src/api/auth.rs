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


//! Session token persistence
//!
//! The login response is kept in a JSON file together with the time it was
//! saved. The file is written atomically and, on Unix, readable by the owner
//! only. It is not encrypted.

use crate::api::client::{LoginData, LoginResponse};
use crate::api::{Session, SessionProvider};
use crate::error::{PusnasError, Result};
use crate::file::manager::FileManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Contents of the token file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(flatten)]
    pub login: LoginResponse,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn user(&self) -> &LoginData {
        &self.login.data
    }
}

/// Token file at a fixed path
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a login response, replacing any previous one
    pub async fn save(&self, login: &LoginResponse) -> Result<()> {
        let stored = StoredToken {
            login: login.clone(),
            saved_at: Some(Utc::now()),
        };
        let json = serde_json::to_vec_pretty(&stored)?;
        FileManager::atomic_write_private(&self.path, &json).await?;

        info!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Read the token file.
    ///
    /// A missing or unreadable-as-JSON file means "not logged in"; other I/O
    /// failures are errors.
    pub async fn load(&self) -> Result<Option<StoredToken>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no token file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<StoredToken>(&bytes) {
            Ok(stored) if !stored.login.data.access_token.is_empty() => Ok(Some(stored)),
            Ok(_) => {
                warn!(path = %self.path.display(), "token file has an empty access token");
                Ok(None)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    /// Delete the token file. Returns `false` if there was none.
    pub async fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "session cleared");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PusnasError::write_error(&self.path, e)),
        }
    }
}

#[async_trait]
impl SessionProvider for TokenStore {
    async fn session(&self) -> Result<Option<Session>> {
        Ok(self.load().await?.map(|stored| stored.user().session()))
    }
}
