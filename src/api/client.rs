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


//! HTTP client for the iPusnas API
//!
//! # Endpoints
//! - `POST /api/auth/login` with `{email, password}`
//! - `GET /api/webhook/book-detail?book_id=`
//! - `GET /api/webhook/check-borrow-status?book_id=`
//! - `GET /api/webhook/book-borrow-shelf`
//!
//! Every response wraps its payload in `{"data": ...}`. Authenticated calls
//! send `Authorization: Bearer <access_token>`.
//!
//! No retries: any failure is returned as `UpstreamError` and the caller
//! decides.

use crate::api::{
    flexible_bool, string_or_number, BookDetail, BorrowAuthorization, BorrowedBook,
    CatalogService, Session,
};
use crate::config::AppConfig;
use crate::error::{PusnasError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const LOGIN_ENDPOINT: &str = "/api/auth/login";
const BOOK_DETAIL_ENDPOINT: &str = "/api/webhook/book-detail";
const BORROW_STATUS_ENDPOINT: &str = "/api/webhook/check-borrow-status";
const BORROW_SHELF_ENDPOINT: &str = "/api/webhook/book-borrow-shelf";

/// Longest error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Response of the login endpoint, stored as-is in the token file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub data: LoginData,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// User part of the login response
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginData {
    pub access_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl LoginData {
    pub fn session(&self) -> Session {
        Session::new(self.access_token.clone(), self.id.clone())
    }

    /// Display name or email, whichever the service sent
    pub fn display_name(&self) -> Option<&str> {
        ["name", "fullname", "email"]
            .iter()
            .find_map(|key| self.extra.get(*key).and_then(Value::as_str))
    }
}

impl std::fmt::Debug for LoginData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginData")
            .field("access_token", &"<redacted>")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookDetailData {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    book_title: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    using_drm: bool,
    #[serde(default)]
    file_ext: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BorrowStatusData {
    url_file: String,
    #[serde(default)]
    borrow_key: String,
    epustaka: Epustaka,
}

#[derive(Debug, Deserialize)]
struct Epustaka {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// iPusnas API client
#[derive(Debug, Clone)]
pub struct PusnasClient {
    client: Client,
    base_url: String,
}

impl PusnasClient {
    /// Create a client from configuration (base URL, user agent, timeout)
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.request_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self::with_client(client, &config.api_base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Log in with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let request = self
            .client
            .post(self.url(LOGIN_ENDPOINT))
            .json(&LoginRequest { email, password });

        let response: LoginResponse = self.send(request, LOGIN_ENDPOINT).await?;
        info!(user_id = %response.data.id, "logged in");
        Ok(response)
    }

    /// List the user's currently borrowed books
    pub async fn borrowed_books(&self, session: &Session) -> Result<Vec<BorrowedBook>> {
        let request = self.authorized(session, BORROW_SHELF_ENDPOINT);
        let envelope: Envelope<Vec<BorrowedBook>> = self.send(request, BORROW_SHELF_ENDPOINT).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorized(&self, session: &Session, endpoint: &str) -> RequestBuilder {
        self.client
            .get(self.url(endpoint))
            .bearer_auth(&session.access_token)
    }

    async fn fetch_data<T>(&self, session: &Session, endpoint: &str, book_id: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = self
            .authorized(session, endpoint)
            .query(&[("book_id", book_id)]);
        let envelope: Envelope<T> = self.send(request, endpoint).await?;

        envelope.data.ok_or_else(|| {
            PusnasError::upstream(
                envelope
                    .message
                    .unwrap_or_else(|| format!("No data for book {}", book_id)),
                None,
                Some(endpoint.to_string()),
            )
        })
    }

    async fn send<T>(&self, request: RequestBuilder, endpoint: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        debug!(endpoint, "api request");
        let response = request.send().await.map_err(|e| {
            PusnasError::upstream(
                format!("Request failed: {}", e.without_url()),
                None,
                Some(endpoint.to_string()),
            )
        })?;

        if response.status().is_success() {
            self.handle_success_response(response, endpoint).await
        } else {
            self.handle_error_response(response, endpoint).await
        }
    }

    /// Parse a successful response body
    async fn handle_success_response<T>(&self, response: Response, endpoint: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            PusnasError::upstream(
                format!("Failed to read response body: {}", e.without_url()),
                Some(status.as_u16()),
                Some(endpoint.to_string()),
            )
        })?;

        serde_json::from_str::<T>(&body).map_err(|e| {
            PusnasError::upstream(
                format!("Invalid response: {}", e),
                Some(status.as_u16()),
                Some(endpoint.to_string()),
            )
        })
    }

    /// Turn an error response into `UpstreamError`
    async fn handle_error_response<T>(&self, response: Response, endpoint: &str) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // Prefer the service's own message when the body is JSON
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect());

        Err(PusnasError::upstream(
            format!("API request failed ({}): {}", status, message.trim()),
            Some(status.as_u16()),
            Some(endpoint.to_string()),
        ))
    }
}

#[async_trait]
impl CatalogService for PusnasClient {
    async fn book_detail(&self, session: &Session, book_id: &str) -> Result<BookDetail> {
        let data: BookDetailData = self
            .fetch_data(session, BOOK_DETAIL_ENDPOINT, book_id)
            .await?;

        Ok(BookDetail {
            id: data.id,
            title: data.book_title.unwrap_or_default(),
            uses_drm: data.using_drm,
            file_ext: data.file_ext,
        })
    }

    async fn borrow_authorization(
        &self,
        session: &Session,
        book_id: &str,
    ) -> Result<BorrowAuthorization> {
        let data: BorrowStatusData = self
            .fetch_data(session, BORROW_STATUS_ENDPOINT, book_id)
            .await?;

        Ok(BorrowAuthorization {
            file_url: data.url_file,
            borrow_key: data.borrow_key,
            library_partner_id: data.epustaka.id,
        })
    }
}
