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


//! Progress events and reporting
//!
//! # Progress Information
//! - Percentage complete (0 - 100, whole numbers)
//! - Human readable status line
//! - Pipeline stage the event belongs to
//! - Bytes received / total bytes while downloading
//! - Result filename once known
//!
//! Within one acquisition percentages never go down. 100 is reached once by
//! the fetch (or straight away on a cache hit) and every later stage reports
//! at 100.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Stage an event was emitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Downloading (or reusing) the staged artifact
    Fetching,
    /// Computing per-book secrets
    Deriving,
    /// Extracting the wrapped container
    Unwrapping,
    /// Removing the document password
    Decrypting,
    /// Result is in place
    Complete,
}

/// One progress update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percentage: u8,
    pub status: String,
    pub stage: ProgressStage,
    /// Total bytes (0 if unknown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Bytes received so far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, percentage: u8, status: impl Into<String>) -> Self {
        Self {
            percentage: percentage.min(100),
            status: status.into(),
            stage,
            total: None,
            current: None,
            filename: None,
        }
    }

    /// Event at 100%
    pub fn done(stage: ProgressStage, status: impl Into<String>) -> Self {
        Self::new(stage, 100, status)
    }

    pub fn with_bytes(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Format bytes as human-readable string (e.g., "45.2 MB")
    pub fn bytes_string(bytes: u64) -> String {
        let mb = bytes as f64 / 1_000_000.0;
        format!("{:.1} MB", mb)
    }

    /// Format event as a single display line
    pub fn display_string(&self) -> String {
        match (self.current, self.total) {
            (Some(current), Some(total)) if total > 0 => format!(
                "{:>3}% {} ({} / {})",
                self.percentage,
                self.status,
                Self::bytes_string(current),
                Self::bytes_string(total)
            ),
            _ => format!("{:>3}% {}", self.percentage, self.status),
        }
    }
}

/// Callback type for progress updates
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Callback that drops every event
pub fn noop() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Callback that forwards events into a channel.
///
/// Dropping the receiver only stops observation; the pipeline keeps going.
pub fn progress_channel() -> (ProgressCallback, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (callback, rx)
}

/// Byte-level progress of one streamed download
///
/// Chunk updates are capped at 99 so that 100 is only reported by
/// [`FetchProgress::finished`], after the file is flushed and in place.
#[derive(Debug)]
pub struct FetchProgress {
    total_bytes: Option<u64>,
    bytes_received: u64,
    last_percentage: u8,
}

impl FetchProgress {
    /// `total_bytes` of `None` or `Some(0)` means unknown length
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            total_bytes: total_bytes.filter(|t| *t > 0),
            bytes_received: 0,
            last_percentage: 0,
        }
    }

    /// First event of a fresh download
    pub fn started(&self) -> ProgressEvent {
        ProgressEvent::new(ProgressStage::Fetching, 0, "Starting download...")
            .with_bytes(0, self.total_bytes.unwrap_or(0))
    }

    /// Record a chunk. Returns an event when the percentage moved.
    pub fn advance(&mut self, chunk_len: u64) -> Option<ProgressEvent> {
        self.bytes_received += chunk_len;
        let total = self.total_bytes?;

        let ratio = self.bytes_received as f64 / total as f64;
        let percentage = ((ratio * 100.0).round() as u64).min(99) as u8;
        if percentage <= self.last_percentage {
            return None;
        }
        self.last_percentage = percentage;

        Some(
            ProgressEvent::new(ProgressStage::Fetching, percentage, "Downloading...")
                .with_bytes(self.bytes_received, total),
        )
    }

    /// Final event, once the download is in place
    pub fn finished(&self) -> ProgressEvent {
        ProgressEvent::done(ProgressStage::Fetching, "Download successful.")
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_progress_caps_and_dedupes() {
        let mut progress = FetchProgress::new(Some(1000));
        assert_eq!(progress.started().percentage, 0);

        assert!(progress.advance(4).is_none()); // rounds to 0
        assert_eq!(progress.advance(6).unwrap().percentage, 1);
        assert!(progress.advance(1).is_none());

        let event = progress.advance(489).unwrap();
        assert_eq!(event.percentage, 50);
        assert_eq!(event.current, Some(500));
        assert_eq!(event.total, Some(1000));

        assert_eq!(progress.advance(500).unwrap().percentage, 99);
        assert!(progress.advance(0).is_none());
        assert_eq!(progress.finished().percentage, 100);
    }

    #[test]
    fn test_fetch_progress_unknown_length() {
        let mut progress = FetchProgress::new(Some(0));
        assert!(progress.advance(1024).is_none());
        assert!(progress.advance(1024).is_none());
        assert_eq!(progress.bytes_received(), 2048);
        assert_eq!(progress.started().total, Some(0));
    }

    #[test]
    fn test_display_string() {
        let event = ProgressEvent::new(ProgressStage::Fetching, 42, "Downloading...")
            .with_bytes(2_500_000, 5_000_000);
        assert_eq!(event.display_string(), " 42% Downloading... (2.5 MB / 5.0 MB)");
        assert_eq!(
            ProgressEvent::done(ProgressStage::Complete, "Done.").display_string(),
            "100% Done."
        );
    }

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ProgressEvent::done(ProgressStage::Decrypting, "x")).unwrap();
        assert_eq!(json["stage"], "decrypting");
        assert!(json.get("total").is_none());
    }

    #[tokio::test]
    async fn test_progress_channel_survives_dropped_receiver() {
        let (callback, mut rx) = progress_channel();
        callback(ProgressEvent::new(ProgressStage::Fetching, 0, "a"));
        assert_eq!(rx.recv().await.unwrap().status, "a");

        drop(rx);
        callback(ProgressEvent::done(ProgressStage::Complete, "b"));
    }
}
