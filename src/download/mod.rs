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


//! Acquisition pipeline
//!
//! - [`stream`]: fetching artifacts into staging
//! - [`progress`]: progress events, callbacks and channels
//! - [`manager`]: the orchestrator that ties fetch, derivation, unwrapping
//!   and password removal together

pub mod manager;
pub mod progress;
pub mod stream;

// Re-export commonly used types
pub use manager::{AcquiredBook, AcquisitionManager};
pub use progress::{progress_channel, ProgressCallback, ProgressEvent, ProgressStage};
pub use stream::ContentFetcher;
