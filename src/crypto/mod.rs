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


//! DRM removal
//!
//! # Steps
//! - **Derivation**: per-book content key and passwords ([`keys`])
//! - **Unwrapping**: password-protected zip containers ([`container`])
//! - **Password removal**: protected PDFs through qpdf ([`pdf`])

pub mod container;
pub mod keys;
pub mod pdf;

pub use container::{ContainerShape, ContainerUnwrapper};
pub use keys::{DerivationInput, DerivedSecrets, FixtureDeriver, KeyDeriver, UnconfiguredDeriver};
pub use pdf::{PasswordRemover, QpdfRemover};
