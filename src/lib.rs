//! iPusnas Core
//!
//! Acquires borrowed iPusnas books and unlocks them into plain PDF or EPUB
//! files, one folder per title.
//!
//! ```no_run
//! use ipusnas_core::{AcquisitionManager, AppConfig, PusnasClient, TokenStore, UnconfiguredDeriver};
//! use std::sync::Arc;
//!
//! # async fn example() -> ipusnas_core::Result<()> {
//! let config = AppConfig::load(None)?;
//! let session = Arc::new(TokenStore::new(&config.token_path));
//! let catalog = Arc::new(PusnasClient::new(&config)?);
//! // Swap in the service's key derivation scheme to unlock DRM books
//! let deriver = Arc::new(UnconfiguredDeriver);
//! let manager = AcquisitionManager::new(&config, session, catalog, deriver)?;
//!
//! let (on_progress, mut events) = ipusnas_core::progress_channel();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event.display_string());
//!     }
//! });
//!
//! let book = manager.acquire("12345", &on_progress).await?;
//! println!("{}", book.path.display());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod crypto;
pub mod download;
pub mod error;
pub mod file;
pub mod models;

pub use api::{
    BookDetail, BorrowAuthorization, BorrowedBook, CatalogService, PusnasClient, Session,
    SessionProvider, TokenStore,
};
pub use config::AppConfig;
pub use crypto::{
    ContainerUnwrapper, DerivationInput, DerivedSecrets, FixtureDeriver, KeyDeriver,
    PasswordRemover, QpdfRemover, UnconfiguredDeriver,
};
pub use download::{
    progress_channel, AcquiredBook, AcquisitionManager, ContentFetcher, ProgressCallback,
    ProgressEvent, ProgressStage,
};
pub use error::{PipelineStage, PusnasError, Result};
pub use file::{LibraryScanner, LocalBook};
pub use models::{BookIdentity, BorrowGrant};
