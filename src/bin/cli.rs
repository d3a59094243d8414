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


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ipusnas_core::api::auth::TokenStore;
use ipusnas_core::api::client::PusnasClient;
use ipusnas_core::download::progress::ProgressCallback;
use ipusnas_core::file::scanner::LibraryScanner;
use ipusnas_core::{AcquisitionManager, AppConfig, SessionProvider, UnconfiguredDeriver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ipusnas-cli")]
#[command(about = "Download and unlock borrowed iPusnas books", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and save the session token
    Login {
        /// Email address
        #[arg(short, long)]
        email: String,
        /// Password
        #[arg(short, long, env = "IPUSNAS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the saved session
    Logout,
    /// List borrowed books and whether they are already downloaded
    Shelf,
    /// List downloaded books
    Library,
    /// Download and unlock books by id
    Download {
        /// Book ids
        #[arg(required = true)]
        book_ids: Vec<String>,
    },
    /// Delete a downloaded book folder
    Remove {
        /// Folder name as shown by `library`
        folder: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("ipusnas_core=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let tokens = Arc::new(TokenStore::new(&config.token_path));

    match cli.command {
        Commands::Login { email, password } => {
            let client = PusnasClient::new(&config)?;
            let login = client.login(&email, &password).await?;
            tokens.save(&login).await?;
            println!(
                "Logged in as {}",
                login.data.display_name().unwrap_or(&login.data.id)
            );
        }
        Commands::Logout => {
            if tokens.clear().await? {
                println!("Logged out");
            } else {
                println!("No saved session");
            }
        }
        Commands::Shelf => {
            let Some(session) = tokens.session().await? else {
                bail!("Not logged in. Run `ipusnas-cli login` first.");
            };
            let client = PusnasClient::new(&config)?;
            let shelf = client.borrowed_books(&session).await?;
            let local = LibraryScanner::new(&config.books_dir).scan().await?;
            let entries = LibraryScanner::match_shelf(shelf, &local);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    let mark = if entry.is_local { "*" } else { " " };
                    println!("{} {:>10}  {}", mark, entry.book.book_id, entry.book.book_title);
                }
                println!("{} borrowed, * = downloaded", entries.len());
            }
        }
        Commands::Library => {
            let books = LibraryScanner::new(&config.books_dir).scan().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&books)?);
            } else {
                for book in &books {
                    println!("{:?}\t{}\t{}", book.format, book.title, book.path.display());
                }
            }
        }
        Commands::Download { book_ids } => {
            let client = Arc::new(PusnasClient::new(&config)?);
            // No key derivation scheme ships with the crate: DRM books stop at
            // the derive stage, plain books download as usual
            let manager =
                AcquisitionManager::new(&config, tokens, client, Arc::new(UnconfiguredDeriver))?;

            let results = manager
                .acquire_many(&book_ids, |book_id| -> ProgressCallback {
                    let book_id = book_id.to_string();
                    Arc::new(move |event| eprintln!("[{}] {}", book_id, event.display_string()))
                })
                .await;

            let mut failed = 0;
            for (book_id, result) in results {
                match result {
                    Ok(book) => println!("{}\t{}", book_id, book.path.display()),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}\tfailed: {}", book_id, e.user_message());
                        tracing::debug!(book_id = %book_id, error = ?e, "acquisition error detail");
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} books failed", failed, book_ids.len());
            }
        }
        Commands::Remove { folder } => {
            if LibraryScanner::new(&config.books_dir).remove_book(&folder).await? {
                println!("Removed {}", folder);
            } else {
                bail!("No such book folder: {}", folder);
            }
        }
    }

    Ok(())
}
