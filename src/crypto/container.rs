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


//! Password-protected container unwrapping
//!
//! Wrapped downloads are zip archives whose entries are encrypted with the
//! per-book container password. Two shapes exist:
//!
//! - **Package**: has a `mimetype` entry. Every entry is decrypted on its own
//!   and the whole set is re-packed, unencrypted, into `<book_id>.epub`.
//!   Entries that fail are logged and left out.
//! - **Flat**: one payload. The entry whose name contains the book id (or
//!   the only entry) is decrypted to `<book_id>.<ext>`, where `.moco` and
//!   missing extensions become `.pdf`.
//!
//! Outputs go to the staging directory through a partial file and a rename.
//! The container is deleted once its payload is in place.

use crate::error::{PusnasError, Result};
use crate::file::manager::FileManager;
use crate::file::paths::{extension_of, partial_path, DEFAULT_EXTENSION};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Marker entry of package-shaped containers
pub const PACKAGE_MARKER_ENTRY: &str = "mimetype";

/// Extension used for re-packed package containers
const PACKAGE_EXTENSION: &str = "epub";

/// Entry extension that actually holds PDF data
const MOCO_EXTENSION: &str = "moco";

/// Layout of a wrapped container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerShape {
    Package,
    Flat,
}

/// Unwraps containers into the staging directory
#[derive(Debug, Clone)]
pub struct ContainerUnwrapper {
    staging_dir: PathBuf,
}

impl ContainerUnwrapper {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Decrypt the payload of `container_path` and return the plaintext path.
    ///
    /// # Errors
    /// - `CorruptArchive` if the file is not a readable zip
    /// - `EntryNotFound` if a flat container has no entry for `book_id`
    /// - `DecryptionFailed` if the payload (or, for packages, every file
    ///   entry) cannot be decrypted
    pub async fn unwrap_container(
        &self,
        container_path: &Path,
        container_password: &str,
        book_id: &str,
    ) -> Result<PathBuf> {
        let container = container_path.to_path_buf();
        let password = container_password.to_string();
        let book_id_owned = book_id.to_string();
        let staging_dir = self.staging_dir.clone();

        let output = tokio::task::spawn_blocking(move || {
            unwrap_blocking(&container, password.as_bytes(), &book_id_owned, &staging_dir)
        })
        .await
        .map_err(|e| PusnasError::internal(format!("Unwrap task failed: {}", e)))??;

        FileManager::remove_quietly(container_path).await;
        info!(book_id = %book_id, output = %output.display(), "container unwrapped");
        Ok(output)
    }
}

/// Shape of an opened archive
pub fn container_shape<R: Read + std::io::Seek>(archive: &ZipArchive<R>) -> ContainerShape {
    if archive.file_names().any(|name| name == PACKAGE_MARKER_ENTRY) {
        ContainerShape::Package
    } else {
        ContainerShape::Flat
    }
}

/// Output extension for a flat entry name
fn flat_output_extension(entry_name: &str) -> String {
    match extension_of(Path::new(entry_name)) {
        Some(ext) if ext == MOCO_EXTENSION => DEFAULT_EXTENSION.to_string(),
        Some(ext) => ext,
        None => DEFAULT_EXTENSION.to_string(),
    }
}

fn unwrap_blocking(
    container: &Path,
    password: &[u8],
    book_id: &str,
    staging_dir: &Path,
) -> Result<PathBuf> {
    let corrupt = |e: &dyn std::fmt::Display| PusnasError::CorruptArchive {
        path: container.to_path_buf(),
        message: e.to_string(),
    };

    let file = File::open(container).map_err(|e| corrupt(&e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(&e))?;

    std::fs::create_dir_all(staging_dir).map_err(|e| PusnasError::write_error(staging_dir, e))?;

    let shape = container_shape(&archive);
    debug!(
        container = %container.display(),
        entries = archive.len(),
        ?shape,
        "opened container"
    );

    match shape {
        ContainerShape::Package => {
            let output = staging_dir.join(format!("{}.{}", book_id, PACKAGE_EXTENSION));
            repack_package(&mut archive, password, container, &output)?;
            Ok(output)
        }
        ContainerShape::Flat => extract_flat(&mut archive, password, book_id, container, staging_dir),
    }
}

/// Buffer size for streaming a flat payload out of the archive
const EXTRACT_BUFF_SZ: usize = 64 * 1024;

/// Open one entry, decrypting it if it is encrypted, and hand it to `f`.
///
/// Failing to open the entry is reported as `DecryptionFailed` for `name`.
fn with_entry<R, T, F>(
    archive: &mut ZipArchive<R>,
    index: usize,
    name: &str,
    password: &[u8],
    f: F,
) -> Result<T>
where
    R: Read + std::io::Seek,
    F: FnOnce(&mut dyn Read) -> Result<T>,
{
    let encrypted = archive
        .by_index_raw(index)
        .map_err(|e| PusnasError::decryption_failed(name, e))?
        .encrypted();

    let mut entry = if encrypted {
        archive.by_index_decrypt(index, password)
    } else {
        archive.by_index(index)
    }
    .map_err(|e| PusnasError::decryption_failed(name, e))?;

    f(&mut entry)
}

/// Read a whole (package) entry into memory
fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    name: &str,
    password: &[u8],
) -> Result<Vec<u8>> {
    with_entry(archive, index, name, password, |reader| {
        // Header sizes are not trusted for preallocation
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| PusnasError::decryption_failed(name, e))?;
        Ok(data)
    })
}

/// Stream `reader` into `path`; read errors are decryption failures
fn copy_entry(reader: &mut dyn Read, name: &str, path: &Path) -> Result<u64> {
    let file = File::create(path).map_err(|e| PusnasError::write_error(path, e))?;
    let mut writer = BufWriter::with_capacity(EXTRACT_BUFF_SZ, file);
    let mut buf = vec![0u8; EXTRACT_BUFF_SZ];
    let mut copied = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PusnasError::decryption_failed(name, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| PusnasError::write_error(path, e))?;
        copied += n as u64;
    }

    let file = writer
        .into_inner()
        .map_err(|e| PusnasError::write_error(path, e.error()))?;
    file.sync_all().map_err(|e| PusnasError::write_error(path, e))?;
    Ok(copied)
}

struct EntryInfo {
    index: usize,
    name: String,
    is_dir: bool,
    compression: CompressionMethod,
}

fn list_entries<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    container: &Path,
) -> Result<Vec<EntryInfo>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| PusnasError::CorruptArchive {
                path: container.to_path_buf(),
                message: e.to_string(),
            })?;
        entries.push(EntryInfo {
            index,
            name: entry.name().to_string(),
            is_dir: entry.is_dir(),
            compression: entry.compression(),
        });
    }
    Ok(entries)
}

fn repack_package<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    password: &[u8],
    container: &Path,
    output: &Path,
) -> Result<()> {
    let mut entries = list_entries(archive, container)?;
    // Readers expect the marker as the first, uncompressed entry
    entries.sort_by_key(|e| e.name != PACKAGE_MARKER_ENTRY);

    let partial = partial_path(output);
    let result = (|| -> Result<()> {
        let file = File::create(&partial).map_err(|e| PusnasError::write_error(&partial, e))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let zip_write_error = |e: &dyn std::fmt::Display| PusnasError::write_error(output, e);

        let mut content_written = 0usize;
        let mut skipped = Vec::new();

        for entry in &entries {
            if entry.is_dir {
                writer
                    .add_directory(entry.name.as_str(), SimpleFileOptions::default())
                    .map_err(|e| zip_write_error(&e))?;
                continue;
            }

            let data = match read_entry(archive, entry.index, &entry.name, password) {
                Ok(data) => data,
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "skipping entry that failed to decrypt");
                    skipped.push(entry.name.clone());
                    continue;
                }
            };

            let compression = if entry.name == PACKAGE_MARKER_ENTRY
                || entry.compression == CompressionMethod::Stored
            {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            let options = SimpleFileOptions::default().compression_method(compression);

            writer
                .start_file(entry.name.as_str(), options)
                .map_err(|e| zip_write_error(&e))?;
            writer.write_all(&data).map_err(|e| zip_write_error(&e))?;
            if entry.name != PACKAGE_MARKER_ENTRY {
                content_written += 1;
            }
        }

        // A marker on its own is not a book
        if content_written == 0 {
            return Err(PusnasError::decryption_failed(
                container.display().to_string(),
                format!("no content entry could be decrypted ({} skipped)", skipped.len()),
            ));
        }
        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), content_written, "package re-packed with missing entries");
        }

        let mut inner = writer.finish().map_err(|e| zip_write_error(&e))?;
        inner.flush().map_err(|e| zip_write_error(&e))?;
        drop(inner);

        std::fs::rename(&partial, output).map_err(|e| PusnasError::write_error(output, e))
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn extract_flat<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    password: &[u8],
    book_id: &str,
    container: &Path,
    staging_dir: &Path,
) -> Result<PathBuf> {
    let files: Vec<EntryInfo> = list_entries(archive, container)?
        .into_iter()
        .filter(|e| !e.is_dir)
        .collect();

    let entry = files
        .iter()
        .find(|e| e.name.contains(book_id))
        .or(if files.len() == 1 { files.first() } else { None })
        .ok_or_else(|| PusnasError::EntryNotFound {
            book_id: book_id.to_string(),
            entry_count: files.len(),
        })?;

    let output = staging_dir.join(format!("{}.{}", book_id, flat_output_extension(&entry.name)));
    let partial = partial_path(&output);
    let result = with_entry(archive, entry.index, &entry.name, password, |reader| {
        copy_entry(reader, &entry.name, &partial)
    })
    .and_then(|bytes| {
        std::fs::rename(&partial, &output)
            .map(|_| bytes)
            .map_err(|e| PusnasError::write_error(&output, e))
    });

    match result {
        Ok(bytes) => {
            debug!(entry = %entry.name, bytes, "extracted flat entry");
            Ok(output)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::unstable::write::FileOptionsExt;
    use std::io::Cursor;

    const PASSWORD: &str = "container-secret";

    /// Build a zip; each entry is `(name, data, password)`, `None` = plain
    fn build_zip(path: &Path, entries: &[(&str, &[u8], Option<&str>)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, data, password) in entries {
            let mut options = SimpleFileOptions::default();
            if let Some(password) = password {
                options = options.with_deprecated_encryption(password.as_bytes());
            }
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
        let bytes = std::fs::read(path).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn test_flat_output_extension() {
        assert_eq!(flat_output_extension("123.moco"), "pdf");
        assert_eq!(flat_output_extension("123.EPUB"), "epub");
        assert_eq!(flat_output_extension("123"), "pdf");
    }

    #[tokio::test]
    async fn test_flat_container_maps_moco_to_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("Book.mdrm");
        build_zip(
            &container,
            &[
                ("readme.txt", b"noise", Some(PASSWORD)),
                ("files/4711.moco", b"%PDF-1.4 body", Some(PASSWORD)),
            ],
        );

        let unwrapper = ContainerUnwrapper::new(dir.path().join("temp"));
        let output = unwrapper
            .unwrap_container(&container, PASSWORD, "4711")
            .await
            .unwrap();

        assert_eq!(output, dir.path().join("temp").join("4711.pdf"));
        assert_eq!(std::fs::read(&output).unwrap(), b"%PDF-1.4 body");
        assert!(!container.exists());
    }

    #[tokio::test]
    async fn test_flat_single_entry_without_match() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("c.mdrm");
        build_zip(&container, &[("payload.epub", b"epub-bytes", Some(PASSWORD))]);

        let output = ContainerUnwrapper::new(dir.path())
            .unwrap_container(&container, PASSWORD, "99")
            .await
            .unwrap();
        assert_eq!(output.file_name().unwrap(), "99.epub");
    }

    #[tokio::test]
    async fn test_flat_entry_not_found_keeps_container() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("c.mdrm");
        build_zip(
            &container,
            &[("a.pdf", b"a", Some(PASSWORD)), ("b.pdf", b"b", Some(PASSWORD))],
        );

        let err = ContainerUnwrapper::new(dir.path())
            .unwrap_container(&container, PASSWORD, "99")
            .await
            .unwrap_err();
        assert!(matches!(err, PusnasError::EntryNotFound { entry_count: 2, .. }));
        assert!(container.exists());
    }

    #[tokio::test]
    async fn test_flat_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("c.mdrm");
        build_zip(&container, &[("7.moco", &[42u8; 4096], Some(PASSWORD))]);

        let err = ContainerUnwrapper::new(dir.path())
            .unwrap_container(&container, "wrong", "7")
            .await
            .unwrap_err();
        assert!(matches!(err, PusnasError::DecryptionFailed { .. }));
        assert!(!dir.path().join("7.pdf").exists());
    }

    #[tokio::test]
    async fn test_package_repacked_with_marker_first() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("Novel.mdrm");
        build_zip(
            &container,
            &[
                ("OEBPS/content.opf", b"<package/>", Some(PASSWORD)),
                ("mimetype", b"application/epub+zip", Some(PASSWORD)),
                ("OEBPS/broken.xhtml", b"<html>lost</html>", Some("other-password")),
                ("OEBPS/ch1.xhtml", b"<html>one</html>", Some(PASSWORD)),
            ],
        );

        let output = ContainerUnwrapper::new(dir.path().join("temp"))
            .unwrap_container(&container, PASSWORD, "555")
            .await
            .unwrap();

        assert_eq!(output, dir.path().join("temp").join("555.epub"));
        let entries = read_zip(&output);
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["mimetype", "OEBPS/content.opf", "OEBPS/ch1.xhtml"]);
        assert_eq!(entries[0].1, b"application/epub+zip");
        assert_eq!(entries[2].1, b"<html>one</html>");

        let bytes = std::fs::read(&output).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let marker = archive.by_index(0).unwrap();
        assert_eq!(marker.compression(), CompressionMethod::Stored);
        assert!(!marker.encrypted());
        assert!(!container.exists());
    }

    #[tokio::test]
    async fn test_package_all_entries_fail() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("Novel.mdrm");
        build_zip(
            &container,
            &[
                ("mimetype", b"application/epub+zip", Some(PASSWORD)),
                ("OEBPS/ch1.xhtml", b"<html>one</html>", Some(PASSWORD)),
            ],
        );

        let err = ContainerUnwrapper::new(dir.path())
            .unwrap_container(&container, "wrong", "555")
            .await
            .unwrap_err();
        assert!(matches!(err, PusnasError::DecryptionFailed { .. }));
        assert!(!dir.path().join("555.epub").exists());
        assert!(container.exists());
    }

    #[tokio::test]
    async fn test_package_with_only_plain_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("Novel.mdrm");
        build_zip(
            &container,
            &[
                ("mimetype", b"application/epub+zip", None),
                ("OEBPS/content.opf", b"<package/>", Some("service-password")),
                ("OEBPS/ch1.xhtml", b"<html>one</html>", Some("service-password")),
            ],
        );

        let err = ContainerUnwrapper::new(dir.path().join("temp"))
            .unwrap_container(&container, PASSWORD, "556")
            .await
            .unwrap_err();

        assert!(matches!(err, PusnasError::DecryptionFailed { .. }));
        assert!(!dir.path().join("temp").join("556.epub").exists());
        assert!(container.exists());
    }

    #[tokio::test]
    async fn test_flat_entry_streams_large_payload() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("Big.mdrm");
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
        build_zip(&container, &[("88.moco", &payload, Some(PASSWORD))]);

        let output = ContainerUnwrapper::new(dir.path().join("temp"))
            .unwrap_container(&container, PASSWORD, "88")
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), payload);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("temp"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("junk.mdrm");
        std::fs::write(&container, b"definitely not a zip").unwrap();

        let err = ContainerUnwrapper::new(dir.path())
            .unwrap_container(&container, PASSWORD, "1")
            .await
            .unwrap_err();
        assert!(matches!(err, PusnasError::CorruptArchive { .. }));
    }
}
