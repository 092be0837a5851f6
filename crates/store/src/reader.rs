//! Read-side access to the stored hierarchy.
//!
//! Every stored document or blob may exist with or without a `.gz` suffix;
//! the reader probes both (favouring the uncompressed form) and
//! decompresses transparently, so callers never care which variant a
//! writer produced.

use crate::error::{StoreError, StoreResult};
use crate::stream::extract_part;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

/// A resolved on-disk file, after `.gz` probing.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    /// Path relative to the base directory, including any `.gz` suffix.
    pub relative: String,
    pub absolute: PathBuf,
    pub compressed: bool,
}

/// Kind of a scanned directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// One scanned entry; `name` is relative to the scanned directory and uses
/// `/` separators when the scan recursed.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Options for [`FileReader::scan_directory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub recursive: bool,
}

/// Payload extracted from a stored bulk-data file.
#[derive(Debug, Clone)]
pub struct BulkDataPart {
    pub payload: Bytes,
    /// The part's `Content-Type`, including any `transfer-syntax`
    /// parameter; `None` when the file was not multipart-framed.
    pub content_type: Option<String>,
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Reader rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FileReader {
    root: PathBuf,
}

impl FileReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checks whether `path/name` exists under either compression variant.
    ///
    /// The uncompressed form wins when both exist. Returns `None` when
    /// neither is present.
    pub async fn exists(&self, path: &str, name: &str) -> Option<ResolvedFile> {
        for (candidate, compressed) in Self::candidates(path, name) {
            let absolute = self.root.join(&candidate);
            if let Ok(meta) = tokio::fs::metadata(&absolute).await {
                if meta.is_file() {
                    return Some(ResolvedFile {
                        relative: candidate,
                        absolute,
                        compressed,
                    });
                }
            }
        }
        None
    }

    /// True when `path` resolves to a directory under the base.
    pub async fn dir_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.root.join(path))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    /// Opens a byte stream over the resolved file, decompressing
    /// transparently when the `.gz` variant was selected.
    pub async fn open_input_stream(
        &self,
        path: &str,
        name: &str,
    ) -> StoreResult<Box<dyn AsyncRead + Send + Unpin>> {
        let resolved = self.require(path, name).await?;
        if resolved.compressed {
            let raw = tokio::fs::read(&resolved.absolute).await?;
            let plain = gunzip(&raw)?;
            Ok(Box::new(std::io::Cursor::new(plain)))
        } else {
            let file = tokio::fs::File::open(&resolved.absolute).await?;
            Ok(Box::new(file))
        }
    }

    /// Reads and, when needed, decompresses the resolved file.
    pub async fn read_bytes(&self, path: &str, name: &str) -> StoreResult<Vec<u8>> {
        let resolved = self.require(path, name).await?;
        let raw = tokio::fs::read(&resolved.absolute).await?;
        if resolved.compressed {
            Ok(gunzip(&raw)?)
        } else {
            Ok(raw)
        }
    }

    /// Reads and parses a stored JSON document.
    ///
    /// # Errors
    ///
    /// `NotFound` when neither variant exists; `MalformedDocument` when the
    /// bytes do not parse.
    pub async fn read_json_document(
        &self,
        path: &str,
        name: &str,
    ) -> StoreResult<serde_json::Value> {
        let resolved = self.require(path, name).await?;
        let raw = tokio::fs::read(&resolved.absolute).await?;
        let bytes = if resolved.compressed { gunzip(&raw)? } else { raw };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::MalformedDocument {
            path: resolved.absolute.clone(),
            source,
        })
    }

    /// Like [`read_json_document`](Self::read_json_document), but an absent
    /// document yields `default` instead of `NotFound`. Parse failures
    /// still surface.
    pub async fn read_json_document_or(
        &self,
        path: &str,
        name: &str,
        default: serde_json::Value,
    ) -> StoreResult<serde_json::Value> {
        match self.read_json_document(path, name).await {
            Ok(value) => Ok(value),
            Err(StoreError::NotFound { .. }) => Ok(default),
            Err(err) => Err(err),
        }
    }

    /// Lists a directory. A non-existent directory yields an empty listing,
    /// not an error; entries that vanish mid-scan are skipped.
    pub async fn scan_directory(
        &self,
        path: &str,
        options: ScanOptions,
    ) -> StoreResult<Vec<ScanEntry>> {
        let mut entries = Vec::new();
        self.scan_into(path.to_owned(), String::new(), options, &mut entries)
            .await?;
        Ok(entries)
    }

    /// Reads a stored bulk-data/frame file and extracts the payload from
    /// its MIME part. Content that was not multipart-framed is returned
    /// whole with no content type.
    pub async fn read_bulkdata(&self, path: &str, name: &str) -> StoreResult<BulkDataPart> {
        let bytes = self.read_bytes(path, name).await?;
        match extract_part(&bytes) {
            Some(part) => Ok(BulkDataPart {
                payload: Bytes::copy_from_slice(&bytes[part.payload.clone()]),
                content_type: part.content_type,
            }),
            None => Ok(BulkDataPart {
                payload: Bytes::from(bytes),
                content_type: None,
            }),
        }
    }

    fn candidates(path: &str, name: &str) -> Vec<(String, bool)> {
        let join = |n: &str| {
            if path.is_empty() {
                n.to_owned()
            } else {
                format!("{path}/{n}")
            }
        };
        if name.ends_with(".gz") {
            vec![(join(name), true)]
        } else {
            vec![(join(name), false), (join(&format!("{name}.gz")), true)]
        }
    }

    async fn require(&self, path: &str, name: &str) -> StoreResult<ResolvedFile> {
        self.exists(path, name)
            .await
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_owned(),
                name: name.to_owned(),
            })
    }

    async fn scan_into(
        &self,
        path: String,
        prefix: String,
        options: ScanOptions,
        out: &mut Vec<ScanEntry>,
    ) -> StoreResult<()> {
        let dir = self.root.join(&path);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let mut pending_dirs = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let kind = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => EntryKind::Directory,
                Ok(ft) if ft.is_file() => EntryKind::File,
                Ok(_) => EntryKind::Other,
                Err(_) => continue,
            };
            let qualified = if prefix.is_empty() {
                name.to_owned()
            } else {
                format!("{prefix}/{name}")
            };
            if kind == EntryKind::Directory && options.recursive {
                pending_dirs.push((format!("{path}/{name}"), qualified.clone()));
            }
            out.push(ScanEntry {
                name: qualified,
                kind,
            });
        }
        for (sub_path, sub_prefix) in pending_dirs {
            Box::pin(self.scan_into(sub_path, sub_prefix, options, out)).await?;
        }
        Ok(())
    }
}
