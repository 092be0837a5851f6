//! Output stream management at study/series/instance/frame granularity.
//!
//! A writer owns a registry of currently open streams keyed by
//! [`StreamKey`] (relative path + logical filename). Two bindings exist:
//! [`FileWriter`] assembles files on the local filesystem (temp file,
//! optional gzip, rename into place at close, with a close-time
//! classification of how the file changed relative to what was on disk at
//! open), and [`ResponseWriter`] emits each stream as one part of a single
//! outgoing multipart/related response.

use crate::error::{StoreError, StoreResult};
use crate::identity::IdentityCell;
use crate::stream::{MultipartFraming, SinkDestination, StreamSink};
use crate::{paths, uids};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::mpsc;

/// Identifies one open stream: relative resource path plus the logical
/// filename as requested (before any `.gz` suffix is applied).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub path: String,
    pub name: String,
}

impl StreamKey {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.path, self.name)
    }
}

/// Multipart framing requested for a stream.
#[derive(Debug, Clone)]
pub struct PartOptions {
    pub content_type: String,
    /// Defaults to the stream's logical filename.
    pub content_location: Option<String>,
}

/// Options for opening a stream.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Gzip-wrap everything written. Implied when the filename already
    /// carries a `.gz` suffix.
    pub gzip: bool,
    /// Wrap the payload in one MIME part.
    pub multipart: Option<PartOptions>,
}

impl OpenOptions {
    pub fn gzip() -> Self {
        Self {
            gzip: true,
            ..Self::default()
        }
    }

    pub fn multipart(content_type: impl Into<String>) -> Self {
        Self {
            gzip: false,
            multipart: Some(PartOptions {
                content_type: content_type.into(),
                content_location: None,
            }),
        }
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }
}

/// How a closed stream changed the file at its target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// No file existed at open; this stream created it.
    Created,
    /// A file existed and was replaced with different content.
    Updated,
    /// The freshly produced content is byte-equal to what is on disk; the
    /// stored file was left untouched.
    Identical,
    /// The target's modification time changed between open and close:
    /// another writer raced this one.
    UpdatedStale,
}

/// Result of closing a stream.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub status: CloseStatus,
    /// Relative path of the published file (with any `.gz` suffix), or the
    /// part location for response streams.
    pub path: String,
}

/// An open stream: the key for later close, and the sink to write through.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    pub key: StreamKey,
    pub sink: StreamSink,
}

/// Common writer surface shared by the file and response bindings.
///
/// The level-specific opens resolve the identity fields they need at call
/// time (not at writer construction), failing with `MissingIdentity` when a
/// field has not been populated yet.
pub trait ResourceWriter {
    fn identity(&self) -> &IdentityCell;

    fn open_stream(
        &self,
        path: &str,
        name: &str,
        options: OpenOptions,
    ) -> impl std::future::Future<Output = StoreResult<StreamHandle>> + Send;

    fn close_stream(
        &self,
        key: &StreamKey,
    ) -> impl std::future::Future<Output = StoreResult<CloseOutcome>> + Send;

    /// Discards an open stream without publishing anything.
    fn abort_stream(
        &self,
        key: &StreamKey,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;

    /// Closes every open stream, surfacing each outcome independently; one
    /// failing stream does not abort its siblings.
    fn close_all(
        &self,
    ) -> impl std::future::Future<Output = Vec<(StreamKey, StoreResult<CloseOutcome>)>> + Send;

    fn open_study_stream(
        &self,
        name: &str,
        options: OpenOptions,
    ) -> impl std::future::Future<Output = StoreResult<StreamHandle>> + Send
    where
        Self: Sync,
    {
        async move {
            let study = self.identity().require_study_uid()?;
            let path = paths::study_path(study.as_str(), None)?;
            self.open_stream(&path, name, options).await
        }
    }

    fn open_series_stream(
        &self,
        name: &str,
        options: OpenOptions,
    ) -> impl std::future::Future<Output = StoreResult<StreamHandle>> + Send
    where
        Self: Sync,
    {
        async move {
            let study = self.identity().require_study_uid()?;
            let series = self.identity().require_series_uid()?;
            let path = paths::series_path(study.as_str(), series.as_str(), None)?;
            self.open_stream(&path, name, options).await
        }
    }

    fn open_instance_stream(
        &self,
        name: &str,
        options: OpenOptions,
    ) -> impl std::future::Future<Output = StoreResult<StreamHandle>> + Send
    where
        Self: Sync,
    {
        async move {
            let study = self.identity().require_study_uid()?;
            let series = self.identity().require_series_uid()?;
            let sop = self.identity().require_sop_instance_uid()?;
            let path = paths::instance_path(study.as_str(), series.as_str(), sop.as_str(), None)?;
            self.open_stream(&path, name, options).await
        }
    }

    /// Opens the stream for one pixel frame (1-based), deriving the part
    /// content type and gzip policy from the transfer syntax: gzip applies
    /// only to uncompressed pixel encodings.
    fn open_frame_stream(
        &self,
        frame_number: u32,
    ) -> impl std::future::Future<Output = StoreResult<StreamHandle>> + Send
    where
        Self: Sync,
    {
        async move {
            let study = self.identity().require_study_uid()?;
            let series = self.identity().require_series_uid()?;
            let sop = self.identity().require_sop_instance_uid()?;
            let transfer_syntax = self.identity().require_transfer_syntax_uid()?;
            let path = paths::frames_path(study.as_str(), series.as_str(), sop.as_str())?;
            let name = format!("{frame_number}.mht");
            let options = OpenOptions {
                gzip: uids::lookup(transfer_syntax.as_str()).uncompressed,
                multipart: Some(PartOptions {
                    content_type: uids::frame_content_type(transfer_syntax.as_str()),
                    content_location: Some(name.clone()),
                }),
            };
            self.open_stream(&path, &name, options).await
        }
    }
}

struct FileEntry {
    sink: StreamSink,
    temp_path: PathBuf,
    final_path: PathBuf,
    resolved_name: String,
    prior_existed: bool,
    prior_mtime: Option<SystemTime>,
}

/// Writer binding that assembles files under a base directory.
///
/// Streams write to a temp sibling and are renamed into place at close, so
/// readers never observe a half-written document. Close classifies the
/// outcome against the file that was at the target path when the stream
/// was opened; see [`CloseStatus`].
pub struct FileWriter {
    root: PathBuf,
    identity: Arc<IdentityCell>,
    open: Mutex<HashMap<StreamKey, FileEntry>>,
}

impl FileWriter {
    /// A writer with a fresh, empty identity (path-level opens only).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_identity(root, Arc::new(IdentityCell::new()))
    }

    /// A writer bound to a shared, progressively populated identity.
    pub fn with_identity(root: impl Into<PathBuf>, identity: Arc<IdentityCell>) -> Self {
        Self {
            root: root.into(),
            identity,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn identity_handle(&self) -> Arc<IdentityCell> {
        self.identity.clone()
    }

    /// Keys of all currently open streams.
    pub fn open_keys(&self) -> Vec<StreamKey> {
        self.open
            .lock()
            .expect("open stream registry lock")
            .keys()
            .cloned()
            .collect()
    }

    fn remove_entry(&self, key: &StreamKey) -> StoreResult<FileEntry> {
        self.open
            .lock()
            .expect("open stream registry lock")
            .remove(key)
            .ok_or_else(|| StoreError::UnknownStream(key.to_string()))
    }
}

impl ResourceWriter for FileWriter {
    fn identity(&self) -> &IdentityCell {
        &self.identity
    }

    async fn open_stream(
        &self,
        path: &str,
        name: &str,
        options: OpenOptions,
    ) -> StoreResult<StreamHandle> {
        let key = StreamKey::new(path, name);
        let gzip = options.gzip || name.ends_with(".gz");
        let resolved_name = if gzip && !name.ends_with(".gz") {
            format!("{name}.gz")
        } else {
            name.to_owned()
        };

        let dir = self.root.join(path);
        fs::create_dir_all(&dir).await?;
        let final_path = dir.join(&resolved_name);

        // Snapshot the pre-existing file before anything else; the
        // retry-write protocol depends on this ordering.
        let prior = fs::metadata(&final_path).await.ok();
        let prior_existed = prior.is_some();
        let prior_mtime = prior.and_then(|meta| meta.modified().ok());

        let temp_path = dir.join(format!(
            "tempfile-{}",
            uuid::Uuid::new_v4().simple()
        ));
        let file = fs::File::create(&temp_path).await?;

        let framing = options.multipart.map(|part| {
            let location = part.content_location.unwrap_or_else(|| name.to_owned());
            MultipartFraming::new(part.content_type, location)
        });
        let sink = StreamSink::spawn(
            key.to_string(),
            SinkDestination::File(file),
            gzip,
            framing,
        );

        let entry = FileEntry {
            sink: sink.clone(),
            temp_path: temp_path.clone(),
            final_path,
            resolved_name,
            prior_existed,
            prior_mtime,
        };
        let already_open = {
            let mut open = self.open.lock().expect("open stream registry lock");
            if open.contains_key(&key) {
                true
            } else {
                open.insert(key.clone(), entry);
                false
            }
        };
        if already_open {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::StreamAlreadyOpen(key.to_string()));
        }
        Ok(StreamHandle { key, sink })
    }

    async fn close_stream(&self, key: &StreamKey) -> StoreResult<CloseOutcome> {
        let entry = self.remove_entry(key)?;

        if let Err(err) = entry.sink.finish().await {
            // partial output is never published
            let _ = fs::remove_file(&entry.temp_path).await;
            return Err(err);
        }

        let current = fs::metadata(&entry.final_path).await.ok();
        let current_mtime = current.as_ref().and_then(|meta| meta.modified().ok());

        let status = if current.is_some() {
            let existing = fs::read(&entry.final_path).await?;
            let fresh = fs::read(&entry.temp_path).await?;
            if existing == fresh {
                // leave the stored file (and its mtime) untouched
                fs::remove_file(&entry.temp_path).await?;
                CloseStatus::Identical
            } else {
                fs::rename(&entry.temp_path, &entry.final_path).await?;
                if !entry.prior_existed || entry.prior_mtime != current_mtime {
                    CloseStatus::UpdatedStale
                } else {
                    CloseStatus::Updated
                }
            }
        } else {
            fs::rename(&entry.temp_path, &entry.final_path).await?;
            if entry.prior_existed {
                // the pre-existing file vanished mid-write
                CloseStatus::UpdatedStale
            } else {
                CloseStatus::Created
            }
        };

        Ok(CloseOutcome {
            status,
            path: format!("{}/{}", key.path, entry.resolved_name),
        })
    }

    async fn abort_stream(&self, key: &StreamKey) -> StoreResult<()> {
        let entry = self.remove_entry(key)?;
        drop(entry.sink);
        let _ = fs::remove_file(&entry.temp_path).await;
        Ok(())
    }

    async fn close_all(&self) -> Vec<(StreamKey, StoreResult<CloseOutcome>)> {
        let keys = self.open_keys();
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.close_stream(&key).await;
            outcomes.push((key, outcome));
        }
        outcomes
    }
}

struct PartEntry {
    sink: StreamSink,
    buffer: Arc<Mutex<Vec<u8>>>,
    content_type: String,
    location: String,
}

/// Writer binding that emits each stream as one part of a single outgoing
/// multipart/related response.
///
/// Parts are framed in close order; the terminal boundary is emitted when
/// the last open stream closes. The body channel is bounded, so a slow
/// response consumer pushes back on part closes. Gzip options are ignored
/// here: content encoding is the transport's concern.
pub struct ResponseWriter {
    identity: Arc<IdentityCell>,
    boundary: String,
    body: mpsc::Sender<Bytes>,
    open: Mutex<HashMap<StreamKey, PartEntry>>,
}

impl ResponseWriter {
    /// Creates the writer plus the receiving end of the response body.
    pub fn new(identity: Arc<IdentityCell>) -> (Self, mpsc::Receiver<Bytes>) {
        let (body, receiver) = mpsc::channel(16);
        let writer = Self {
            identity,
            boundary: format!("BOUNDARY_{}", uuid::Uuid::new_v4().simple()),
            body,
            open: Mutex::new(HashMap::new()),
        };
        (writer, receiver)
    }

    /// Value for the response's own `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/related; boundary={}", self.boundary)
    }

    fn remove_entry(&self, key: &StreamKey) -> StoreResult<PartEntry> {
        self.open
            .lock()
            .expect("open part registry lock")
            .remove(key)
            .ok_or_else(|| StoreError::UnknownStream(key.to_string()))
    }

    fn open_is_empty(&self) -> bool {
        self.open.lock().expect("open part registry lock").is_empty()
    }
}

impl ResourceWriter for ResponseWriter {
    fn identity(&self) -> &IdentityCell {
        &self.identity
    }

    async fn open_stream(
        &self,
        path: &str,
        name: &str,
        options: OpenOptions,
    ) -> StoreResult<StreamHandle> {
        let key = StreamKey::new(path, name);
        let (content_type, location) = match options.multipart {
            Some(part) => {
                let location = part
                    .content_location
                    .unwrap_or_else(|| format!("{path}/{name}"));
                (part.content_type, location)
            }
            None => ("application/dicom+json".to_owned(), format!("{path}/{name}")),
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = StreamSink::spawn(
            key.to_string(),
            SinkDestination::Buffer(buffer.clone()),
            false,
            None,
        );

        let entry = PartEntry {
            sink: sink.clone(),
            buffer,
            content_type,
            location,
        };
        {
            let mut open = self.open.lock().expect("open part registry lock");
            if open.contains_key(&key) {
                return Err(StoreError::StreamAlreadyOpen(key.to_string()));
            }
            open.insert(key.clone(), entry);
        }
        Ok(StreamHandle { key, sink })
    }

    async fn close_stream(&self, key: &StreamKey) -> StoreResult<CloseOutcome> {
        let entry = self.remove_entry(key)?;
        entry.sink.finish().await?;

        let payload = {
            let buffer = entry.buffer.lock().expect("part buffer lock");
            buffer.clone()
        };
        let mut part = Vec::with_capacity(payload.len() + 256);
        part.extend_from_slice(
            format!(
                "--{}\r\nContent-Type: {}\r\nContent-Location: {}\r\n\r\n",
                self.boundary, entry.content_type, entry.location
            )
            .as_bytes(),
        );
        part.extend_from_slice(&payload);
        part.extend_from_slice(b"\r\n");

        let send_failed = |_| StoreError::StreamFailure {
            name: key.to_string(),
            message: "response consumer dropped".to_owned(),
        };
        self.body.send(Bytes::from(part)).await.map_err(send_failed)?;

        if self.open_is_empty() {
            let terminal = Bytes::from(format!("--{}--\r\n", self.boundary));
            self.body.send(terminal).await.map_err(send_failed)?;
        }

        Ok(CloseOutcome {
            status: CloseStatus::Created,
            path: entry.location,
        })
    }

    async fn abort_stream(&self, key: &StreamKey) -> StoreResult<()> {
        let entry = self.remove_entry(key)?;
        drop(entry.sink);
        Ok(())
    }

    async fn close_all(&self) -> Vec<(StreamKey, StoreResult<CloseOutcome>)> {
        let keys: Vec<StreamKey> = self
            .open
            .lock()
            .expect("open part registry lock")
            .keys()
            .cloned()
            .collect();
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.close_stream(&key).await;
            outcomes.push((key, outcome));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;
    use wado_types::Uid;

    fn identity() -> Arc<IdentityCell> {
        let cell = IdentityCell::new();
        cell.set_study_uid(Uid::parse("1.2.3").unwrap()).unwrap();
        cell.set_series_uid(Uid::parse("1.2.3.4").unwrap()).unwrap();
        cell.set_sop_instance_uid(Uid::parse("1.2.3.4.5").unwrap())
            .unwrap();
        cell.set_transfer_syntax_uid(Uid::parse("1.2.840.10008.1.2.1").unwrap())
            .unwrap();
        Arc::new(cell)
    }

    #[tokio::test]
    async fn create_then_identical_then_update() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::new(temp.path());

        let handle = writer
            .open_stream("studies/1.2.3", "notes.json", OpenOptions::default())
            .await
            .unwrap();
        handle
            .sink
            .write_binary_value(Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();
        let outcome = writer.close_stream(&handle.key).await.unwrap();
        assert_eq!(outcome.status, CloseStatus::Created);
        assert_eq!(outcome.path, "studies/1.2.3/notes.json");

        // identical rewrite leaves the file alone
        let before = std::fs::metadata(temp.path().join("studies/1.2.3/notes.json"))
            .unwrap()
            .modified()
            .unwrap();
        let handle = writer
            .open_stream("studies/1.2.3", "notes.json", OpenOptions::default())
            .await
            .unwrap();
        handle
            .sink
            .write_binary_value(Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();
        let outcome = writer.close_stream(&handle.key).await.unwrap();
        assert_eq!(outcome.status, CloseStatus::Identical);
        let after = std::fs::metadata(temp.path().join("studies/1.2.3/notes.json"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(before, after);

        // changed content is an update
        let handle = writer
            .open_stream("studies/1.2.3", "notes.json", OpenOptions::default())
            .await
            .unwrap();
        handle
            .sink
            .write_binary_value(Bytes::from_static(b"{\"a\":2}"))
            .await
            .unwrap();
        let outcome = writer.close_stream(&handle.key).await.unwrap();
        assert_eq!(outcome.status, CloseStatus::Updated);
        assert_eq!(
            std::fs::read(temp.path().join("studies/1.2.3/notes.json")).unwrap(),
            b"{\"a\":2}"
        );
    }

    #[tokio::test]
    async fn racing_writer_is_detected_as_stale() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::new(temp.path());
        let target = temp.path().join("studies/1.2.3/index.json");

        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"original").unwrap();

        let handle = writer
            .open_stream("studies/1.2.3", "index.json", OpenOptions::default())
            .await
            .unwrap();
        // a second actor replaces the file between open and close; the
        // pause keeps the two mtimes apart on coarse-timestamp filesystems
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        std::fs::write(&target, b"raced").unwrap();
        handle
            .sink
            .write_binary_value(Bytes::from_static(b"mine"))
            .await
            .unwrap();
        let outcome = writer.close_stream(&handle.key).await.unwrap();
        assert_eq!(outcome.status, CloseStatus::UpdatedStale);
        // last writer wins; content is ours
        assert_eq!(std::fs::read(&target).unwrap(), b"mine");
    }

    #[tokio::test]
    async fn gzip_suffix_applied_and_implied() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::new(temp.path());

        let handle = writer
            .open_stream("studies/1.2.3", "metadata", OpenOptions::gzip())
            .await
            .unwrap();
        handle
            .sink
            .write_binary_value(Bytes::from_static(b"[]"))
            .await
            .unwrap();
        let outcome = writer.close_stream(&handle.key).await.unwrap();
        assert_eq!(outcome.path, "studies/1.2.3/metadata.gz");
        assert!(temp.path().join("studies/1.2.3/metadata.gz").exists());
    }

    #[tokio::test]
    async fn failed_stream_publishes_nothing() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::new(temp.path());

        let handle = writer
            .open_stream("studies/1.2.3", "broken.dat", OpenOptions::default())
            .await
            .unwrap();
        handle
            .sink
            .write_binary_value(Bytes::from_static(b"partial"))
            .await
            .unwrap();
        handle.sink.record_failure("transport aborted");
        let err = writer.close_stream(&handle.key).await.unwrap_err();
        assert!(matches!(err, StoreError::StreamFailure { .. }));

        let dir = temp.path().join("studies/1.2.3");
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn frame_stream_derives_type_and_gzip_from_transfer_syntax() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::with_identity(temp.path(), identity());

        let handle = writer.open_frame_stream(1).await.unwrap();
        handle
            .sink
            .write_binary_value(Bytes::from_static(b"frame-bytes"))
            .await
            .unwrap();
        let outcome = writer.close_stream(&handle.key).await.unwrap();
        // explicit VR little endian is uncompressed, so the frame is gzipped
        assert!(outcome.path.ends_with("frames/1.mht.gz"));
        assert!(temp
            .path()
            .join("studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/frames/1.mht.gz")
            .exists());
    }

    #[tokio::test]
    async fn missing_identity_is_reported_per_field() {
        let temp = TempDir::new().unwrap();
        let cell = Arc::new(IdentityCell::new());
        cell.set_study_uid(Uid::parse("1.2.3").unwrap()).unwrap();
        let writer = FileWriter::with_identity(temp.path(), cell);

        assert!(writer
            .open_study_stream("index.json", OpenOptions::default())
            .await
            .is_ok());
        match writer
            .open_series_stream("metadata", OpenOptions::default())
            .await
        {
            Err(StoreError::MissingIdentity(field)) => assert_eq!(field, "SeriesInstanceUID"),
            other => panic!("unexpected: {other:?}"),
        }
        let _ = writer.close_all().await;
    }

    #[tokio::test]
    async fn sibling_streams_are_isolated() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::new(temp.path());

        let good = writer
            .open_stream("studies/1.2.3", "good.json", OpenOptions::default())
            .await
            .unwrap();
        let bad = writer
            .open_stream("studies/1.2.3", "bad.json", OpenOptions::default())
            .await
            .unwrap();
        good.sink
            .write_binary_value(Bytes::from_static(b"ok"))
            .await
            .unwrap();
        bad.sink
            .write_binary_value(Bytes::from_static(b"doomed"))
            .await
            .unwrap();
        bad.sink.record_failure("disk error");

        let outcomes = writer.close_all().await;
        assert_eq!(outcomes.len(), 2);
        let good_outcome = outcomes.iter().find(|(k, _)| k.name == "good.json").unwrap();
        let bad_outcome = outcomes.iter().find(|(k, _)| k.name == "bad.json").unwrap();
        assert!(good_outcome.1.is_ok());
        assert!(bad_outcome.1.is_err());
        assert!(temp.path().join("studies/1.2.3/good.json").exists());
        assert!(!temp.path().join("studies/1.2.3/bad.json").exists());
    }

    #[tokio::test]
    async fn response_writer_emits_parts_and_terminal_boundary() {
        let (writer, mut body) = ResponseWriter::new(identity());

        let first = writer
            .open_instance_stream("metadata", OpenOptions::default())
            .await
            .unwrap();
        first
            .sink
            .write_binary_value(Bytes::from_static(b"[{}]"))
            .await
            .unwrap();
        writer.close_stream(&first.key).await.unwrap();

        let mut collected = Vec::new();
        while let Ok(chunk) = body.try_recv() {
            collected.extend_from_slice(&chunk);
        }
        let text = String::from_utf8(collected).unwrap();
        assert!(text.contains("Content-Type: application/dicom+json"));
        assert!(text.contains("[{}]"));
        // the only open stream closed, so the response is finalized
        assert!(text.ends_with(&format!("--{}--\r\n", writer.boundary)));
    }
}
