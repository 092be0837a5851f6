//! The streaming sink: one destination, ordered writes, explicit
//! backpressure, recorded (never thrown) failures.

use crate::error::{StoreError, StoreResult};
use crate::stream::multipart::MultipartFraming;
use crate::stream::value::BinaryValue;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Depth of the per-sink write queue. A full queue suspends producers,
/// bounding memory use for multi-gigabyte pixel streams.
const QUEUE_DEPTH: usize = 8;

/// Where a sink's bytes end up.
pub enum SinkDestination {
    /// A file being assembled; the owning writer renames it into place
    /// after the sink finishes.
    File(tokio::fs::File),
    /// An in-memory part buffer, collected by the response writer when the
    /// part closes.
    Buffer(Arc<Mutex<Vec<u8>>>),
}

impl SinkDestination {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            SinkDestination::File(file) => file.write_all(buf).await,
            SinkDestination::Buffer(buffer) => {
                buffer.lock().expect("part buffer lock").extend_from_slice(buf);
                Ok(())
            }
        }
    }

    async fn finalize(&mut self) -> std::io::Result<()> {
        match self {
            SinkDestination::File(file) => {
                file.flush().await?;
                file.shutdown().await
            }
            SinkDestination::Buffer(_) => Ok(()),
        }
    }
}

enum SinkOp {
    /// Fire-and-forget chunk; errors are recorded, not reported.
    Chunk(Bytes),
    /// An atomic multi-chunk value with completion reporting.
    Value(Vec<Bytes>, oneshot::Sender<StoreResult<u64>>),
    /// Drain, frame, finalize.
    Finish(oneshot::Sender<StoreResult<()>>),
}

#[derive(Debug)]
struct SinkShared {
    name: String,
    failed: AtomicBool,
    message: Mutex<Option<String>>,
    bytes_written: AtomicU64,
}

impl SinkShared {
    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn record(&self, message: String) {
        // first failure wins; later ones are usually consequences of it
        let mut slot = self.message.lock().expect("sink failure lock");
        if slot.is_none() {
            *slot = Some(message);
        }
        drop(slot);
        self.failed.store(true, Ordering::Release);
    }

    fn failure_error(&self) -> StoreError {
        let message = self
            .message
            .lock()
            .expect("sink failure lock")
            .clone()
            .unwrap_or_else(|| "stream closed".to_owned());
        StoreError::StreamFailure {
            name: self.name.clone(),
            message,
        }
    }
}

/// Handle to one open output stream.
///
/// Cheap to clone; all clones feed the same ordered queue.
#[derive(Clone, Debug)]
pub struct StreamSink {
    tx: mpsc::Sender<SinkOp>,
    shared: Arc<SinkShared>,
}

impl StreamSink {
    /// Spawns the drain task for `destination` and returns the producer
    /// handle. `gzip` wraps everything written (framing included) in a gzip
    /// stream; `framing` wraps the payload in one MIME part.
    pub fn spawn(
        name: impl Into<String>,
        destination: SinkDestination,
        gzip: bool,
        framing: Option<MultipartFraming>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let shared = Arc::new(SinkShared {
            name: name.into(),
            failed: AtomicBool::new(false),
            message: Mutex::new(None),
            bytes_written: AtomicU64::new(0),
        });
        let state = DrainState {
            destination,
            encoder: gzip.then(|| GzEncoder::new(Vec::new(), Compression::default())),
            framing,
            header_written: false,
            shared: shared.clone(),
        };
        tokio::spawn(drain(rx, state));
        Self { tx, shared }
    }

    /// Forwards one chunk to the destination.
    ///
    /// A no-op returning `true` if the sink already failed. Otherwise the
    /// return value reports whether the queue still has room; on `false`
    /// the caller should await the next `write` (which suspends until the
    /// drain task frees a slot) before producing more data.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> bool {
        if self.shared.is_failed() {
            return true;
        }
        if self.tx.send(SinkOp::Chunk(chunk.into())).await.is_err() {
            // drain task is gone; finish() will report the recorded state
            return true;
        }
        self.tx.capacity() > 0
    }

    /// Writes a complete binary value as one atomic unit.
    ///
    /// The value is enqueued in a single operation, so values submitted by
    /// concurrent producers never interleave their chunks. Resolves with the
    /// total payload bytes written once the destination has accepted every
    /// chunk.
    ///
    /// # Errors
    ///
    /// [`StoreError::EmptyWrite`] when the flattened value is zero bytes;
    /// [`StoreError::StreamFailure`] when the sink has failed.
    pub async fn write_binary_value(&self, value: impl Into<BinaryValue>) -> StoreResult<u64> {
        let chunks = value.into().flatten();
        let total: usize = chunks.iter().map(Bytes::len).sum();
        if total == 0 {
            return Err(StoreError::EmptyWrite(self.shared.name.clone()));
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SinkOp::Value(chunks, done_tx))
            .await
            .map_err(|_| self.shared.failure_error())?;
        done_rx.await.map_err(|_| self.shared.failure_error())?
    }

    /// Marks the sink failed. Idempotent, never panics; the first recorded
    /// message is kept. Subsequent writes become no-ops and `finish`
    /// reports the failure.
    pub fn record_failure(&self, message: impl Into<String>) {
        self.shared.record(message.into());
    }

    /// The recorded failure message, if any.
    pub fn failure(&self) -> Option<String> {
        self.shared.message.lock().expect("sink failure lock").clone()
    }

    /// Total payload bytes accepted by the destination so far.
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Acquire)
    }

    /// Drains the queue, emits the multipart trailer, finalizes gzip and
    /// the destination. Returns the recorded failure, if any, rather than
    /// panicking; calling again after completion reports the same state.
    pub async fn finish(&self) -> StoreResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(SinkOp::Finish(done_tx)).await.is_err() {
            // already finished or aborted
            return if self.shared.is_failed() {
                Err(self.shared.failure_error())
            } else {
                Ok(())
            };
        }
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(self.shared.failure_error()),
        }
    }
}

struct DrainState {
    destination: SinkDestination,
    encoder: Option<GzEncoder<Vec<u8>>>,
    framing: Option<MultipartFraming>,
    header_written: bool,
    shared: Arc<SinkShared>,
}

impl DrainState {
    /// Pushes raw bytes through the optional gzip layer to the destination.
    async fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match &mut self.encoder {
            Some(encoder) => {
                encoder.write_all(buf)?;
                let compressed = std::mem::take(encoder.get_mut());
                if !compressed.is_empty() {
                    self.destination.write_all(&compressed).await?;
                }
                Ok(())
            }
            None => self.destination.write_all(buf).await,
        }
    }

    /// Writes one payload chunk, emitting the part header first if needed.
    async fn write_payload(&mut self, chunk: &[u8]) -> StoreResult<()> {
        if self.shared.is_failed() {
            return Err(self.shared.failure_error());
        }
        let result: std::io::Result<()> = async {
            if !self.header_written {
                self.header_written = true;
                if let Some(framing) = self.framing.clone() {
                    self.write_raw(&framing.header()).await?;
                }
            }
            self.write_raw(chunk).await
        }
        .await;
        match result {
            Ok(()) => {
                self.shared
                    .bytes_written
                    .fetch_add(chunk.len() as u64, Ordering::AcqRel);
                Ok(())
            }
            Err(err) => {
                self.shared.record(err.to_string());
                Err(self.shared.failure_error())
            }
        }
    }

    async fn finish(&mut self) -> StoreResult<()> {
        if self.shared.is_failed() {
            return Err(self.shared.failure_error());
        }
        let result: std::io::Result<()> = async {
            if self.header_written {
                if let Some(framing) = self.framing.clone() {
                    self.write_raw(&framing.trailer()).await?;
                }
            }
            if let Some(encoder) = self.encoder.take() {
                let remainder = encoder.finish()?;
                if !remainder.is_empty() {
                    self.destination.write_all(&remainder).await?;
                }
            }
            self.destination.finalize().await
        }
        .await;
        result.map_err(|err| {
            self.shared.record(err.to_string());
            self.shared.failure_error()
        })
    }
}

async fn drain(mut rx: mpsc::Receiver<SinkOp>, mut state: DrainState) {
    while let Some(op) = rx.recv().await {
        match op {
            SinkOp::Chunk(chunk) => {
                // fire-and-forget: failures are recorded for finish()
                let _ = state.write_payload(&chunk).await;
            }
            SinkOp::Value(chunks, done) => {
                let mut outcome = Ok(0u64);
                for chunk in &chunks {
                    match state.write_payload(chunk).await {
                        Ok(()) => {
                            if let Ok(total) = outcome.as_mut() {
                                *total += chunk.len() as u64;
                            }
                        }
                        Err(err) => {
                            outcome = Err(err);
                            break;
                        }
                    }
                }
                let _ = done.send(outcome);
            }
            SinkOp::Finish(done) => {
                let _ = done.send(state.finish().await);
                return;
            }
        }
    }
    // All producers dropped without finish: an aborted stream. The
    // destination is dropped as-is; the owning writer removes the temp
    // file.
}
