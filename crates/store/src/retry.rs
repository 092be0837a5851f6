//! Optimistic-concurrency write protocol.
//!
//! Derived documents (series/study summaries, indexes) are regenerated
//! from on-disk facts by uncoordinated writers: two processes may rebuild
//! the same summary at the same time, with no locks and no database. The
//! protocol here makes that safe:
//!
//! 1. **Open** a stream at the target path; this snapshots the
//!    modification time of any pre-existing file.
//! 2. **Generate** the payload by re-reading current on-disk facts,
//!    strictly after the snapshot, or staleness cannot be detected.
//! 3. **Write and close**; close classifies the result against the file
//!    now on disk.
//! 4. A stale classification means another writer landed in between; the
//!    whole cycle repeats (the regenerated payload then reflects the
//!    race winner's facts), a bounded number of times.
//!
//! Exhausting the retries is *not* an error: the competing writer's output
//! is a valid regeneration of the same facts and a later pass picks up
//! anything still missing.

use crate::error::{StoreError, StoreResult};
use crate::stream::BinaryValue;
use crate::writer::{CloseStatus, OpenOptions, ResourceWriter, StreamHandle};
use std::future::Future;

/// Terminal status of one retry-write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Created,
    Updated,
    /// Regenerated content was byte-equal; stored bytes untouched.
    Identical,
    /// The generator produced nothing to write; the stream was aborted.
    Skipped,
    /// Every attempt lost the race. Success-with-caveat, not a failure.
    RetriesExhausted,
}

impl WriteStatus {
    fn from_close(status: CloseStatus) -> Self {
        match status {
            CloseStatus::Created => WriteStatus::Created,
            CloseStatus::Updated => WriteStatus::Updated,
            CloseStatus::Identical => WriteStatus::Identical,
            // mapped by the retry loop, never returned directly
            CloseStatus::UpdatedStale => WriteStatus::RetriesExhausted,
        }
    }
}

impl std::fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WriteStatus::Created => "created",
            WriteStatus::Updated => "updated",
            WriteStatus::Identical => "identical",
            WriteStatus::Skipped => "skipped",
            WriteStatus::RetriesExhausted => "retries-exhausted",
        };
        f.write_str(text)
    }
}

/// Outcome of a retry-write call.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub status: WriteStatus,
    /// Published relative path; `None` for `Skipped`.
    pub path: Option<String>,
}

/// One target file of a (possibly multi-output) retry-write.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub path: String,
    pub name: String,
    pub options: OpenOptions,
}

impl OutputSpec {
    pub fn new(path: impl Into<String>, name: impl Into<String>, options: OpenOptions) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            options,
        }
    }
}

async fn write_and_close<W: ResourceWriter>(
    writer: &W,
    handle: StreamHandle,
    payload: BinaryValue,
) -> StoreResult<(CloseStatus, String)> {
    if let Err(err) = handle.sink.write_binary_value(payload).await {
        let _ = writer.abort_stream(&handle.key).await;
        return Err(err);
    }
    let outcome = writer.close_stream(&handle.key).await?;
    Ok((outcome.status, outcome.path))
}

/// Runs the retry-write protocol for a single output file.
///
/// `generate` is invoked once per attempt (1-based) and must re-read the
/// on-disk facts it derives from; returning `None` means "nothing to
/// write" and the call resolves as `Skipped`.
pub async fn write_with_retry<W, G, Fut>(
    writer: &W,
    spec: OutputSpec,
    attempts: u32,
    generate: G,
) -> StoreResult<WriteOutcome>
where
    W: ResourceWriter,
    G: Fn(u32) -> Fut,
    Fut: Future<Output = StoreResult<Option<BinaryValue>>>,
{
    let attempts = attempts.max(1);
    let mut last_path = None;
    for attempt in 1..=attempts {
        // open snapshots the pre-existing mtime before generation reads
        // anything
        let handle = writer
            .open_stream(&spec.path, &spec.name, spec.options.clone())
            .await?;
        let payload = match generate(attempt).await {
            Ok(payload) => payload,
            Err(err) => {
                let _ = writer.abort_stream(&handle.key).await;
                return Err(err);
            }
        };
        let Some(payload) = payload else {
            writer.abort_stream(&handle.key).await?;
            return Ok(WriteOutcome {
                status: WriteStatus::Skipped,
                path: None,
            });
        };
        let (status, path) = write_and_close(writer, handle, payload).await?;
        if status == CloseStatus::UpdatedStale {
            tracing::warn!(
                target = %format!("{}/{}", spec.path, spec.name),
                attempt,
                "concurrent writer detected, regenerating"
            );
            last_path = Some(path);
            continue;
        }
        return Ok(WriteOutcome {
            status: WriteStatus::from_close(status),
            path: Some(path),
        });
    }
    tracing::info!(
        target = %format!("{}/{}", spec.path, spec.name),
        attempts,
        "retries exhausted; competing writer's output stands"
    );
    Ok(WriteOutcome {
        status: WriteStatus::RetriesExhausted,
        path: last_path,
    })
}

/// Runs the protocol across several co-dependent outputs sharing one
/// payload-generation call.
///
/// All streams are opened (snapshotting every target) before the single
/// generation; a stale classification on *any* member retries the whole
/// batch. The generator returns one optional payload per spec, in order.
pub async fn write_multiple_with_retry<W, G, Fut>(
    writer: &W,
    specs: Vec<OutputSpec>,
    attempts: u32,
    generate: G,
) -> StoreResult<Vec<WriteOutcome>>
where
    W: ResourceWriter,
    G: Fn(u32) -> Fut,
    Fut: Future<Output = StoreResult<Vec<Option<BinaryValue>>>>,
{
    let attempts = attempts.max(1);
    let mut outcomes: Vec<WriteOutcome> = Vec::new();
    for attempt in 1..=attempts {
        let mut handles = Vec::with_capacity(specs.len());
        for spec in &specs {
            handles.push(
                writer
                    .open_stream(&spec.path, &spec.name, spec.options.clone())
                    .await?,
            );
        }

        let payloads = match generate(attempt).await {
            Ok(payloads) => payloads,
            Err(err) => {
                for handle in handles {
                    let _ = writer.abort_stream(&handle.key).await;
                }
                return Err(err);
            }
        };
        if payloads.len() != specs.len() {
            for handle in handles {
                let _ = writer.abort_stream(&handle.key).await;
            }
            return Err(StoreError::UnsupportedBinaryValue(
                "generator produced a payload count that does not match the output specs",
            ));
        }

        let mut any_stale = false;
        outcomes = Vec::with_capacity(specs.len());
        for (handle, payload) in handles.into_iter().zip(payloads) {
            match payload {
                None => {
                    writer.abort_stream(&handle.key).await?;
                    outcomes.push(WriteOutcome {
                        status: WriteStatus::Skipped,
                        path: None,
                    });
                }
                Some(payload) => {
                    let (status, path) = write_and_close(writer, handle, payload).await?;
                    if status == CloseStatus::UpdatedStale {
                        any_stale = true;
                    }
                    outcomes.push(WriteOutcome {
                        status: WriteStatus::from_close(status),
                        path: Some(path),
                    });
                }
            }
        }
        if !any_stale {
            return Ok(outcomes);
        }
        tracing::warn!(attempt, "stale member in batch write, regenerating all");
    }
    tracing::info!(attempts, "batch retries exhausted");
    Ok(outcomes)
}
