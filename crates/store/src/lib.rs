//! # wado-store
//!
//! Filesystem-backed storage engine for DICOMweb study/series/instance
//! resources: per-instance metadata documents, content-addressed bulk
//! data, per-frame pixel files, and the derived series/study/global
//! summary documents, all laid out as plain files under one base
//! directory.
//!
//! Two properties shape the whole crate:
//!
//! - **Streaming with backpressure.** Large binary attributes and pixel
//!   frames pass through ordered, bounded sinks ([`StreamSink`]) with MIME
//!   multipart framing and transparent gzip; nothing buffers a whole study
//!   in memory.
//! - **Lock-free concurrent regeneration.** Derived documents are written
//!   through an optimistic retry protocol ([`retry::write_with_retry`])
//!   keyed on file-modification timestamps: uncoordinated writers
//!   rebuilding the same summary detect each other after the fact and
//!   regenerate from the winner's facts, with no locks and no database.
//!
//! The DICOM binary parser, the HTTP/DIMSE transports, the CLI and the
//! rendering pipeline are external collaborators; this crate begins at
//! attribute events and relative resource paths and ends at bytes on
//! disk.
//!
//! ## Layout
//!
//! ```text
//! {base}/studies/{studyUID}/index.json[.gz]
//! {base}/studies/{studyUID}/series/index.json[.gz]
//! {base}/studies/{studyUID}/series/{seriesUID}/metadata[.gz]
//! {base}/studies/{studyUID}/series/{seriesUID}/series-singleton.json[.gz]
//! {base}/studies/{studyUID}/series/{seriesUID}/instances/index.json[.gz]
//! {base}/studies/{studyUID}/series/{seriesUID}/instances/{sopUID}/metadata[.gz]
//! {base}/studies/{studyUID}/series/{seriesUID}/instances/{sopUID}/frames/{n}.mht[.gz]
//! {base}/studies/{studyUID}/series/{seriesUID}/bulkdata/{hh}/{hh}/{rest}.mht[.gz]
//! {base}/studies/index.json[.gz]
//! ```

pub mod bulkdata;
pub mod config;
pub mod error;
pub mod filter;
pub mod frames;
pub mod identity;
pub mod paths;
pub mod reader;
pub mod retry;
pub mod stream;
pub mod summary;
pub mod tags;
pub mod uids;
pub mod writer;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use identity::{IdentityCell, ResourceIdentity};
pub use reader::FileReader;
pub use stream::{BinaryValue, StreamSink};
pub use summary::{SummaryOutcome, SummaryService};
pub use wado_types::{Uid, UidError};
pub use writer::{FileWriter, OpenOptions, ResourceWriter, ResponseWriter, StreamKey};
