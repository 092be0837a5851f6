//! Derived-document aggregators.
//!
//! Summaries (series metadata arrays, series/study singletons, the
//! instances/series/studies indexes) are derived views over the
//! authoritative per-instance documents. They are idempotently regenerable
//! and may be deleted and rebuilt at any time; every write goes through
//! the optimistic retry-write protocol so uncoordinated concurrent
//! rebuilds never corrupt each other.
//!
//! Each aggregator starts with a cheap up-to-date check (the child
//! directories actually on disk against the child set recorded in the
//! existing derived document) and performs zero writes when nothing
//! changed.

mod series;
mod studies;
mod study;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::reader::FileReader;
use crate::retry::WriteOutcome;
use crate::stream::BinaryValue;
use crate::tags::AttributeMap;
use bytes::Bytes;

/// Result of one aggregator run.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    /// The child set was unchanged; no streams were opened.
    pub up_to_date: bool,
    pub outcomes: Vec<WriteOutcome>,
}

impl SummaryOutcome {
    fn unchanged() -> Self {
        Self {
            up_to_date: true,
            outcomes: Vec::new(),
        }
    }

    fn written(outcomes: Vec<WriteOutcome>) -> Self {
        Self {
            up_to_date: false,
            outcomes,
        }
    }
}

/// Builds and persists the derived documents for series, studies and the
/// global studies index.
#[derive(Debug, Clone)]
pub struct SummaryService {
    reader: FileReader,
    config: StoreConfig,
}

impl SummaryService {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            reader: FileReader::new(config.root_dir()),
            config,
        }
    }

    pub(crate) fn reader(&self) -> &FileReader {
        &self.reader
    }

    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Serializes a JSON document into a sink payload.
pub(crate) fn json_payload(value: &serde_json::Value) -> StoreResult<BinaryValue> {
    Ok(BinaryValue::from(Bytes::from(serde_json::to_vec(value)?)))
}

/// Interprets a stored JSON value as an array of attribute maps, skipping
/// entries of any other shape.
pub(crate) fn attribute_array(value: serde_json::Value) -> Vec<AttributeMap> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
