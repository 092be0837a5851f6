//! Series-level aggregation.

use super::{attribute_array, json_payload, SummaryOutcome, SummaryService};
use crate::error::StoreResult;
use crate::paths::{self, INSTANCES_DIR};
use crate::reader::{EntryKind, ScanOptions};
use crate::retry::{write_multiple_with_retry, OutputSpec};
use crate::tags::{self, AttributeMap};
use crate::writer::{FileWriter, OpenOptions};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use wado_types::Uid;

/// Orders instances by instance number: numeric when both sides parse,
/// otherwise lexicographic on the raw value, with the SOP instance UID as
/// the final tie-break so the order is total and deterministic.
fn instance_order(a: &AttributeMap, b: &AttributeMap) -> Ordering {
    let num_a = tags::int_value(a, tags::INSTANCE_NUMBER);
    let num_b = tags::int_value(b, tags::INSTANCE_NUMBER);
    if let (Some(x), Some(y)) = (num_a, num_b) {
        if x != y {
            return x.cmp(&y);
        }
    }
    let raw_a = tags::string_value(a, tags::INSTANCE_NUMBER).unwrap_or("");
    let raw_b = tags::string_value(b, tags::INSTANCE_NUMBER).unwrap_or("");
    raw_a.cmp(raw_b).then_with(|| {
        let sop_a = tags::string_value(a, tags::SOP_INSTANCE_UID).unwrap_or("");
        let sop_b = tags::string_value(b, tags::SOP_INSTANCE_UID).unwrap_or("");
        sop_a.cmp(sop_b)
    })
}

/// Rewrites instance-relative bulk references (`./frames`) into their
/// series-relative form so the series-scope metadata document resolves
/// from the series directory.
fn rebase_bulk_references(attrs: &mut AttributeMap, sop_uid: &str) {
    for value in attrs.values_mut() {
        let Some(uri) = value.get("BulkDataURI").and_then(Value::as_str) else {
            continue;
        };
        if let Some(rest) = uri.strip_prefix("./") {
            let rebased = format!("{INSTANCES_DIR}/{sop_uid}/{rest}");
            value["BulkDataURI"] = Value::String(rebased);
        }
    }
}

impl SummaryService {
    /// Rebuilds the series-level derived documents: the full per-instance
    /// metadata array, the series singleton and the instances index.
    ///
    /// Short-circuits with zero writes when the instance directories on
    /// disk exactly match the instance UIDs recorded in the existing
    /// series metadata document.
    pub async fn update_series(
        &self,
        study_uid: &Uid,
        series_uid: &Uid,
    ) -> StoreResult<SummaryOutcome> {
        let series_path = paths::series_path(study_uid.as_str(), series_uid.as_str(), None)?;
        let instances_path =
            paths::series_path(study_uid.as_str(), series_uid.as_str(), Some(INSTANCES_DIR))?;

        let actual = self.instance_directories(&instances_path).await?;
        let recorded = self.recorded_instance_uids(&series_path).await?;
        if actual == recorded {
            tracing::debug!(series = %series_uid, "series summary up to date");
            return Ok(SummaryOutcome::unchanged());
        }

        let specs = vec![
            OutputSpec::new(
                series_path.as_str(),
                "metadata",
                OpenOptions::default().with_gzip(self.config().gzip_json()),
            ),
            OutputSpec::new(
                series_path.as_str(),
                "series-singleton.json",
                OpenOptions::default().with_gzip(self.config().gzip_json()),
            ),
            OutputSpec::new(
                instances_path.as_str(),
                "index.json",
                OpenOptions::default().with_gzip(self.config().gzip_json()),
            ),
        ];

        let writer = FileWriter::new(self.config().root_dir());
        let outcomes = write_multiple_with_retry(
            &writer,
            specs,
            self.config().retry_attempts(),
            |_attempt| async {
                // re-read on-disk facts every attempt
                let instances = self.collect_instances(&instances_path).await?;
                let series_query = self.derive_series_query(&instances);
                let instances_query: Vec<Value> = instances
                    .iter()
                    .map(|attrs| Value::Object(tags::extract(attrs, tags::INSTANCE_QUERY_TAGS)))
                    .collect();
                let metadata: Vec<Value> = instances.into_iter().map(Value::Object).collect();
                Ok(vec![
                    Some(json_payload(&Value::Array(metadata))?),
                    Some(json_payload(&json!([series_query]))?),
                    Some(json_payload(&Value::Array(instances_query))?),
                ])
            },
        )
        .await?;

        Ok(SummaryOutcome::written(outcomes))
    }

    async fn instance_directories(&self, instances_path: &str) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .reader()
            .scan_directory(instances_path, ScanOptions::default())
            .await?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Directory)
            .map(|entry| entry.name)
            .collect())
    }

    async fn recorded_instance_uids(&self, series_path: &str) -> StoreResult<BTreeSet<String>> {
        let existing = self
            .reader()
            .read_json_document_or(series_path, "metadata", Value::Null)
            .await?;
        Ok(attribute_array(existing)
            .iter()
            .filter_map(|attrs| tags::string_value(attrs, tags::SOP_INSTANCE_UID))
            .map(str::to_owned)
            .collect())
    }

    /// Reads every instance's metadata document under the series,
    /// rebasing bulk references and sorting by instance number. Unreadable
    /// documents are logged and skipped; the remaining instances still
    /// summarize.
    async fn collect_instances(&self, instances_path: &str) -> StoreResult<Vec<AttributeMap>> {
        let mut instances = Vec::new();
        for sop_uid in self.instance_directories(instances_path).await? {
            let instance_path = format!("{instances_path}/{sop_uid}");
            let doc = match self
                .reader()
                .read_json_document(&instance_path, "metadata")
                .await
            {
                Ok(doc) => doc,
                Err(err) => {
                    tracing::warn!(instance = %sop_uid, error = %err, "skipping unreadable instance metadata");
                    continue;
                }
            };
            let Value::Object(mut attrs) = doc else {
                tracing::warn!(instance = %sop_uid, "instance metadata is not an object, skipping");
                continue;
            };
            rebase_bulk_references(&mut attrs, &sop_uid);
            instances.push(attrs);
        }
        instances.sort_by(instance_order);
        Ok(instances)
    }

    fn derive_series_query(&self, instances: &[AttributeMap]) -> Value {
        let mut query = instances
            .first()
            .map(|attrs| tags::extract(attrs, tags::SERIES_QUERY_TAGS))
            .unwrap_or_default();
        tags::set_value(
            &mut query,
            tags::NUMBER_OF_SERIES_RELATED_INSTANCES,
            "IS",
            Value::from(instances.len()),
        );
        Value::Object(query)
    }
}
