//! Study-level aggregation.

use super::{attribute_array, json_payload, SummaryOutcome, SummaryService};
use crate::error::StoreResult;
use crate::paths::{self, INSTANCES_DIR, SERIES_DIR};
use crate::reader::{EntryKind, ScanOptions};
use crate::retry::{write_multiple_with_retry, OutputSpec};
use crate::tags::{self, AttributeMap};
use crate::writer::{FileWriter, OpenOptions};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use wado_types::Uid;

/// Orders series queries by series number, with the same fallback rules as
/// the instance sort.
fn series_order(a: &AttributeMap, b: &AttributeMap) -> Ordering {
    let num_a = tags::int_value(a, tags::SERIES_NUMBER);
    let num_b = tags::int_value(b, tags::SERIES_NUMBER);
    if let (Some(x), Some(y)) = (num_a, num_b) {
        if x != y {
            return x.cmp(&y);
        }
    }
    let raw_a = tags::string_value(a, tags::SERIES_NUMBER).unwrap_or("");
    let raw_b = tags::string_value(b, tags::SERIES_NUMBER).unwrap_or("");
    raw_a.cmp(raw_b).then_with(|| {
        let uid_a = tags::string_value(a, tags::SERIES_INSTANCE_UID).unwrap_or("");
        let uid_b = tags::string_value(b, tags::SERIES_INSTANCE_UID).unwrap_or("");
        uid_a.cmp(uid_b)
    })
}

impl SummaryService {
    /// Rebuilds the study-level derived documents: the series index and
    /// the study singleton.
    ///
    /// Short-circuits with zero writes when the series directories on disk
    /// exactly match the series UIDs recorded in the existing series
    /// index.
    pub async fn update_study(&self, study_uid: &Uid) -> StoreResult<SummaryOutcome> {
        let study_path = paths::study_path(study_uid.as_str(), None)?;
        let series_container = paths::study_path(study_uid.as_str(), Some(SERIES_DIR))?;

        let actual = self.series_directories(&series_container).await?;
        let recorded = self.recorded_series_uids(&series_container).await?;
        if actual == recorded {
            tracing::debug!(study = %study_uid, "study summary up to date");
            return Ok(SummaryOutcome::unchanged());
        }

        let specs = vec![
            OutputSpec::new(
                series_container.as_str(),
                "index.json",
                OpenOptions::default().with_gzip(self.config().gzip_json()),
            ),
            OutputSpec::new(
                study_path.as_str(),
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
                let series_queries = self.collect_series(&series_container).await?;
                let study_query = self.derive_study_query(&series_container, &series_queries).await?;
                let series_index: Vec<Value> =
                    series_queries.into_iter().map(Value::Object).collect();
                Ok(vec![
                    Some(json_payload(&Value::Array(series_index))?),
                    Some(json_payload(&json!([study_query]))?),
                ])
            },
        )
        .await?;

        Ok(SummaryOutcome::written(outcomes))
    }

    async fn series_directories(&self, series_container: &str) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .reader()
            .scan_directory(series_container, ScanOptions::default())
            .await?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Directory)
            .map(|entry| entry.name)
            .collect())
    }

    async fn recorded_series_uids(&self, series_container: &str) -> StoreResult<BTreeSet<String>> {
        let existing = self
            .reader()
            .read_json_document_or(series_container, "index.json", Value::Null)
            .await?;
        Ok(attribute_array(existing)
            .iter()
            .filter_map(|attrs| tags::string_value(attrs, tags::SERIES_INSTANCE_UID))
            .map(str::to_owned)
            .collect())
    }

    /// Reads every series singleton under the study, sorted by series
    /// number. Missing or unreadable singletons are logged and skipped.
    async fn collect_series(&self, series_container: &str) -> StoreResult<Vec<AttributeMap>> {
        let mut series_queries = Vec::new();
        for series_uid in self.series_directories(series_container).await? {
            let series_path = format!("{series_container}/{series_uid}");
            let doc = match self
                .reader()
                .read_json_document(&series_path, "series-singleton.json")
                .await
            {
                Ok(doc) => doc,
                Err(err) => {
                    tracing::warn!(series = %series_uid, error = %err, "skipping unreadable series singleton");
                    continue;
                }
            };
            match attribute_array(doc).into_iter().next() {
                Some(query) => series_queries.push(query),
                None => {
                    tracing::warn!(series = %series_uid, "series singleton is empty, skipping");
                }
            }
        }
        series_queries.sort_by(series_order);
        Ok(series_queries)
    }

    /// Derives the study singleton: patient/study query attributes from a
    /// representative instance, plus the computed modality set and counts.
    async fn derive_study_query(
        &self,
        series_container: &str,
        series_queries: &[AttributeMap],
    ) -> StoreResult<Value> {
        let mut query = self
            .representative_instance(series_container, series_queries)
            .await
            .map(|attrs| tags::extract(&attrs, tags::STUDY_QUERY_TAGS))
            .unwrap_or_default();

        let mut modalities: Vec<Value> = Vec::new();
        let mut instance_count: i64 = 0;
        for series in series_queries {
            if let Some(modality) = tags::string_value(series, tags::MODALITY) {
                let value = Value::String(modality.to_owned());
                if !modalities.contains(&value) {
                    modalities.push(value);
                }
            }
            instance_count +=
                tags::int_value(series, tags::NUMBER_OF_SERIES_RELATED_INSTANCES).unwrap_or(0);
        }
        tags::set_values(&mut query, tags::MODALITIES_IN_STUDY, "CS", modalities);
        tags::set_value(
            &mut query,
            tags::NUMBER_OF_STUDY_RELATED_INSTANCES,
            "IS",
            Value::from(instance_count),
        );
        tags::set_value(
            &mut query,
            tags::NUMBER_OF_STUDY_RELATED_SERIES,
            "IS",
            Value::from(series_queries.len()),
        );
        Ok(Value::Object(query))
    }

    /// First readable instance metadata document in series order; the
    /// study/patient attributes are the same on every instance of the
    /// study, so any one will do.
    async fn representative_instance(
        &self,
        series_container: &str,
        series_queries: &[AttributeMap],
    ) -> Option<AttributeMap> {
        for series in series_queries {
            let Some(series_uid) = tags::string_value(series, tags::SERIES_INSTANCE_UID) else {
                continue;
            };
            let instances_path = format!("{series_container}/{series_uid}/{INSTANCES_DIR}");
            let entries = self
                .reader()
                .scan_directory(&instances_path, ScanOptions::default())
                .await
                .ok()?;
            for entry in entries {
                if entry.kind != EntryKind::Directory {
                    continue;
                }
                let instance_path = format!("{instances_path}/{}", entry.name);
                if let Ok(Value::Object(attrs)) = self
                    .reader()
                    .read_json_document(&instance_path, "metadata")
                    .await
                {
                    return Some(attrs);
                }
            }
        }
        None
    }
}
