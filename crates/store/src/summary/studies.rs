//! Global studies-index aggregation.

use super::{attribute_array, json_payload, SummaryOutcome, SummaryService};
use crate::error::StoreResult;
use crate::paths::{self, STUDIES_DIR};
use crate::retry::{write_with_retry, OutputSpec, WriteStatus};
use crate::tags;
use crate::writer::{FileWriter, OpenOptions};
use serde_json::Value;
use std::collections::BTreeMap;
use wado_types::Uid;

impl SummaryService {
    /// Merges the persisted global studies index with freshly read study
    /// singletons for `touched` studies, drops entries whose study
    /// directory no longer exists, and writes the merged, sorted result.
    ///
    /// An unchanged index resolves as `Identical` without touching the
    /// stored bytes.
    pub async fn update_studies_index(&self, touched: &[Uid]) -> StoreResult<SummaryOutcome> {
        let spec = OutputSpec::new(
            STUDIES_DIR,
            "index.json",
            OpenOptions::default().with_gzip(self.config().gzip_json()),
        );

        let writer = FileWriter::new(self.config().root_dir());
        let outcome = write_with_retry(
            &writer,
            spec,
            self.config().retry_attempts(),
            |_attempt| async {
                let merged = self.merge_studies_index(touched).await?;
                Ok(Some(json_payload(&Value::Array(merged))?))
            },
        )
        .await?;

        let up_to_date = outcome.status == WriteStatus::Identical;
        Ok(SummaryOutcome {
            up_to_date,
            outcomes: vec![outcome],
        })
    }

    async fn merge_studies_index(&self, touched: &[Uid]) -> StoreResult<Vec<Value>> {
        let existing = self
            .reader()
            .read_json_document_or(STUDIES_DIR, "index.json", Value::Null)
            .await?;

        // keyed by StudyInstanceUID; BTreeMap keeps the output sorted
        let mut entries: BTreeMap<String, Value> = BTreeMap::new();
        for attrs in attribute_array(existing) {
            if let Some(uid) = tags::string_value(&attrs, tags::STUDY_INSTANCE_UID) {
                entries.insert(uid.to_owned(), Value::Object(attrs));
            }
        }

        for study_uid in touched {
            let study_path = paths::study_path(study_uid.as_str(), None)?;
            if !self.reader().dir_exists(&study_path).await {
                entries.remove(study_uid.as_str());
                continue;
            }
            match self
                .reader()
                .read_json_document_or(&study_path, "index.json", Value::Null)
                .await
            {
                Ok(doc) => match attribute_array(doc).into_iter().next() {
                    Some(query) => {
                        entries.insert(study_uid.as_str().to_owned(), Value::Object(query));
                    }
                    None => {
                        tracing::warn!(study = %study_uid, "study singleton absent, keeping previous entry");
                    }
                },
                Err(err) => {
                    tracing::warn!(study = %study_uid, error = %err, "unreadable study singleton, keeping previous entry");
                }
            }
        }

        // entries for studies deleted outside the touched set also drop
        let mut kept = Vec::with_capacity(entries.len());
        for (uid, entry) in entries {
            let Ok(study_path) = paths::study_path(&uid, None) else {
                continue;
            };
            if self.reader().dir_exists(&study_path).await {
                kept.push(entry);
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_study_singleton(root: &std::path::Path, study: &str, description: &str) {
        let dir = root.join(format!("studies/{study}"));
        std::fs::create_dir_all(&dir).unwrap();
        let singleton = json!([{
            tags::STUDY_INSTANCE_UID: { "vr": "UI", "Value": [study] },
            tags::STUDY_DESCRIPTION: { "vr": "LO", "Value": [description] },
        }]);
        std::fs::write(
            dir.join("index.json"),
            serde_json::to_vec(&singleton).unwrap(),
        )
        .unwrap();
    }

    fn service(root: &std::path::Path) -> SummaryService {
        SummaryService::new(StoreConfig::new(root).with_gzip_json(false))
    }

    fn read_index(root: &std::path::Path) -> Vec<Value> {
        let bytes = std::fs::read(root.join("studies/index.json")).unwrap();
        serde_json::from_slice::<Value>(&bytes)
            .unwrap()
            .as_array()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn merges_and_sorts_touched_studies() {
        let temp = TempDir::new().unwrap();
        write_study_singleton(temp.path(), "1.2.9", "latest");
        write_study_singleton(temp.path(), "1.2.1", "earliest");

        let service = service(temp.path());
        let touched = [Uid::parse("1.2.9").unwrap(), Uid::parse("1.2.1").unwrap()];
        let outcome = service.update_studies_index(&touched).await.unwrap();
        assert!(!outcome.up_to_date);

        let index = read_index(temp.path());
        assert_eq!(index.len(), 2);
        assert_eq!(index[0]["0020000D"]["Value"][0].as_str().unwrap(), "1.2.1");
        assert_eq!(index[1]["0020000D"]["Value"][0].as_str().unwrap(), "1.2.9");
    }

    #[tokio::test]
    async fn deleted_study_drops_out_of_the_index() {
        let temp = TempDir::new().unwrap();
        write_study_singleton(temp.path(), "1.2.1", "a");
        write_study_singleton(temp.path(), "1.2.2", "b");

        let service = service(temp.path());
        let touched = [Uid::parse("1.2.1").unwrap(), Uid::parse("1.2.2").unwrap()];
        service.update_studies_index(&touched).await.unwrap();

        std::fs::remove_dir_all(temp.path().join("studies/1.2.2")).unwrap();
        // only re-touch the surviving study; the deleted one must still drop
        let outcome = service
            .update_studies_index(&[Uid::parse("1.2.1").unwrap()])
            .await
            .unwrap();
        assert!(!outcome.up_to_date);

        let index = read_index(temp.path());
        assert_eq!(index.len(), 1);
        assert_eq!(index[0]["0020000D"]["Value"][0].as_str().unwrap(), "1.2.1");
    }

    #[tokio::test]
    async fn unchanged_index_is_identical() {
        let temp = TempDir::new().unwrap();
        write_study_singleton(temp.path(), "1.2.1", "a");

        let service = service(temp.path());
        let touched = [Uid::parse("1.2.1").unwrap()];
        service.update_studies_index(&touched).await.unwrap();
        let outcome = service.update_studies_index(&touched).await.unwrap();
        assert!(outcome.up_to_date);
        assert_eq!(outcome.outcomes[0].status, WriteStatus::Identical);
    }
}
