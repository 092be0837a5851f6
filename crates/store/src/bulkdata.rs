//! Content-addressed bulk-data storage.
//!
//! Large attribute values are stored out-of-line at a path derived from the
//! SHA-256 of their content: `bulkdata/{h[0..2]}/{h[2..4]}/{h[4..]}.mht.gz`
//! under the owning series. Because the path is a pure function of the
//! content, writing the same bytes twice lands on the same file with
//! byte-identical content; deduplication needs no bookkeeping.

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::paths::BULKDATA_DIR;
use crate::stream::BinaryValue;
use crate::tags;
use crate::writer::{OpenOptions, PartOptions, ResourceWriter};
use sha2::{Digest, Sha256};

/// Reference to a stored blob, as recorded in metadata documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDataRef {
    /// Series-relative reference URI (without the `.gz` suffix; readers
    /// probe both variants).
    pub uri: String,
    /// Full lowercase hex content hash.
    pub hash: String,
    /// Payload bytes written through the sink.
    pub bytes_written: u64,
}

/// Decides whether an attribute's serialized value is large enough to
/// divert out-of-line. Private (odd-group) attributes use the smaller
/// threshold: they are rarely queried and frequently repeat byte-identical
/// across instances, so content addressing collapses them well.
pub fn should_divert(tag: &str, serialized_len: usize, config: &StoreConfig) -> bool {
    let threshold = if tags::is_private(tag) {
        config.private_bulkdata_threshold()
    } else {
        config.bulkdata_threshold()
    };
    serialized_len >= threshold
}

/// Splits a content hash into its shard directory and filename.
fn shard(hash: &str) -> (String, String) {
    (
        format!("{BULKDATA_DIR}/{}/{}", &hash[..2], &hash[2..4]),
        format!("{}.mht", &hash[4..]),
    )
}

/// Bulk store bound to a writer whose identity names the owning series.
pub struct BulkDataStore<'w, W: ResourceWriter> {
    writer: &'w W,
}

impl<'w, W: ResourceWriter> BulkDataStore<'w, W> {
    pub fn new(writer: &'w W) -> Self {
        Self { writer }
    }

    /// Writes `value` to its content-addressed location and returns the
    /// reference URI.
    ///
    /// The hash covers the concatenated chunks in order. Re-storing
    /// identical content overwrites the file with byte-identical bytes,
    /// which the close-time comparison reports as `Identical`, a no-op
    /// from any reader's perspective.
    pub async fn store(&self, value: &BinaryValue) -> StoreResult<BulkDataRef> {
        let chunks = value.flatten();
        let mut hasher = Sha256::new();
        for chunk in &chunks {
            hasher.update(chunk);
        }
        let hash = hex::encode(hasher.finalize());
        let (dir, name) = shard(&hash);

        let study = self.writer.identity().require_study_uid()?;
        let series = self.writer.identity().require_series_uid()?;
        let path = crate::paths::series_path(study.as_str(), series.as_str(), Some(&dir))?;

        let options = OpenOptions {
            gzip: true,
            multipart: Some(PartOptions {
                content_type: "application/octet-stream".to_owned(),
                content_location: Some(name.clone()),
            }),
        };
        let handle = self.writer.open_stream(&path, &name, options).await?;
        let bytes_written = match handle.sink.write_binary_value(BinaryValue::from(chunks)).await {
            Ok(written) => written,
            Err(err) => {
                let _ = self.writer.abort_stream(&handle.key).await;
                return Err(err);
            }
        };
        self.writer.close_stream(&handle.key).await?;

        Ok(BulkDataRef {
            uri: format!("{dir}/{name}"),
            hash,
            bytes_written,
        })
    }
}
