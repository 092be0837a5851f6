//! Attribute diversion filters.
//!
//! The external DICOM parser emits attribute events; the store consumes
//! them through an explicit, ordered chain of filters sharing one
//! capability interface: open, value, close. At attribute open the chain
//! asks each filter in order whether it claims the attribute; the first
//! claimant receives every value and the close. An unclaimed attribute
//! stays inline in the metadata document.
//!
//! Two production filters exist: [`FrameFilter`] diverts pixel data to
//! per-frame files, and [`BulkDataFilter`] diverts any other
//! over-threshold value into the content-addressed store.

use crate::bulkdata::{should_divert, BulkDataStore};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::frames::{self, FrameWriter, FRAMES_REFERENCE};
use crate::stream::BinaryValue;
use crate::tags::{self, AttributeMap};
use crate::writer::ResourceWriter;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the parser knows about an attribute when it opens.
#[derive(Debug, Clone)]
pub struct AttributeContext {
    /// 8-hex-digit tag string.
    pub tag: String,
    /// Value representation, when the transfer syntax carries one.
    pub vr: Option<String>,
    /// Declared value length; `None` for undefined-length (encapsulated)
    /// values.
    pub declared_length: Option<usize>,
}

/// How a filter left the attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Value was written out-of-line; the attribute now carries the given
    /// reference.
    Diverted(String),
    /// Value stays inline in the metadata document.
    Inline,
}

/// One stage of the diversion chain.
///
/// `value` is called once per logical value: once per frame for
/// multi-frame pixel data, once per fragment for everything else.
pub trait AttributeFilter: Send {
    /// Whether this filter claims the attribute.
    fn attribute_open(&mut self, ctx: &AttributeContext) -> bool;

    fn value<'a>(&'a mut self, chunk: Bytes) -> BoxFuture<'a, StoreResult<()>>;

    /// Finishes the attribute, rewriting `attrs` when the value was
    /// diverted.
    fn attribute_close<'a>(
        &'a mut self,
        ctx: &'a AttributeContext,
        attrs: &'a mut AttributeMap,
    ) -> BoxFuture<'a, StoreResult<Disposition>>;
}

/// Diverts over-threshold attribute values into the content-addressed
/// bulk store and rewrites them as `BulkDataURI` references.
pub struct BulkDataFilter<'w, W: ResourceWriter + Sync> {
    store: BulkDataStore<'w, W>,
    config: StoreConfig,
    chunks: Vec<Bytes>,
}

impl<'w, W: ResourceWriter + Sync> BulkDataFilter<'w, W> {
    pub fn new(writer: &'w W, config: StoreConfig) -> Self {
        Self {
            store: BulkDataStore::new(writer),
            config,
            chunks: Vec::new(),
        }
    }
}

impl<'w, W: ResourceWriter + Sync> AttributeFilter for BulkDataFilter<'w, W> {
    fn attribute_open(&mut self, ctx: &AttributeContext) -> bool {
        if ctx.tag == tags::PIXEL_DATA {
            return false;
        }
        let claimed = ctx
            .declared_length
            .map(|len| should_divert(&ctx.tag, len, &self.config))
            .unwrap_or(false);
        if claimed {
            self.chunks.clear();
        }
        claimed
    }

    fn value<'a>(&'a mut self, chunk: Bytes) -> BoxFuture<'a, StoreResult<()>> {
        self.chunks.push(chunk);
        Box::pin(async { Ok(()) })
    }

    fn attribute_close<'a>(
        &'a mut self,
        ctx: &'a AttributeContext,
        attrs: &'a mut AttributeMap,
    ) -> BoxFuture<'a, StoreResult<Disposition>> {
        Box::pin(async move {
            let value = BinaryValue::from(std::mem::take(&mut self.chunks));
            let stored = self.store.store(&value).await?;
            tags::set_bulkdata_uri(attrs, &ctx.tag, &stored.uri);
            tracing::debug!(tag = %ctx.tag, uri = %stored.uri, "diverted bulk attribute");
            Ok(Disposition::Diverted(stored.uri))
        })
    }
}

/// Diverts pixel data: each value call is one frame, written to its own
/// multipart file.
pub struct FrameFilter<'w, W: ResourceWriter + Sync> {
    frames: FrameWriter<'w, W>,
    next_frame: u32,
}

impl<'w, W: ResourceWriter + Sync> FrameFilter<'w, W> {
    pub fn new(writer: &'w W) -> Self {
        Self {
            frames: FrameWriter::new(writer),
            next_frame: 0,
        }
    }
}

impl<'w, W: ResourceWriter + Sync> AttributeFilter for FrameFilter<'w, W> {
    fn attribute_open(&mut self, ctx: &AttributeContext) -> bool {
        if ctx.tag == tags::PIXEL_DATA {
            self.next_frame = 0;
            true
        } else {
            false
        }
    }

    fn value<'a>(&'a mut self, chunk: Bytes) -> BoxFuture<'a, StoreResult<()>> {
        self.next_frame += 1;
        let frame_number = self.next_frame;
        Box::pin(async move {
            self.frames.write_frame(frame_number, chunk).await?;
            Ok(())
        })
    }

    fn attribute_close<'a>(
        &'a mut self,
        _ctx: &'a AttributeContext,
        attrs: &'a mut AttributeMap,
    ) -> BoxFuture<'a, StoreResult<Disposition>> {
        Box::pin(async move {
            frames::divert_pixel_data(attrs);
            tracing::debug!(frames = self.next_frame, "diverted pixel data");
            Ok(Disposition::Diverted(FRAMES_REFERENCE.to_owned()))
        })
    }
}

/// The ordered chain, composed once at parser-construction time.
pub struct FilterPipeline<'w> {
    filters: Vec<Box<dyn AttributeFilter + 'w>>,
    active: Option<(usize, AttributeContext)>,
}

impl<'w> FilterPipeline<'w> {
    pub fn new(filters: Vec<Box<dyn AttributeFilter + 'w>>) -> Self {
        Self {
            filters,
            active: None,
        }
    }

    /// The production chain: frames first, then bulk data.
    pub fn standard<W: ResourceWriter + Sync + 'w>(writer: &'w W, config: &StoreConfig) -> Self {
        Self::new(vec![
            Box::new(FrameFilter::new(writer)),
            Box::new(BulkDataFilter::new(writer, config.clone())),
        ])
    }

    /// Routes an attribute open to the first claiming filter. Returns
    /// whether any filter claimed it.
    pub fn attribute_open(&mut self, ctx: AttributeContext) -> bool {
        self.active = None;
        for (index, filter) in self.filters.iter_mut().enumerate() {
            if filter.attribute_open(&ctx) {
                self.active = Some((index, ctx));
                return true;
            }
        }
        false
    }

    /// Forwards one value to the claiming filter; ignored when the
    /// attribute is unclaimed (it stays inline).
    pub async fn value(&mut self, chunk: Bytes) -> StoreResult<()> {
        let Some(index) = self.active.as_ref().map(|(index, _)| *index) else {
            return Ok(());
        };
        self.filters[index].value(chunk).await
    }

    /// Closes the current attribute, applying any rewrite to `attrs`.
    pub async fn attribute_close(
        &mut self,
        attrs: &mut AttributeMap,
    ) -> StoreResult<Disposition> {
        match self.active.take() {
            Some((index, ctx)) => self.filters[index].attribute_close(&ctx, attrs).await,
            None => Ok(Disposition::Inline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityCell;
    use crate::writer::FileWriter;
    use serde_json::json;
    use std::sync::Arc;
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

    fn ctx(tag: &str, declared_length: Option<usize>) -> AttributeContext {
        AttributeContext {
            tag: tag.to_owned(),
            vr: None,
            declared_length,
        }
    }

    #[tokio::test]
    async fn over_threshold_attribute_is_diverted() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::with_identity(temp.path(), identity());
        let config = StoreConfig::new(temp.path()).with_bulkdata_threshold(64);
        let mut pipeline = FilterPipeline::standard(&writer, &config);

        let mut attrs: AttributeMap = serde_json::Map::new();
        let payload = Bytes::from(vec![0x42u8; 128]);

        assert!(pipeline.attribute_open(ctx("00420011", Some(128))));
        pipeline.value(payload).await.unwrap();
        let disposition = pipeline.attribute_close(&mut attrs).await.unwrap();

        let Disposition::Diverted(uri) = disposition else {
            panic!("expected diversion");
        };
        assert!(uri.starts_with("bulkdata/"));
        assert_eq!(tags::bulkdata_uri(&attrs, "00420011"), Some(uri.as_str()));
    }

    #[tokio::test]
    async fn under_threshold_attribute_stays_inline() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::with_identity(temp.path(), identity());
        let config = StoreConfig::new(temp.path());
        let mut pipeline = FilterPipeline::standard(&writer, &config);

        let mut attrs: AttributeMap = serde_json::from_value(json!({
            "00080060": { "vr": "CS", "Value": ["CT"] }
        }))
        .unwrap();

        assert!(!pipeline.attribute_open(ctx("00080060", Some(2))));
        let disposition = pipeline.attribute_close(&mut attrs).await.unwrap();
        assert_eq!(disposition, Disposition::Inline);
        assert_eq!(tags::string_value(&attrs, "00080060"), Some("CT"));
    }

    #[tokio::test]
    async fn private_attribute_uses_smaller_threshold() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::with_identity(temp.path(), identity());
        let config = StoreConfig::new(temp.path());
        let mut pipeline = FilterPipeline::standard(&writer, &config);

        // 2 KiB is under the public threshold but over the private one
        assert!(pipeline.attribute_open(ctx("00091010", Some(2_048))));
        assert!(!pipeline.attribute_open(ctx("00281050", Some(2_048))));
    }

    #[tokio::test]
    async fn pixel_data_goes_to_frames_not_bulkdata() {
        let temp = TempDir::new().unwrap();
        let writer = FileWriter::with_identity(temp.path(), identity());
        let config = StoreConfig::new(temp.path()).with_bulkdata_threshold(4);
        let mut pipeline = FilterPipeline::standard(&writer, &config);

        let mut attrs: AttributeMap = serde_json::Map::new();

        assert!(pipeline.attribute_open(ctx(tags::PIXEL_DATA, None)));
        for n in 0..3 {
            pipeline
                .value(Bytes::from(format!("frame-{n}")))
                .await
                .unwrap();
        }
        let disposition = pipeline.attribute_close(&mut attrs).await.unwrap();
        assert_eq!(disposition, Disposition::Diverted(FRAMES_REFERENCE.to_owned()));
        assert_eq!(
            tags::bulkdata_uri(&attrs, tags::PIXEL_DATA),
            Some(FRAMES_REFERENCE)
        );

        let frames_dir = temp
            .path()
            .join("studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/frames");
        assert_eq!(std::fs::read_dir(&frames_dir).unwrap().count(), 3);
        assert!(frames_dir.join("2.mht.gz").exists());
    }
}
