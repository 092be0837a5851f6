//! Per-frame pixel data storage.
//!
//! Each discrete frame of a multi-frame pixel attribute is written to its
//! own multipart file `frames/{n}.mht[.gz]` (1-based). The gzip choice is
//! derived from the transfer syntax, not configurable per frame. Once all
//! frames are out, the pixel-data attribute in the owning metadata
//! document is replaced with an instance-relative location reference.

use crate::error::StoreResult;
use crate::stream::BinaryValue;
use crate::tags::{self, AttributeMap};
use crate::writer::ResourceWriter;

/// Instance-relative reference recorded in place of inline pixel data.
pub const FRAMES_REFERENCE: &str = "./frames";

/// Writes pixel frames through a writer whose identity names the owning
/// instance and transfer syntax.
pub struct FrameWriter<'w, W: ResourceWriter> {
    writer: &'w W,
}

impl<'w, W: ResourceWriter + Sync> FrameWriter<'w, W> {
    pub fn new(writer: &'w W) -> Self {
        Self { writer }
    }

    /// Writes one frame (1-based) and returns its payload byte count.
    pub async fn write_frame(
        &self,
        frame_number: u32,
        value: impl Into<BinaryValue>,
    ) -> StoreResult<u64> {
        let handle = self.writer.open_frame_stream(frame_number).await?;
        match handle.sink.write_binary_value(value).await {
            Ok(written) => {
                self.writer.close_stream(&handle.key).await?;
                Ok(written)
            }
            Err(err) => {
                let _ = self.writer.abort_stream(&handle.key).await;
                Err(err)
            }
        }
    }

}

/// Replaces the pixel-data attribute's inline payload with the `./frames`
/// location reference. Call after the last frame completes.
pub fn divert_pixel_data(attrs: &mut AttributeMap) {
    tags::set_bulkdata_uri(attrs, tags::PIXEL_DATA, FRAMES_REFERENCE);
}
