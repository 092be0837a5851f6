use crate::error::{StoreError, StoreResult};
use bytes::Bytes;

/// A binary attribute value: a single chunk or a recursively nested list of
/// chunks (a multi-fragment pixel value arrives as a list).
///
/// Flattening preserves order; `Bytes` chunks are reference-counted so the
/// flattened form is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryValue {
    Chunk(Bytes),
    List(Vec<BinaryValue>),
}

impl BinaryValue {
    /// Depth-first flattening into the ordered chunk sequence.
    pub fn flatten(&self) -> Vec<Bytes> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<Bytes>) {
        match self {
            BinaryValue::Chunk(chunk) => out.push(chunk.clone()),
            BinaryValue::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }

    /// Total payload length across all chunks.
    pub fn total_len(&self) -> usize {
        match self {
            BinaryValue::Chunk(chunk) => chunk.len(),
            BinaryValue::List(items) => items.iter().map(BinaryValue::total_len).sum(),
        }
    }

    /// Normalises a parsed DICOM JSON value into bytes, for diverting an
    /// attribute that was already decoded into the JSON model.
    ///
    /// Strings become their UTF-8 bytes; arrays become one chunk per
    /// element, joined by the DICOM `\` multi-value separator. Anything
    /// else has no byte representation and is rejected.
    pub fn try_from_json(value: &serde_json::Value) -> StoreResult<Self> {
        match value {
            serde_json::Value::String(s) => {
                Ok(BinaryValue::Chunk(Bytes::copy_from_slice(s.as_bytes())))
            }
            serde_json::Value::Array(items) => {
                let mut chunks = Vec::with_capacity(items.len() * 2);
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        chunks.push(BinaryValue::Chunk(Bytes::from_static(b"\\")));
                    }
                    chunks.push(Self::try_from_json(item)?);
                }
                Ok(BinaryValue::List(chunks))
            }
            _ => Err(StoreError::UnsupportedBinaryValue(
                "JSON value has no byte representation",
            )),
        }
    }
}

impl From<Bytes> for BinaryValue {
    fn from(chunk: Bytes) -> Self {
        BinaryValue::Chunk(chunk)
    }
}

impl From<Vec<u8>> for BinaryValue {
    fn from(bytes: Vec<u8>) -> Self {
        BinaryValue::Chunk(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for BinaryValue {
    fn from(bytes: &'static [u8]) -> Self {
        BinaryValue::Chunk(Bytes::from_static(bytes))
    }
}

impl From<Vec<Bytes>> for BinaryValue {
    fn from(chunks: Vec<Bytes>) -> Self {
        BinaryValue::List(chunks.into_iter().map(BinaryValue::Chunk).collect())
    }
}
