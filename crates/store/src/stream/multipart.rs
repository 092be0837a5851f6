//! MIME multipart/related framing for stored binary parts.
//!
//! Every `.mht` file wraps its payload as exactly one part:
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: {type}[;transfer-syntax={uid}]\r\n
//! Content-Location: {name}\r\n
//! \r\n
//! {payload}\r\n
//! --{boundary}--\r\n
//! ```
//!
//! File-bound parts all use [`FIXED_BOUNDARY`] so regenerating identical
//! content produces byte-identical files; response parts use a per-response
//! generated boundary instead.

use bytes::Bytes;

/// Boundary used for every multipart file written to disk.
pub const FIXED_BOUNDARY: &str = "BOUNDARY_FIXED_32934857949532587";

/// Framing configuration for one part.
#[derive(Debug, Clone)]
pub struct MultipartFraming {
    boundary: String,
    content_type: String,
    content_location: String,
}

impl MultipartFraming {
    /// Framing with the fixed on-disk boundary.
    pub fn new(content_type: impl Into<String>, content_location: impl Into<String>) -> Self {
        Self::with_boundary(FIXED_BOUNDARY, content_type, content_location)
    }

    /// Framing with an explicit boundary (response parts).
    pub fn with_boundary(
        boundary: impl Into<String>,
        content_type: impl Into<String>,
        content_location: impl Into<String>,
    ) -> Self {
        Self {
            boundary: boundary.into(),
            content_type: content_type.into(),
            content_location: content_location.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Opening boundary line plus part headers, emitted before the first
    /// payload byte.
    pub fn header(&self) -> Bytes {
        Bytes::from(format!(
            "--{}\r\nContent-Type: {}\r\nContent-Location: {}\r\n\r\n",
            self.boundary, self.content_type, self.content_location
        ))
    }

    /// Closing boundary, emitted after the last payload byte.
    pub fn trailer(&self) -> Bytes {
        Bytes::from(format!("\r\n--{}--\r\n", self.boundary))
    }
}

/// Result of locating the payload inside a stored multipart file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPart {
    /// Byte range of the payload within the input.
    pub payload: std::ops::Range<usize>,
    /// The part's `Content-Type` header value, if present.
    pub content_type: Option<String>,
}

fn find(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || data.len() < needle.len() {
        return None;
    }
    (from..=data.len() - needle.len()).find(|&i| &data[i..i + needle.len()] == needle)
}

fn rfind(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || data.len() < needle.len() {
        return None;
    }
    (from..=data.len() - needle.len())
        .rev()
        .find(|&i| &data[i..i + needle.len()] == needle)
}

/// Locates the single part's payload and headers inside `data`.
///
/// Returns `None` when the input does not start with a boundary line, in
/// which case the caller should treat the whole input as the payload.
pub fn extract_part(data: &[u8]) -> Option<ExtractedPart> {
    if !data.starts_with(b"--") {
        return None;
    }
    let boundary_end = find(data, b"\r\n", 0)?;
    let boundary = &data[..boundary_end];

    let headers_end = find(data, b"\r\n\r\n", boundary_end)?;
    let payload_start = headers_end + 4;

    // Closing delimiter is the boundary line with a trailing "--". Search
    // from the end so payload bytes that happen to contain the delimiter
    // sequence are not cut short.
    let mut closing = Vec::with_capacity(boundary.len() + 4);
    closing.extend_from_slice(b"\r\n");
    closing.extend_from_slice(boundary);
    closing.extend_from_slice(b"--");
    let payload_end = rfind(data, &closing, payload_start)?;

    let mut content_type = None;
    let headers = &data[boundary_end + 2..headers_end];
    for line in headers.split(|&b| b == b'\n') {
        let line = std::str::from_utf8(line).ok()?.trim_end_matches('\r').trim();
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_owned());
            }
        }
    }

    Some(ExtractedPart {
        payload: payload_start..payload_end,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_trailer_shape() {
        let framing = MultipartFraming::new(
            "application/octet-stream;transfer-syntax=1.2.840.10008.1.2.1",
            "1.mht",
        );
        let header = String::from_utf8(framing.header().to_vec()).unwrap();
        assert!(header.starts_with(&format!("--{FIXED_BOUNDARY}\r\n")));
        assert!(header.contains("Content-Type: application/octet-stream;transfer-syntax=1.2.840.10008.1.2.1\r\n"));
        assert!(header.contains("Content-Location: 1.mht\r\n"));
        assert!(header.ends_with("\r\n\r\n"));
        assert_eq!(
            framing.trailer().as_ref(),
            format!("\r\n--{FIXED_BOUNDARY}--\r\n").as_bytes()
        );
    }

    #[test]
    fn extract_round_trip() {
        let framing = MultipartFraming::new("image/jp2;transfer-syntax=1.2.840.10008.1.2.4.90", "7.mht");
        let mut file = Vec::new();
        file.extend_from_slice(&framing.header());
        file.extend_from_slice(b"payload bytes \xff\x00");
        file.extend_from_slice(&framing.trailer());

        let part = extract_part(&file).unwrap();
        assert_eq!(&file[part.payload.clone()], b"payload bytes \xff\x00");
        assert_eq!(
            part.content_type.as_deref(),
            Some("image/jp2;transfer-syntax=1.2.840.10008.1.2.4.90")
        );
    }

    #[test]
    fn payload_containing_crlf_is_preserved() {
        let framing = MultipartFraming::new("application/octet-stream", "x");
        let mut file = Vec::new();
        file.extend_from_slice(&framing.header());
        file.extend_from_slice(b"line1\r\nline2\r\n");
        file.extend_from_slice(&framing.trailer());

        let part = extract_part(&file).unwrap();
        assert_eq!(&file[part.payload.clone()], b"line1\r\nline2\r\n");
    }

    #[test]
    fn non_multipart_input_returns_none() {
        assert!(extract_part(b"just bytes").is_none());
        assert!(extract_part(b"").is_none());
    }
}
