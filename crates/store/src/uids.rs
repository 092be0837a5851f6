//! Transfer-syntax registry.
//!
//! Maps a pixel-data transfer syntax UID to the outgoing frame content type
//! and the storage gzip policy. Gzip is applied only to uncompressed pixel
//! encodings; recompressing JPEG-family payloads wastes CPU for no size
//! benefit.
//!
//! See DICOM PS3.18 §8.7.3.3.2 for the media-type assignments.

const OCTET_STREAM: &str = "application/octet-stream";
const JPEG: &str = "image/jpeg";
const JLS: &str = "image/jls";
const JLL: &str = "image/jll";
const JXL: &str = "image/x-jxl";
const HTJ2K: &str = "image/jphc";
const JP2: &str = "image/jp2";
const RLE: &str = "image/dicom-rle";

/// Storage-relevant properties of one transfer syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSyntax {
    pub uid: &'static str,
    pub content_type: &'static str,
    /// Uncompressed pixel encoding; frame files for these are gzip-wrapped.
    pub uncompressed: bool,
    pub lossy: bool,
}

const fn uncompressed(uid: &'static str) -> TransferSyntax {
    TransferSyntax {
        uid,
        content_type: OCTET_STREAM,
        uncompressed: true,
        lossy: false,
    }
}

const fn encapsulated(uid: &'static str, content_type: &'static str, lossy: bool) -> TransferSyntax {
    TransferSyntax {
        uid,
        content_type,
        uncompressed: false,
        lossy,
    }
}

/// Known transfer syntaxes, in UID order.
const REGISTRY: &[TransferSyntax] = &[
    uncompressed("1.2.840.10008.1.2"),
    uncompressed("1.2.840.10008.1.2.1"),
    uncompressed("1.2.840.10008.1.2.1.99"),
    uncompressed("1.2.840.10008.1.2.2"),
    encapsulated("1.2.840.10008.1.2.4.50", JPEG, true),
    encapsulated("1.2.840.10008.1.2.4.51", JPEG, true),
    encapsulated("1.2.840.10008.1.2.4.57", JPEG, false),
    encapsulated("1.2.840.10008.1.2.4.70", JLL, false),
    encapsulated("1.2.840.10008.1.2.4.80", JLS, false),
    encapsulated("1.2.840.10008.1.2.4.81", JLS, true),
    encapsulated("1.2.840.10008.1.2.4.90", JP2, false),
    encapsulated("1.2.840.10008.1.2.4.91", JP2, true),
    encapsulated("1.2.840.10008.1.2.4.140", JXL, false),
    encapsulated("1.2.840.10008.1.2.4.141", JXL, true),
    encapsulated("1.2.840.10008.1.2.4.142", JXL, true),
    encapsulated("1.2.840.10008.1.2.4.201", HTJ2K, false),
    encapsulated("1.2.840.10008.1.2.4.202", HTJ2K, false),
    encapsulated("1.2.840.10008.1.2.4.203", HTJ2K, true),
    encapsulated("1.2.840.10008.1.2.5", RLE, false),
];

/// Fallback for unrecognised transfer syntaxes: serve as octet-stream and
/// assume the payload is already compressed.
const DEFAULT: TransferSyntax = TransferSyntax {
    uid: "",
    content_type: OCTET_STREAM,
    uncompressed: false,
    lossy: false,
};

/// Looks up a transfer syntax, falling back to the default entry.
pub fn lookup(uid: &str) -> TransferSyntax {
    REGISTRY
        .iter()
        .find(|ts| ts.uid == uid)
        .copied()
        .unwrap_or(DEFAULT)
}

/// The `Content-Type` header value for a frame stored under `uid`,
/// including the `transfer-syntax` parameter.
pub fn frame_content_type(uid: &str) -> String {
    format!("{};transfer-syntax={}", lookup(uid).content_type, uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_syntaxes_gzip() {
        assert!(lookup("1.2.840.10008.1.2").uncompressed);
        assert!(lookup("1.2.840.10008.1.2.1").uncompressed);
        assert!(!lookup("1.2.840.10008.1.2.4.50").uncompressed);
        assert!(!lookup("1.2.840.10008.1.2.5").uncompressed);
    }

    #[test]
    fn unknown_syntax_falls_back() {
        let ts = lookup("1.2.3.4.5");
        assert_eq!(ts.content_type, "application/octet-stream");
        assert!(!ts.uncompressed);
    }

    #[test]
    fn content_type_carries_transfer_syntax_parameter() {
        assert_eq!(
            frame_content_type("1.2.840.10008.1.2.4.90"),
            "image/jp2;transfer-syntax=1.2.840.10008.1.2.4.90"
        );
        assert_eq!(
            frame_content_type("1.2.840.10008.1.2.1"),
            "application/octet-stream;transfer-syntax=1.2.840.10008.1.2.1"
        );
    }
}
