//! DICOM JSON tag constants and attribute-map helpers.
//!
//! Metadata documents use the DICOM JSON model: an object keyed by
//! 8-hex-digit tag strings whose values are `{"vr": ..., "Value": [...]}`
//! attribute objects, or `{"BulkDataURI": ...}` for diverted values. Only
//! the tags the engine itself touches are named here; everything else
//! passes through opaquely.

use serde_json::{json, Map, Value};

/// A DICOM JSON attribute map (tag string -> attribute object).
pub type AttributeMap = Map<String, Value>;

pub const TRANSFER_SYNTAX_UID: &str = "00020010";
pub const SOP_CLASS_UID: &str = "00080016";
pub const SOP_INSTANCE_UID: &str = "00080018";
pub const STUDY_DATE: &str = "00080020";
pub const SERIES_DATE: &str = "00080021";
pub const STUDY_TIME: &str = "00080030";
pub const SERIES_TIME: &str = "00080031";
pub const ACCESSION_NUMBER: &str = "00080050";
pub const MODALITY: &str = "00080060";
pub const MODALITIES_IN_STUDY: &str = "00080061";
pub const STUDY_DESCRIPTION: &str = "00081030";
pub const SERIES_DESCRIPTION: &str = "0008103E";
pub const PATIENT_NAME: &str = "00100010";
pub const PATIENT_ID: &str = "00100020";
pub const ISSUER_OF_PATIENT_ID: &str = "00100021";
pub const PATIENT_BIRTH_DATE: &str = "00100030";
pub const PATIENT_SEX: &str = "00100040";
pub const BODY_PART_EXAMINED: &str = "00180015";
pub const STUDY_INSTANCE_UID: &str = "0020000D";
pub const SERIES_INSTANCE_UID: &str = "0020000E";
pub const SERIES_NUMBER: &str = "00200011";
pub const INSTANCE_NUMBER: &str = "00200013";
pub const NUMBER_OF_STUDY_RELATED_SERIES: &str = "00201206";
pub const NUMBER_OF_STUDY_RELATED_INSTANCES: &str = "00201208";
pub const NUMBER_OF_SERIES_RELATED_INSTANCES: &str = "00201209";
pub const NUMBER_OF_FRAMES: &str = "00280008";
pub const ROWS: &str = "00280010";
pub const COLUMNS: &str = "00280011";
pub const BITS_ALLOCATED: &str = "00280100";
pub const PIXEL_DATA: &str = "7FE00010";

/// Attributes copied into a series-level query summary.
pub const SERIES_QUERY_TAGS: &[&str] = &[
    STUDY_INSTANCE_UID,
    SERIES_INSTANCE_UID,
    SERIES_NUMBER,
    SERIES_DESCRIPTION,
    MODALITY,
    SERIES_DATE,
    SERIES_TIME,
    BODY_PART_EXAMINED,
];

/// Attributes copied into a per-instance query entry.
pub const INSTANCE_QUERY_TAGS: &[&str] = &[
    SOP_CLASS_UID,
    SOP_INSTANCE_UID,
    STUDY_INSTANCE_UID,
    SERIES_INSTANCE_UID,
    INSTANCE_NUMBER,
    NUMBER_OF_FRAMES,
    ROWS,
    COLUMNS,
    BITS_ALLOCATED,
];

/// Attributes copied into the study singleton / global studies index.
pub const STUDY_QUERY_TAGS: &[&str] = &[
    STUDY_INSTANCE_UID,
    STUDY_DATE,
    STUDY_TIME,
    STUDY_DESCRIPTION,
    ACCESSION_NUMBER,
    PATIENT_NAME,
    PATIENT_ID,
    ISSUER_OF_PATIENT_ID,
    PATIENT_BIRTH_DATE,
    PATIENT_SEX,
];

/// First string in an attribute's `Value` array, if any.
pub fn string_value<'a>(attrs: &'a AttributeMap, tag: &str) -> Option<&'a str> {
    attrs.get(tag)?.get("Value")?.get(0)?.as_str()
}

/// First entry of an attribute's `Value` array as an integer.
///
/// DICOM IS values arrive either as JSON numbers or as decimal strings
/// depending on the producer; both are accepted.
pub fn int_value(attrs: &AttributeMap, tag: &str) -> Option<i64> {
    let first = attrs.get(tag)?.get("Value")?.get(0)?;
    match first {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Replaces an attribute with a single-valued `{vr, Value}` object.
pub fn set_value(attrs: &mut AttributeMap, tag: &str, vr: &str, value: Value) {
    attrs.insert(tag.to_owned(), json!({ "vr": vr, "Value": [value] }));
}

/// Replaces an attribute with a multi-valued `{vr, Value}` object.
pub fn set_values(attrs: &mut AttributeMap, tag: &str, vr: &str, values: Vec<Value>) {
    attrs.insert(tag.to_owned(), json!({ "vr": vr, "Value": values }));
}

/// Removes and returns an attribute.
pub fn take(attrs: &mut AttributeMap, tag: &str) -> Option<Value> {
    attrs.remove(tag)
}

/// Replaces an attribute's inline value with a bulk-data reference.
pub fn set_bulkdata_uri(attrs: &mut AttributeMap, tag: &str, uri: &str) {
    attrs.insert(tag.to_owned(), json!({ "BulkDataURI": uri }));
}

/// The `BulkDataURI` of a diverted attribute, if this attribute is one.
pub fn bulkdata_uri<'a>(attrs: &'a AttributeMap, tag: &str) -> Option<&'a str> {
    attrs.get(tag)?.get("BulkDataURI")?.as_str()
}

/// True when the tag belongs to a private group (odd group number).
pub fn is_private(tag: &str) -> bool {
    let Some(group) = tag.get(..4) else {
        return false;
    };
    u16::from_str_radix(group, 16)
        .map(|group| group % 2 == 1)
        .unwrap_or(false)
}

/// Copies the listed tags out of `attrs` into a new map, skipping absent
/// ones. Used to derive query summaries from full metadata.
pub fn extract(attrs: &AttributeMap, tags: &[&str]) -> AttributeMap {
    let mut out = Map::new();
    for tag in tags {
        if let Some(value) = attrs.get(*tag) {
            out.insert((*tag).to_owned(), value.clone());
        }
    }
    out
}
