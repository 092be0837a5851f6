//! Relative path construction for DICOMweb resources.
//!
//! This module contains **no I/O logic**, only deterministic string
//! construction. Paths are `/`-joined relative strings; the base directory
//! is applied exactly once, at the filesystem boundary, by the reader and
//! writer services.
//!
//! Layout:
//!
//! ```text
//! studies/{studyUID}
//! studies/{studyUID}/series/{seriesUID}
//! studies/{studyUID}/series/{seriesUID}/instances/{sopInstanceUID}
//! studies/{studyUID}/series/{seriesUID}/instances/{sopInstanceUID}/frames
//! ```

use crate::error::{StoreError, StoreResult};
use wado_types::Uid;

/// Top-level directory holding every study.
pub const STUDIES_DIR: &str = "studies";
/// Per-study directory holding every series.
pub const SERIES_DIR: &str = "series";
/// Per-series directory holding every SOP instance.
pub const INSTANCES_DIR: &str = "instances";
/// Per-instance directory holding extracted pixel frames.
pub const FRAMES_DIR: &str = "frames";
/// Per-series directory holding content-addressed bulk data.
pub const BULKDATA_DIR: &str = "bulkdata";

fn checked(uid: &str, level: &str) -> StoreResult<()> {
    if Uid::is_canonical(uid) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentity(format!(
            "{level} UID is empty or not canonical: '{uid}'"
        )))
    }
}

fn with_sub(mut path: String, sub: Option<&str>) -> String {
    if let Some(sub) = sub {
        if !sub.is_empty() {
            path.push('/');
            path.push_str(sub);
        }
    }
    path
}

/// Relative path of a study, optionally extended with a sub-path.
pub fn study_path(study_uid: &str, sub: Option<&str>) -> StoreResult<String> {
    checked(study_uid, "study")?;
    Ok(with_sub(format!("{STUDIES_DIR}/{study_uid}"), sub))
}

/// Relative path of a series, optionally extended with a sub-path.
pub fn series_path(study_uid: &str, series_uid: &str, sub: Option<&str>) -> StoreResult<String> {
    checked(series_uid, "series")?;
    let study = study_path(study_uid, None)?;
    Ok(with_sub(format!("{study}/{SERIES_DIR}/{series_uid}"), sub))
}

/// Relative path of a SOP instance, optionally extended with a sub-path.
pub fn instance_path(
    study_uid: &str,
    series_uid: &str,
    sop_instance_uid: &str,
    sub: Option<&str>,
) -> StoreResult<String> {
    checked(sop_instance_uid, "SOP instance")?;
    let series = series_path(study_uid, series_uid, None)?;
    Ok(with_sub(
        format!("{series}/{INSTANCES_DIR}/{sop_instance_uid}"),
        sub,
    ))
}

/// Relative path of the frames directory of a SOP instance.
pub fn frames_path(
    study_uid: &str,
    series_uid: &str,
    sop_instance_uid: &str,
) -> StoreResult<String> {
    instance_path(study_uid, series_uid, sop_instance_uid, Some(FRAMES_DIR))
}
