//! Validated primitive types shared across the DICOMweb store.
//!
//! Every study, series and SOP instance in the store is addressed by a DICOM
//! unique identifier (UID). Path derivation, the open-stream registry and the
//! summary aggregators all assume that a UID, once accepted, is safe to embed
//! in a relative filesystem path. To keep that assumption honest the store
//! never passes raw strings around: externally supplied identifiers are
//! validated once, at the boundary, and wrapped in [`Uid`].
//!
//! ## Canonical UID form
//! - 1 to 64 characters
//! - digits and `.` only
//! - no empty components (no leading/trailing dot, no `..`)
//!
//! This is deliberately stricter than some archives in the wild (which accept
//! components with leading zeros); the syntactic subset here is exactly what
//! is safe to use as a path segment, which is the property the store relies
//! on.

use std::fmt;

/// Errors that can occur when validating identifier types.
#[derive(Debug, thiserror::Error)]
pub enum UidError {
    /// The input was empty or contained only whitespace.
    #[error("UID cannot be empty")]
    Empty,
    /// The input exceeded the 64-character DICOM limit.
    #[error("UID exceeds 64 characters: '{0}'")]
    TooLong(String),
    /// The input contained characters outside `0-9` and `.`, or had an
    /// empty component.
    #[error("UID must be dot-separated digit components, got: '{0}'")]
    Malformed(String),
}

/// Result type for UID operations.
pub type UidResult<T> = Result<T, UidError>;

/// A validated DICOM unique identifier.
///
/// Once constructed, the contained string is guaranteed to be in canonical
/// form and therefore safe to use as a single path segment under the store's
/// base directory.
///
/// # Construction
/// Use [`Uid::parse`] for externally supplied identifiers. There is no
/// unchecked constructor on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(String);

impl Uid {
    /// Validates and wraps a UID string.
    ///
    /// The input is trimmed of surrounding whitespace first; DIMSE sources
    /// commonly pad UIDs to even length with a trailing space or NUL.
    ///
    /// # Errors
    ///
    /// Returns [`UidError`] if the trimmed input is empty, longer than 64
    /// characters, or not a dot-separated sequence of digit components.
    pub fn parse(input: impl AsRef<str>) -> UidResult<Self> {
        let trimmed = input.as_ref().trim().trim_end_matches('\0');
        if trimmed.is_empty() {
            return Err(UidError::Empty);
        }
        if trimmed.len() > 64 {
            return Err(UidError::TooLong(trimmed.to_owned()));
        }
        if !Self::is_canonical(trimmed) {
            return Err(UidError::Malformed(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns true if `input` is already in canonical UID form.
    ///
    /// Purely syntactic; does not trim.
    pub fn is_canonical(input: &str) -> bool {
        !input.is_empty()
            && input.len() <= 64
            && input.split('.').all(|c| {
                !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit())
            })
    }

    /// Returns the inner identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Uid {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Uid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Uid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uid::parse(&s).map_err(serde::de::Error::custom)
    }
}
