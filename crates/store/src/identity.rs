//! Resource identity, populated progressively during a parse.
//!
//! The DICOM parser discovers the study/series/instance UIDs and the
//! transfer syntax at different points in the byte stream, while output
//! streams are opened lazily as attributes arrive. [`IdentityCell`] holds
//! the four fields with write-once semantics: each field may be set exactly
//! once (setting the same value again is a no-op, a conflicting value is an
//! error), and a completion hook fires the moment the last field arrives.
//! Consumers read fields at stream-open time and get a precise
//! `MissingIdentity` error when they ask too early.

use crate::error::{StoreError, StoreResult};
use std::sync::Mutex;
use wado_types::Uid;

/// A complete identity snapshot, available once all four fields are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub study_uid: Uid,
    pub series_uid: Uid,
    pub sop_instance_uid: Uid,
    pub transfer_syntax_uid: Uid,
}

type CompletionHook = Box<dyn FnOnce(&ResourceIdentity) + Send>;

#[derive(Default)]
struct Fields {
    study_uid: Option<Uid>,
    series_uid: Option<Uid>,
    sop_instance_uid: Option<Uid>,
    transfer_syntax_uid: Option<Uid>,
    on_complete: Option<CompletionHook>,
}

impl Fields {
    fn snapshot(&self) -> Option<ResourceIdentity> {
        Some(ResourceIdentity {
            study_uid: self.study_uid.clone()?,
            series_uid: self.series_uid.clone()?,
            sop_instance_uid: self.sop_instance_uid.clone()?,
            transfer_syntax_uid: self.transfer_syntax_uid.clone()?,
        })
    }
}

/// Write-once identity fields shared between the parser and the writer.
#[derive(Default)]
pub struct IdentityCell {
    inner: Mutex<Fields>,
}

macro_rules! field_accessors {
    ($set:ident, $require:ident, $field:ident, $name:literal) => {
        /// Sets the field. Setting an identical value again is a no-op;
        /// a conflicting value is rejected.
        pub fn $set(&self, uid: Uid) -> StoreResult<()> {
            self.set_field(|fields| &mut fields.$field, uid, $name)
        }

        /// Returns the field or `MissingIdentity` if not yet populated.
        pub fn $require(&self) -> StoreResult<Uid> {
            self.inner
                .lock()
                .expect("identity lock")
                .$field
                .clone()
                .ok_or(StoreError::MissingIdentity($name))
        }
    };
}

impl IdentityCell {
    pub fn new() -> Self {
        Self::default()
    }

    field_accessors!(set_study_uid, require_study_uid, study_uid, "StudyInstanceUID");
    field_accessors!(set_series_uid, require_series_uid, series_uid, "SeriesInstanceUID");
    field_accessors!(
        set_sop_instance_uid,
        require_sop_instance_uid,
        sop_instance_uid,
        "SOPInstanceUID"
    );
    field_accessors!(
        set_transfer_syntax_uid,
        require_transfer_syntax_uid,
        transfer_syntax_uid,
        "TransferSyntaxUID"
    );

    /// Registers a hook fired once, when the last of the four fields is
    /// populated. If the identity is already complete the hook fires
    /// immediately on the calling task.
    pub fn on_complete(&self, hook: impl FnOnce(&ResourceIdentity) + Send + 'static) {
        let ready = {
            let mut fields = self.inner.lock().expect("identity lock");
            match fields.snapshot() {
                Some(identity) => Some(identity),
                None => {
                    fields.on_complete = Some(Box::new(hook));
                    return;
                }
            }
        };
        if let Some(identity) = ready {
            hook(&identity);
        }
    }

    /// Returns the full identity once every field is present.
    pub fn snapshot(&self) -> Option<ResourceIdentity> {
        self.inner.lock().expect("identity lock").snapshot()
    }

    fn set_field(
        &self,
        select: impl FnOnce(&mut Fields) -> &mut Option<Uid>,
        uid: Uid,
        name: &'static str,
    ) -> StoreResult<()> {
        let (hook, identity) = {
            let mut fields = self.inner.lock().expect("identity lock");
            let slot = select(&mut fields);
            match slot {
                Some(existing) if *existing == uid => return Ok(()),
                Some(existing) => {
                    return Err(StoreError::InvalidIdentity(format!(
                        "{name} already set to '{existing}', rejecting '{uid}'"
                    )));
                }
                None => *slot = Some(uid),
            }
            match fields.snapshot() {
                Some(identity) => (fields.on_complete.take(), Some(identity)),
                None => (None, None),
            }
        };
        if let (Some(hook), Some(identity)) = (hook, identity) {
            hook(&identity);
        }
        Ok(())
    }
}

impl std::fmt::Debug for IdentityCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self.inner.lock().expect("identity lock");
        f.debug_struct("IdentityCell")
            .field("study_uid", &fields.study_uid)
            .field("series_uid", &fields.series_uid)
            .field("sop_instance_uid", &fields.sop_instance_uid)
            .field("transfer_syntax_uid", &fields.transfer_syntax_uid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    #[test]
    fn fields_are_write_once() {
        let cell = IdentityCell::new();
        cell.set_study_uid(uid("1.2.3")).unwrap();
        // same value is fine
        cell.set_study_uid(uid("1.2.3")).unwrap();
        // conflicting value is not
        assert!(matches!(
            cell.set_study_uid(uid("9.9.9")),
            Err(StoreError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn require_reports_the_missing_field() {
        let cell = IdentityCell::new();
        cell.set_study_uid(uid("1.2.3")).unwrap();
        assert!(cell.require_study_uid().is_ok());
        match cell.require_series_uid() {
            Err(StoreError::MissingIdentity(name)) => assert_eq!(name, "SeriesInstanceUID"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn completion_hook_fires_on_last_field() {
        let cell = IdentityCell::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let observer = fired.clone();
        cell.on_complete(move |identity| {
            assert_eq!(identity.sop_instance_uid.as_str(), "1.2.3.3");
            observer.fetch_add(1, Ordering::SeqCst);
        });

        cell.set_study_uid(uid("1.2.3.1")).unwrap();
        cell.set_series_uid(uid("1.2.3.2")).unwrap();
        cell.set_transfer_syntax_uid(uid("1.2.840.10008.1.2.1")).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        cell.set_sop_instance_uid(uid("1.2.3.3")).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_hook_fires_immediately_when_already_complete() {
        let cell = IdentityCell::new();
        cell.set_study_uid(uid("1.1")).unwrap();
        cell.set_series_uid(uid("1.2")).unwrap();
        cell.set_sop_instance_uid(uid("1.3")).unwrap();
        cell.set_transfer_syntax_uid(uid("1.2.840.10008.1.2")).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let observer = fired.clone();
        cell.on_complete(move |_| {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
