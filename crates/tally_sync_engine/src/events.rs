//! Notifications published around every sync run.

use crate::error::SyncError;
use crate::mode::SyncMode;
use std::sync::Arc;
use tally_core::EventFeed;

/// A sync lifecycle notification.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A run started.
    Started {
        /// Resolved mode of the run.
        mode: SyncMode,
    },
    /// A run ended, successfully or not.
    Finished {
        /// Resolved mode of the run.
        mode: SyncMode,
        /// Whether anything failed, record-level failures included.
        has_errors: bool,
        /// The error that ended the run early, if any.
        error: Option<Arc<SyncError>>,
    },
}

impl SyncEvent {
    /// Returns the mode of the run the event belongs to.
    pub fn mode(&self) -> SyncMode {
        match self {
            SyncEvent::Started { mode } | SyncEvent::Finished { mode, .. } => *mode,
        }
    }
}

/// Publishes [`SyncEvent::Finished`] when dropped.
///
/// Until [`complete`](Self::complete) is called the notice reports a
/// cancelled run, which is what subscribers see if the run future is
/// dropped or unwinds half-way.
pub(crate) struct FinishNotice<'a> {
    events: &'a EventFeed<SyncEvent>,
    mode: SyncMode,
    has_errors: bool,
    error: Option<Arc<SyncError>>,
}

impl<'a> FinishNotice<'a> {
    pub(crate) fn new(events: &'a EventFeed<SyncEvent>, mode: SyncMode) -> Self {
        Self {
            events,
            mode,
            has_errors: true,
            error: Some(Arc::new(SyncError::Cancelled)),
        }
    }

    /// Records the run's outcome and publishes it.
    pub(crate) fn complete(mut self, has_errors: bool, error: Option<Arc<SyncError>>) {
        self.has_errors = has_errors;
        self.error = error;
    }
}

impl Drop for FinishNotice<'_> {
    fn drop(&mut self) {
        self.events.emit(SyncEvent::Finished {
            mode: self.mode,
            has_errors: self.has_errors,
            error: self.error.take(),
        });
    }
}
