//! Sync mode resolution.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// What a sync run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Fetch remote changes only.
    Pull,
    /// Send local changes only.
    Push,
    /// Pull, then push.
    Full,
    /// Push if a pull happened recently, otherwise full.
    Auto,
}

impl SyncMode {
    /// Returns true if the mode fetches remote changes.
    pub fn includes_pull(&self) -> bool {
        matches!(self, SyncMode::Pull | SyncMode::Full)
    }

    /// Returns true if the mode sends local changes.
    pub fn includes_push(&self) -> bool {
        matches!(self, SyncMode::Push | SyncMode::Full)
    }

    /// Resolves [`SyncMode::Auto`] to a concrete mode.
    ///
    /// `Auto` becomes `Push` when `last_run` lies within `window` before
    /// `now`, and `Full` otherwise. Concrete modes are returned unchanged.
    pub fn resolve(
        self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> SyncMode {
        if self != SyncMode::Auto {
            return self;
        }
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        match (last_run, now.checked_sub_signed(window)) {
            (Some(last_run), Some(threshold)) if last_run > threshold => SyncMode::Push,
            _ => SyncMode::Full,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::Pull => "pull",
            SyncMode::Push => "push",
            SyncMode::Full => "full",
            SyncMode::Auto => "auto",
        };
        f.write_str(name)
    }
}
