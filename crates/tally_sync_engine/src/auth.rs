//! Authentication state consumed by the sync engine.

use parking_lot::RwLock;
use tally_core::LocalId;

/// Who is signed in.
pub trait AuthProvider: Send + Sync {
    /// Returns true if a user is signed in.
    fn is_authenticated(&self) -> bool;

    /// Local ID of the signed-in user.
    fn user_id(&self) -> Option<LocalId>;
}

/// Fixed authentication state, switchable at runtime.
#[derive(Debug, Default)]
pub struct StaticAuth {
    user: RwLock<Option<LocalId>>,
}

impl StaticAuth {
    /// Signed in as `user_id`.
    pub fn signed_in(user_id: LocalId) -> Self {
        Self {
            user: RwLock::new(Some(user_id)),
        }
    }

    /// Nobody signed in.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Signs out.
    pub fn sign_out(&self) {
        *self.user.write() = None;
    }

    /// Signs in as `user_id`.
    pub fn sign_in(&self, user_id: LocalId) {
        *self.user.write() = Some(user_id);
    }
}

impl AuthProvider for StaticAuth {
    fn is_authenticated(&self) -> bool {
        self.user.read().is_some()
    }

    fn user_id(&self) -> Option<LocalId> {
        *self.user.read()
    }
}
