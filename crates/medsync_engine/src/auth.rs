//! Authentication context consumed by the operation queue.

use parking_lot::RwLock;

/// Source of the currently signed-in user.
///
/// The operation queue asks for the user id on every enqueue; `None`
/// makes the enqueue fail with `AuthenticationRequired`.
pub trait AuthContext: Send + Sync {
    /// Returns the signed-in user's id, if any.
    fn current_user_id(&self) -> Option<String>;
}

/// An auth context holding a user id set by the host application.
#[derive(Debug, Default)]
pub struct SessionAuth {
    user_id: RwLock<Option<String>>,
}

impl SessionAuth {
    /// Creates a context with a signed-in user.
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: RwLock::new(Some(user_id.into())),
        }
    }

    /// Creates a context with nobody signed in.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Signs a user in.
    pub fn sign_in(&self, user_id: impl Into<String>) {
        *self.user_id.write() = Some(user_id.into());
    }

    /// Signs the current user out.
    pub fn sign_out(&self) {
        *self.user_id.write() = None;
    }
}

impl AuthContext for SessionAuth {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }
}
