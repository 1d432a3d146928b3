use crate::models::Session;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Please login first from the Login page.")]
pub struct NotSignedIn;

/// Authenticated identity and bearer token for one client session.
///
/// Created empty, filled at sign-in, emptied at sign-out. Nothing is
/// persisted beyond the process.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_session(&self) -> Option<Arc<Session>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_session(&self, session: Session) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(session));
    }

    pub fn clear_session(&self) -> Option<Arc<Session>> {
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Access gate for protected pages.
    pub fn require(&self) -> Result<Arc<Session>, NotSignedIn> {
        self.get_session().ok_or(NotSignedIn)
    }
}
