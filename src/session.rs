//! Session collaborator.
//!
//! Login and ticket handling live outside this crate. The exporter only needs a
//! token to attach to each request and somewhere to report a 401.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Supplies auth tokens and is told when the upstream API rejects them.
pub trait Session: Send + Sync {
    /// Token to attach to the next request, if the user is logged in.
    fn token(&self) -> Option<String>;

    /// Called once when a request comes back 401, before the job fails.
    fn on_unauthorized(&self);
}

/// Session holding a fixed token. A 401 clears the token and is counted.
#[derive(Clone, Default)]
pub struct StaticSession {
    token: Arc<Mutex<Option<String>>>,
    unauthorized: Arc<AtomicUsize>,
}

impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(Mutex::new(token)),
            unauthorized: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of 401 notifications received.
    pub fn unauthorized_count(&self) -> usize {
        self.unauthorized.load(Ordering::SeqCst)
    }
}

impl Session for StaticSession {
    fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    fn on_unauthorized(&self) {
        tracing::warn!("Session rejected by upstream API, clearing token");
        self.token.lock().take();
        self.unauthorized.fetch_add(1, Ordering::SeqCst);
    }
}
