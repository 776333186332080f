//! Shared server state

use std::sync::Arc;
use std::time::Instant;

use cohort_core::{RetrievalService, SessionManager};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RetrievalService>,
    pub sessions: Arc<SessionManager>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<RetrievalService>, sessions: Arc<SessionManager>) -> Self {
        Self { service, sessions, start_time: Instant::now() }
    }

    /// Seconds since the server came up (for `/health`).
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
