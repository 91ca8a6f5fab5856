//! Application state

use std::sync::Arc;
use std::time::Duration;

use crate::persistence::Store;
use crate::provider::Providers;

/// Shared application state
pub struct AppState {
    pub store: Store,
    pub providers: Providers,
    /// Pause between streamed delta chunks.
    pub chunk_delay: Duration,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(store: Store, providers: Providers, chunk_delay: Duration) -> SharedState {
        Arc::new(Self {
            store,
            providers,
            chunk_delay,
        })
    }
}
