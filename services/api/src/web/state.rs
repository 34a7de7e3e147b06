//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use quill_core::ports::DatabaseService;
use quill_core::session::SessionConfig;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Settings for each editing session opened over the WebSocket.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            save_debounce: self.config.save_debounce,
        }
    }
}
