pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::require_auth;
pub use rest::{
    archive_document_handler, check_in_handler, create_document_handler, get_document_handler,
    get_profile_handler, list_documents_handler, rename_document_handler, stats_range_handler,
    stats_today_handler, stats_totals_handler,
};
pub use ws_handler::ws_handler;
