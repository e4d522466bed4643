pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

// Re-export AppState for convenience if needed elsewhere
pub use state::AppState;

// Mock clients and app spawning, shared between unit and integration tests
pub mod test_helpers;
