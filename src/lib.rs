pub mod auth;
pub mod cluster;
pub mod confidence;
pub mod error;
pub mod lifecycle;
pub mod location;
pub mod models;
pub mod openapi;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;
pub mod updates;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
