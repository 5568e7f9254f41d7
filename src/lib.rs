pub mod auth;
pub mod commission;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod openapi;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;
pub mod upstream;

// Re-exports for tests and embedding
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
