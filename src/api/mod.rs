pub mod middleware;
pub mod routes;

// Re-export public types and functions
pub use middleware::{SignedQuery, VerifiedUrl, log_request_errors, signed_url_middleware};
pub use routes::{AudioUrlQuery, get_audio_url, health, method_not_allowed, serve_audio};
