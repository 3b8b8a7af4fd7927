pub mod auth_api;
pub mod config;
pub mod http;
pub mod logging;
pub mod redact;
pub mod secrets;
pub mod session;
pub mod types;
