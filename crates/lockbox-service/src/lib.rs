//! lockbox-service: the remote replica, a named-object store served over
//! HTTP.

pub mod config;
pub mod error;
pub mod server;

pub use config::ServiceConfig;
pub use server::{build_router, serve, AppState};
