//! HTTP request/response surface.
//!
//! A stateless projection of the [`Nexus`](crate::nexus::Nexus) core: every
//! request resolves capabilities through the current registry generation
//! and reports failures as the shared error envelope.

pub mod auth;
pub mod openapi;
pub mod routes;

pub use auth::{ApiKeys, ANONYMOUS_OWNER};
pub use openapi::SchemaCache;
pub use routes::{app_router, ApiError, AppState};
