//! # nexus
//!
//! A capability server. Capabilities are typed operations declared in
//! hot-reloadable bundles; each one is callable directly over HTTP, as a
//! durable background job, and as an MCP tool.
//!
//! The core is three pieces:
//!
//! - [`capabilities`]: descriptors, bundle loading and the generation-swapped
//!   registry
//! - [`dispatch`]: wire/native conversion and the single call entry point
//! - [`queue`]: the bounded worker pool with its crash-safe job ledger
//!
//! [`reload`] keeps the registry in step with the bundle directories, and
//! [`server`] and [`mcp`] project the whole thing onto two wire protocols.

pub mod builtin;
pub mod capabilities;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod mcp;
pub mod nexus;
pub mod queue;
pub mod reload;
pub mod server;

pub use crate::nexus::Nexus;
pub use config::NexusConfig;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{ErrorEnvelope, NexusError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
