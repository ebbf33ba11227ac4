//! # Capability Registry
//!
//! Capabilities are named operations with a typed schema, grouped into
//! bundles on disk. Each bundle directory carries a `bundle.yaml` manifest
//! that declares its capabilities and binds each one to a native handler
//! from the [`HandlerCatalog`] or to an external process.
//!
//! ## Load flow
//!
//! 1. `BundleLoader::load(paths, id)` discovers bundle directories
//! 2. Requirements go through the [`DependencyResolver`] (once per requirement set)
//! 3. Manifests become [`CapabilityDescriptor`]s, bound and validated
//! 4. The result is an immutable [`RegistryGeneration`] plus a [`LoadReport`]
//! 5. `CapabilityRegistry::swap` makes the generation current
//!
//! A bundle that fails any step is excluded and reported; others still load.

pub mod capability;
pub mod catalog;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod validate;

pub use capability::{Arguments, Capability, CapabilityError, FnCapability, SharedCapability};
pub use catalog::{HandlerCatalog, ProcessCapability};
pub use descriptor::{
    CapabilityDescriptor, CapabilityKey, ExecutionMode, ParamKind, ParameterSpec, ReturnSpec,
};
pub use error::{DescriptorError, LoadError};
pub use loader::{BundleLoader, LoadOutcome, LoadReport};
pub use registry::{BoundCapability, CapabilityEntry, CapabilityRegistry, RegistryGeneration};
pub use resolver::{CommandResolver, DependencyResolver, NoopResolver};
pub use validate::validate;
