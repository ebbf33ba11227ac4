//! Capability registry: the current generation pointer and in-flight accounting.
//!
//! A [`RegistryGeneration`] is built once by the loader and never mutated.
//! The [`CapabilityRegistry`] holds an `Arc` to the current one and replaces
//! it in a single pointer swap, so readers see either the old or the new
//! generation, never a mix.
//!
//! Calls bind to a generation through a [`BoundCapability`], which keeps the
//! generation alive and counted as busy until the call finishes. The reload
//! supervisor can wait on that count before swapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

use super::capability::SharedCapability;
use super::descriptor::CapabilityDescriptor;
use crate::error::NexusError;

/// A descriptor paired with its bound callable.
#[derive(Clone)]
pub struct CapabilityEntry {
    pub descriptor: Arc<CapabilityDescriptor>,
    pub callable: SharedCapability,
}

impl CapabilityEntry {
    pub fn new(descriptor: CapabilityDescriptor, callable: SharedCapability) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            callable,
        }
    }
}

impl std::fmt::Debug for CapabilityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityEntry")
            .field("key", &self.descriptor.key)
            .finish()
    }
}

// ============================================================================
// RegistryGeneration
// ============================================================================

/// One immutable snapshot of the capability set.
pub struct RegistryGeneration {
    id: u64,
    entries: HashMap<String, CapabilityEntry>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl RegistryGeneration {
    pub fn new(id: u64, entries: HashMap<String, CapabilityEntry>) -> Self {
        Self {
            id,
            entries,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub fn empty(id: u64) -> Self {
        Self::new(id, HashMap::new())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&CapabilityEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Capability keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Descriptors sorted by key.
    pub fn descriptors(&self) -> Vec<Arc<CapabilityDescriptor>> {
        let mut descriptors: Vec<Arc<CapabilityDescriptor>> = self
            .entries
            .values()
            .map(|e| Arc::clone(&e.descriptor))
            .collect();
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Calls and jobs currently bound to this generation.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once nothing is bound to this generation.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn acquire(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            generation: Arc::clone(self),
        }
    }
}

impl std::fmt::Debug for RegistryGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryGeneration")
            .field("id", &self.id)
            .field("keys", &self.keys())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Drop for RegistryGeneration {
    fn drop(&mut self) {
        log::debug!("Registry generation {} released", self.id);
    }
}

/// Counts one in-flight call against a generation.
struct InFlightGuard {
    generation: Arc<RegistryGeneration>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.generation.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.generation.drained.notify_waiters();
        }
    }
}

/// A capability resolved for one call, pinned to the generation it came from.
///
/// Holding it keeps the callable valid even if the registry swaps underneath.
pub struct BoundCapability {
    entry: CapabilityEntry,
    guard: InFlightGuard,
}

impl BoundCapability {
    pub fn descriptor(&self) -> &Arc<CapabilityDescriptor> {
        &self.entry.descriptor
    }

    pub fn callable(&self) -> &SharedCapability {
        &self.entry.callable
    }

    pub fn generation_id(&self) -> u64 {
        self.guard.generation.id
    }
}

impl std::fmt::Debug for BoundCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundCapability")
            .field("key", &self.entry.descriptor.key)
            .field("generation", &self.generation_id())
            .finish()
    }
}

// ============================================================================
// CapabilityRegistry
// ============================================================================

/// Handle to the current generation. Cheap to clone.
#[derive(Clone)]
pub struct CapabilityRegistry {
    current: Arc<RwLock<Arc<RegistryGeneration>>>,
    next_id: Arc<AtomicU64>,
}

impl CapabilityRegistry {
    /// A registry whose current generation (id 0) is empty.
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(RegistryGeneration::empty(0)))),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The current generation.
    pub fn current(&self) -> Arc<RegistryGeneration> {
        Arc::clone(&self.current.read())
    }

    pub fn generation_id(&self) -> u64 {
        self.current.read().id
    }

    /// Reserve the id for the next generation to be built.
    pub fn next_generation_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Look up a capability in the current generation.
    pub fn resolve(&self, key: &str) -> Result<CapabilityEntry, NexusError> {
        self.current()
            .get(key)
            .cloned()
            .ok_or_else(|| NexusError::UnknownCapability(key.to_string()))
    }

    /// Resolve and pin a capability for one call.
    pub fn bind(&self, key: &str) -> Result<BoundCapability, NexusError> {
        let generation = self.current();
        let entry = generation
            .get(key)
            .cloned()
            .ok_or_else(|| NexusError::UnknownCapability(key.to_string()))?;
        Ok(BoundCapability {
            entry,
            guard: generation.acquire(),
        })
    }

    /// Install `next` as the current generation and return the previous one.
    pub fn swap(&self, next: RegistryGeneration) -> Arc<RegistryGeneration> {
        let next = Arc::new(next);
        let previous = std::mem::replace(&mut *self.current.write(), Arc::clone(&next));
        log::info!(
            "Registry generation {} -> {} ({} capabilities)",
            previous.id,
            next.id,
            next.len()
        );
        previous
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("generation", &self.generation_id())
            .finish()
    }
}
