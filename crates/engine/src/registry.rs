//! Capability registry — per provider type: what a call costs, how long it
//! usually takes, how often it succeeds, how many calls may run at once, and
//! whether it is available at all.
//!
//! The registry also binds each provider type to its `CapabilityProvider`
//! implementation. It is owned explicitly and handed to the executor; all
//! access goes through a single `RwLock`, so descriptors may be re-registered
//! while runs are in flight.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use providers::CapabilityProvider;

/// Static profile of one provider type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub provider_type: String,
    pub cost_per_call: f64,
    pub avg_latency_ms: u64,
    /// Historical fraction of calls that succeed, in `0.0..=1.0`.
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    /// Calls allowed in flight at once; `0` means unlimited.
    #[serde(default)]
    pub max_concurrency: usize,
    #[serde(default = "default_available")]
    pub available: bool,
    /// Free-form capability tags used by [`CapabilityRegistry::find_by_capability`].
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_success_rate() -> f64 {
    1.0
}

fn default_available() -> bool {
    true
}

impl CapabilityDescriptor {
    pub fn new(provider_type: impl Into<String>, cost_per_call: f64, avg_latency_ms: u64) -> Self {
        Self {
            provider_type: provider_type.into(),
            cost_per_call,
            avg_latency_ms,
            success_rate: default_success_rate(),
            max_concurrency: 0,
            available: true,
            capabilities: Vec::new(),
        }
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

/// Everything the executor needs to dispatch a step to a provider type.
#[derive(Clone)]
pub struct ResolvedCapability {
    pub descriptor: CapabilityDescriptor,
    pub provider: Arc<dyn CapabilityProvider>,
    /// Enforces `max_concurrency` across every run sharing this registry.
    pub permits: Arc<Semaphore>,
}

struct Entry {
    descriptor: CapabilityDescriptor,
    provider: Option<Arc<dyn CapabilityProvider>>,
    permits: Arc<Semaphore>,
}

fn permits_for(descriptor: &CapabilityDescriptor) -> Arc<Semaphore> {
    let permits = match descriptor.max_concurrency {
        0 => Semaphore::MAX_PERMITS,
        n => n,
    };
    Arc::new(Semaphore::new(permits))
}

/// Lookup table of capability descriptors keyed by provider type.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a descriptor, keeping any bound provider.
    /// Returns the descriptor it replaced.
    pub fn register(&self, descriptor: CapabilityDescriptor) -> Option<CapabilityDescriptor> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        debug!(provider_type = %descriptor.provider_type, "registering capability");

        let key = descriptor.provider_type.clone();
        match entries.get_mut(&key) {
            Some(entry) => {
                if entry.descriptor.max_concurrency != descriptor.max_concurrency {
                    entry.permits = permits_for(&descriptor);
                }
                Some(std::mem::replace(&mut entry.descriptor, descriptor))
            }
            None => {
                let permits = permits_for(&descriptor);
                entries.insert(
                    key,
                    Entry {
                        descriptor,
                        provider: None,
                        permits,
                    },
                );
                None
            }
        }
    }

    /// Register a descriptor together with its implementation.
    pub fn register_provider(
        &self,
        descriptor: CapabilityDescriptor,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Option<CapabilityDescriptor> {
        let key = descriptor.provider_type.clone();
        let previous = self.register(descriptor);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&key) {
            entry.provider = Some(provider);
        }
        previous
    }

    /// Flip a provider type's availability flag. Returns `false` if unknown.
    pub fn set_available(&self, provider_type: &str, available: bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(provider_type) {
            Some(entry) => {
                entry.descriptor.available = available;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, provider_type: &str) -> Option<CapabilityDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(provider_type).map(|e| e.descriptor.clone())
    }

    /// Available descriptors, ordered by provider type.
    pub fn list_available(&self) -> Vec<CapabilityDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut available: Vec<_> = entries
            .values()
            .filter(|e| e.descriptor.available)
            .map(|e| e.descriptor.clone())
            .collect();
        available.sort_by(|a, b| a.provider_type.cmp(&b.provider_type));
        available
    }

    /// First available descriptor (by provider type) tagged with `tag`.
    pub fn find_by_capability(&self, tag: &str) -> Option<CapabilityDescriptor> {
        self.list_available()
            .into_iter()
            .find(|d| d.capabilities.iter().any(|c| c == tag))
    }

    /// Dispatch target for `provider_type`. `None` unless the type is
    /// available and bound to an implementation.
    pub fn resolve(&self, provider_type: &str) -> Option<ResolvedCapability> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(provider_type).filter(|e| e.descriptor.available)?;
        let provider = entry.provider.clone()?;
        Some(ResolvedCapability {
            descriptor: entry.descriptor.clone(),
            provider,
            permits: Arc::clone(&entry.permits),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
