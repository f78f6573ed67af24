//! Address resolution providers.
//!
//! A provider knows how a service running on a given backend kind can be
//! reached from outside. Backends that forward ports to the host resolve to
//! loopback; remote backends (cloud VMs) register their own strategy under
//! their kind without touching `Deployment`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::COMPOSE_KIND;

/// Loopback address for port-forwarding backends
pub const LOCALHOST: &str = "127.0.0.1";

/// Address resolution strategy for one backend kind
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Provider name, for display
    fn name(&self) -> &str;

    /// Whether service ports are forwarded to the host
    fn port_forwarding(&self) -> bool {
        true
    }

    /// Externally reachable address for the given backend hostname
    fn accessible_address(&self, hostname: &str) -> String;
}

/// Provider for backends forwarding ports to the local host
#[derive(Debug, Clone, Default)]
pub struct LocalProvider;

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "LocalProvider"
    }

    fn accessible_address(&self, _hostname: &str) -> String {
        LOCALHOST.to_string()
    }
}

/// Registry mapping backend kinds to providers
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the providers for all built-in backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(COMPOSE_KIND, Arc::new(LocalProvider));
        registry
    }

    /// Register (or replace) the provider for a backend kind
    pub fn register(&mut self, kind: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(kind.into(), provider);
    }

    /// Look up the provider for a backend kind
    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(kind).cloned()
    }
}
