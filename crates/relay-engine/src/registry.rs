use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use relay_core::{Capability, CapabilityInfo};

use crate::error::RegistryError;

/// Canonical form of a capability name: trimmed and lowercased.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Immutable name → capability mapping, built once at startup and shared
/// by `Arc`.
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
    names: BTreeSet<String>,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a capability. The name is normalized first.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(&normalize_name(name)).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(&normalize_name(name))
    }

    /// Registered names, normalized and sorted.
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// Name and description of every capability, sorted by name.
    pub fn infos(&self) -> Vec<CapabilityInfo> {
        self.capabilities
            .iter()
            .map(|(name, cap)| CapabilityInfo {
                name: name.clone(),
                description: cap.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl RegistryBuilder {
    /// Register a capability under its normalized name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<&mut Self, RegistryError> {
        let name = normalize_name(capability.name());
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.capabilities.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let _ = self.capabilities.insert(name, capability);
        Ok(self)
    }

    /// Chaining form of [`register`](Self::register).
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Result<Self, RegistryError> {
        let _ = self.register(capability)?;
        Ok(self)
    }

    pub fn build(self) -> CapabilityRegistry {
        let names = self.capabilities.keys().cloned().collect();
        CapabilityRegistry {
            capabilities: self.capabilities,
            names,
        }
    }
}
