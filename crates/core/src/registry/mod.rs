//! Static component registry and dependency resolution.
//!
//! The registry is built once at startup and shared read-only. Entries name
//! the components they directly require; [`resolver::resolve`] expands a
//! request into the full, ordered deployment sequence.

pub mod resolver;

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::CoreError;

pub use resolver::{estimate_minutes, resolve, ResolveError};

/// One deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentSpec {
    pub name: String,
    /// Platform tag (`universal`, `macos`, `ubuntu`, `orangepi`).
    pub platform: String,
    pub description: String,
    /// Names of components that must be deployed first.
    pub requires: Vec<String>,
}

impl ComponentSpec {
    pub fn new(name: &str, platform: &str, description: &str, requires: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            platform: platform.to_string(),
            description: description.to_string(),
            requires: requires.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Read-only table of known components, in declaration order.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    components: Vec<ComponentSpec>,
    index: HashMap<String, usize>,
}

impl ComponentRegistry {
    /// Build a registry from explicit entries. Duplicate names are rejected.
    pub fn from_specs(components: Vec<ComponentSpec>) -> Result<Self, CoreError> {
        let mut index = HashMap::with_capacity(components.len());
        for (i, spec) in components.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(CoreError::Validation(format!(
                    "Duplicate component in registry: {}",
                    spec.name
                )));
            }
        }
        Ok(Self { components, index })
    }

    /// The catalogue of components shipped with the automation repository.
    pub fn builtin() -> Self {
        let components = vec![
            ComponentSpec::new(
                "base-system",
                "universal",
                "Foundation system configuration",
                &[],
            ),
            ComponentSpec::new(
                "python",
                "universal",
                "Python runtime environment",
                &["base-system"],
            ),
            ComponentSpec::new(
                "node",
                "universal",
                "Node.js runtime environment",
                &["base-system"],
            ),
            ComponentSpec::new(
                "network-stack",
                "universal",
                "Network configuration including Tailscale",
                &["base-system"],
            ),
            ComponentSpec::new(
                "macos-api",
                "macos",
                "macOS API service",
                &["python", "base-system"],
            ),
            ComponentSpec::new(
                "macos-tracker",
                "macos",
                "Tracker AI tracking service",
                &["python", "base-system", "macos-api"],
            ),
            ComponentSpec::new(
                "alpr",
                "macos",
                "ALPR license plate recognition",
                &["python", "base-system"],
            ),
            ComponentSpec::new(
                "ubuntu-docker",
                "ubuntu",
                "Docker environment for Ubuntu",
                &["base-system"],
            ),
            ComponentSpec::new(
                "opi-player",
                "orangepi",
                "Media player service for OrangePi",
                &["base-system", "python"],
            ),
        ];

        // Names are literals above and unique.
        let index = components
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();
        Self { components, index }
    }

    pub fn get(&self, name: &str) -> Option<&ComponentSpec> {
        self.index.get(name).map(|&i| &self.components[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// All entries in declaration order.
    pub fn components(&self) -> &[ComponentSpec] {
        &self.components
    }

    /// Entries grouped by platform tag; groups keep declaration order.
    pub fn components_by_platform(&self) -> BTreeMap<&str, Vec<&ComponentSpec>> {
        let mut grouped: BTreeMap<&str, Vec<&ComponentSpec>> = BTreeMap::new();
        for spec in &self.components {
            grouped.entry(spec.platform.as_str()).or_default().push(spec);
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_requirements_are_registered() {
        let registry = ComponentRegistry::builtin();
        for spec in registry.components() {
            for dep in &spec.requires {
                assert!(
                    registry.contains(dep),
                    "{} requires unregistered {dep}",
                    spec.name
                );
            }
        }
    }

    #[test]
    fn lookup_by_name() {
        let registry = ComponentRegistry::builtin();
        let api = registry.get("macos-api").expect("macos-api registered");
        assert_eq!(api.platform, "macos");
        assert_eq!(api.requires, vec!["python", "base-system"]);
        assert!(registry.get("bogus").is_none());
    }

    #[test]
    fn duplicate_names_rejected() {
        let result = ComponentRegistry::from_specs(vec![
            ComponentSpec::new("python", "universal", "a", &[]),
            ComponentSpec::new("python", "universal", "b", &[]),
        ]);
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn grouped_by_platform() {
        let registry = ComponentRegistry::builtin();
        let grouped = registry.components_by_platform();
        let macos: Vec<_> = grouped["macos"].iter().map(|c| c.name.as_str()).collect();
        assert_eq!(macos, vec!["macos-api", "macos-tracker", "alpr"]);
        assert_eq!(grouped["orangepi"].len(), 1);
        let total: usize = grouped.values().map(Vec::len).sum();
        assert_eq!(total, registry.len());
    }
}
