//! Dependency resolution over the component registry.
//!
//! Requested components are expanded depth-first through their `requires`
//! edges so every dependency is recorded before its dependents. The result
//! is then ordered so foundational components come first in a fixed order;
//! everything else keeps first-seen order.

use std::collections::HashSet;

use crate::error::CoreError;

use super::ComponentRegistry;

/// Foundational components, always deployed first and in this order.
pub const FOUNDATION_ORDER: [&str; 4] = ["base-system", "python", "node", "network-stack"];

/// Estimated wall-clock minutes per resolved component.
const MINUTES_PER_COMPONENT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Requested names that are not in the registry, in request order.
    #[error("Unknown components: {0:?}")]
    UnknownComponents(Vec<String>),

    /// A registry entry requires a component that is not registered.
    #[error("Component {component} requires unregistered component {missing}")]
    Unresolvable { component: String, missing: String },

    /// The `requires` graph loops; the path ends where it started.
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

impl From<ResolveError> for CoreError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownComponents(names) => CoreError::UnknownComponents(names),
            other => CoreError::Validation(other.to_string()),
        }
    }
}

/// Expand `requested` into a deduplicated, ordered deployment sequence.
///
/// Fails without partial output if any requested name is unknown, if a
/// registry entry names a missing dependency, or if the graph has a cycle.
pub fn resolve(
    registry: &ComponentRegistry,
    requested: &[String],
) -> Result<Vec<String>, ResolveError> {
    let mut unknown: Vec<String> = Vec::new();
    for name in requested {
        if !registry.contains(name) && !unknown.contains(name) {
            unknown.push(name.clone());
        }
    }
    if !unknown.is_empty() {
        return Err(ResolveError::UnknownComponents(unknown));
    }

    let mut walk = Walk {
        registry,
        visited: HashSet::new(),
        path: Vec::new(),
        order: Vec::new(),
    };
    for name in requested {
        walk.visit(name)?;
    }

    let mut order = walk.order;
    // Stable sort: non-foundation components keep first-seen order.
    order.sort_by_key(|name| priority(name));
    Ok(order)
}

/// Rough duration estimate shown when validating a request.
pub fn estimate_minutes(resolved: &[String]) -> u32 {
    resolved.len() as u32 * MINUTES_PER_COMPONENT
}

fn priority(name: &str) -> usize {
    FOUNDATION_ORDER
        .iter()
        .position(|f| *f == name)
        .unwrap_or(FOUNDATION_ORDER.len())
}

struct Walk<'a> {
    registry: &'a ComponentRegistry,
    visited: HashSet<String>,
    /// Components on the current DFS path, for cycle detection.
    path: Vec<String>,
    order: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, name: &str) -> Result<(), ResolveError> {
        if self.visited.contains(name) {
            return Ok(());
        }
        if let Some(start) = self.path.iter().position(|p| p == name) {
            let mut cycle = self.path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(ResolveError::Cycle(cycle));
        }

        let registry = self.registry;
        let Some(spec) = registry.get(name) else {
            return Err(ResolveError::Unresolvable {
                component: self.path.last().cloned().unwrap_or_default(),
                missing: name.to_string(),
            });
        };

        self.path.push(name.to_string());
        for dep in &spec.requires {
            self.visit(dep)?;
        }
        self.path.pop();

        self.visited.insert(name.to_string());
        self.order.push(name.to_string());
        Ok(())
    }
}
