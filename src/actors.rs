// SPDX-License-Identifier: Apache-2.0

//! Actor name resolution.
//!
//! The firewall keys rules by numeric actor id. Hosts own the mapping from
//! role names to ids and expose it through [`ActorDirectory`].

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{FirewallError, FirewallResult};
use crate::store::ActorId;

pub trait ActorDirectory: Send + Sync {
    /// Id of the named actor, if it exists.
    fn resolve(&self, name: &str) -> Option<ActorId>;

    /// Name of `actor`, shown next to its rules in the rule view.
    fn name_of(&self, actor: ActorId) -> Option<String>;
}

/// Resolves an operator-supplied actor name. The empty name selects the
/// any-actor scope.
pub fn resolve_actor(directory: &dyn ActorDirectory, name: &str) -> FirewallResult<ActorId> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(ActorId::ANY);
    }
    directory
        .resolve(name)
        .filter(|id| !id.is_any())
        .ok_or_else(|| FirewallError::UnknownActor {
            name: name.to_string(),
        })
}

/// In-memory directory for hosts without their own catalog
#[derive(Debug, Default)]
pub struct ActorRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_name: HashMap<String, ActorId>,
    next_id: u32,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` and returns its id. Registering a known name returns
    /// the existing id.
    pub fn register(&self, name: &str) -> ActorId {
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_name.get(name) {
            return *id;
        }
        inner.next_id = inner
            .next_id
            .max(inner.by_name.values().map(|id| id.0).max().unwrap_or(0))
            + 1;
        let id = ActorId(inner.next_id);
        inner.by_name.insert(name.to_string(), id);
        id
    }

    /// Registers `name` under a fixed id, replacing any previous mapping.
    pub fn insert(&self, name: &str, id: ActorId) -> FirewallResult<()> {
        if id.is_any() || name.trim().is_empty() {
            return Err(FirewallError::UnknownActor {
                name: name.to_string(),
            });
        }
        self.inner.write().by_name.insert(name.to_string(), id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_name.is_empty()
    }
}

impl ActorDirectory for ActorRegistry {
    fn resolve(&self, name: &str) -> Option<ActorId> {
        self.inner.read().by_name.get(name).copied()
    }

    fn name_of(&self, actor: ActorId) -> Option<String> {
        self.inner
            .read()
            .by_name
            .iter()
            .find(|(_, id)| **id == actor)
            .map(|(name, _)| name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_fresh_ids() {
        let registry = ActorRegistry::new();
        let alice = registry.register("alice");
        let bob = registry.register("bob");
        assert!(!alice.is_any());
        assert_ne!(alice, bob);
        assert_eq!(registry.register("alice"), alice);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn fixed_ids_are_respected_by_later_registrations() {
        let registry = ActorRegistry::new();
        registry.insert("app", ActorId(40)).unwrap();
        assert_eq!(registry.register("batch"), ActorId(41));
        assert!(registry.insert("nobody", ActorId::ANY).is_err());
        assert_eq!(registry.name_of(ActorId(40)).as_deref(), Some("app"));
    }

    #[test]
    fn empty_name_is_any_and_unknown_is_rejected() {
        let registry = ActorRegistry::new();
        let app = registry.register("app");
        assert_eq!(resolve_actor(&registry, "").unwrap(), ActorId::ANY);
        assert_eq!(resolve_actor(&registry, " app ").unwrap(), app);
        assert_eq!(
            resolve_actor(&registry, "ghost").unwrap_err(),
            FirewallError::UnknownActor {
                name: "ghost".into()
            }
        );
    }
}
