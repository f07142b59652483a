use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::builtin;
use crate::capability::{Capability, Category};
use crate::error::RegistryError;

/// Maps node kinds to capabilities.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it while
/// runs are in flight.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
  capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry pre-loaded with every built-in kind.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    for (kind, capability) in builtin::all() {
      registry.capabilities.insert(kind.to_string(), capability);
    }
    registry
  }

  pub fn register<C>(&mut self, kind: impl Into<String>, capability: C) -> Result<(), RegistryError>
  where
    C: Capability + 'static,
  {
    self.register_arc(kind, Arc::new(capability))
  }

  pub fn register_arc(
    &mut self,
    kind: impl Into<String>,
    capability: Arc<dyn Capability>,
  ) -> Result<(), RegistryError> {
    let kind = kind.into();
    if self.capabilities.contains_key(&kind) {
      return Err(RegistryError::DuplicateKind { kind });
    }
    debug!(kind = %kind, category = ?capability.category(), "capability_registered");
    self.capabilities.insert(kind, capability);
    Ok(())
  }

  pub fn resolve(&self, kind: &str) -> Result<Arc<dyn Capability>, RegistryError> {
    self
      .capabilities
      .get(kind)
      .cloned()
      .ok_or_else(|| RegistryError::NotFound {
        kind: kind.to_string(),
      })
  }

  pub fn category(&self, kind: &str) -> Option<Category> {
    self.capabilities.get(kind).map(|c| c.category())
  }

  pub fn check_config(&self, kind: &str, config: &serde_json::Value) -> Result<(), RegistryError> {
    let capability = self.resolve(kind)?;
    capability
      .check_config(config)
      .map_err(|message| RegistryError::InvalidConfig {
        kind: kind.to_string(),
        message,
      })
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.capabilities.contains_key(kind)
  }

  /// Registered kinds, sorted.
  pub fn kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
    kinds.sort_unstable();
    kinds
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::capability::{Invocation, Outcome};
  use crate::error::CapabilityError;
  use async_trait::async_trait;

  struct Echo;

  #[async_trait]
  impl Capability for Echo {
    fn category(&self) -> Category {
      Category::Transform
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
      Ok(Outcome::data(invocation.input()))
    }
  }

  #[test]
  fn test_resolve_unknown_kind() {
    let registry = CapabilityRegistry::new();
    let err = registry.resolve("nope").err().unwrap();
    assert!(matches!(err, RegistryError::NotFound { kind } if kind == "nope"));
  }

  #[test]
  fn test_register_and_resolve() {
    let mut registry = CapabilityRegistry::new();
    registry.register("echo", Echo).unwrap();

    assert!(registry.contains("echo"));
    assert_eq!(registry.category("echo"), Some(Category::Transform));
    assert!(registry.resolve("echo").is_ok());
  }

  #[test]
  fn test_duplicate_kind_rejected() {
    let mut registry = CapabilityRegistry::new();
    registry.register("echo", Echo).unwrap();
    let err = registry.register("echo", Echo).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateKind { .. }));
  }

  #[test]
  fn test_builtins_present() {
    let registry = CapabilityRegistry::with_builtins();
    assert_eq!(
      registry.kinds(),
      vec![
        "ai-call", "branch", "event", "log", "loop", "manual", "merge", "schedule", "set",
        "switch"
      ]
    );
  }
}
