//! API Registry
//!
//! Name -> handler table populated during login. After `seal()` the table is
//! immutable for the rest of the registry's life.

use std::collections::BTreeMap;

use tracing::debug;

use crate::api::handler::{ApiSurface, SharedHandler};
use crate::error::RegistryError;

/// Names that can never be registered
const FORBIDDEN_NAMES: &[&str] = &["__proto__", "prototype", "constructor"];

#[derive(Default)]
pub struct ApiRegistry {
    handlers: BTreeMap<String, SharedHandler>,
    sealed: bool,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(&self, name: &str) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if FORBIDDEN_NAMES.contains(&name) {
            return Err(RegistryError::Forbidden(name.to_string()));
        }
        if self.handlers.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    /// Register a handler under a new name
    pub fn add(&mut self, name: &str, handler: SharedHandler) -> Result<(), RegistryError> {
        if self.sealed {
            return Err(RegistryError::Sealed { action: "add" });
        }
        self.check_name(name)?;
        debug!("Registered API '{}'", name);
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    /// Register every entry, or none of them if any entry is rejected
    pub fn add_all<I>(&mut self, entries: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = (String, SharedHandler)>,
    {
        if self.sealed {
            return Err(RegistryError::Sealed { action: "add" });
        }

        let entries: Vec<(String, SharedHandler)> = entries.into_iter().collect();
        let mut seen = std::collections::HashSet::new();
        for (name, _) in &entries {
            self.check_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(RegistryError::AlreadyExists(name.clone()));
            }
        }

        for (name, handler) in entries {
            self.handlers.insert(name, handler);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Remove a handler. Fails when sealed or when the name is unknown.
    pub fn delete(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.sealed {
            return Err(RegistryError::Sealed { action: "delete" });
        }
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        match self.handlers.remove(name) {
            Some(_) => {
                debug!("Removed API '{}'", name);
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Read-only snapshot of the current table
    pub fn expose(&self) -> ApiSurface {
        ApiSurface::from_map(self.handlers.clone())
    }

    pub fn seal(&mut self) {
        if !self.sealed {
            debug!("API registry sealed with {} entries", self.handlers.len());
        }
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Hand the current surface and the registry to `f` so it can layer
    /// more handlers on top. Fails once sealed.
    pub fn extend<F>(&mut self, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&ApiSurface, &mut ApiRegistry) -> Result<(), RegistryError>,
    {
        if self.sealed {
            return Err(RegistryError::Sealed { action: "extend" });
        }
        let surface = self.expose();
        f(&surface, self)
    }
}

impl std::fmt::Debug for ApiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRegistry")
            .field("names", &self.list())
            .field("sealed", &self.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handler::handler_fn;
    use serde_json::Value;

    fn noop() -> SharedHandler {
        handler_fn(|_args: Value| async { Ok(Value::Null) })
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut registry = ApiRegistry::new();
        registry.add("sendMessage", noop()).unwrap();

        let err = registry.add("sendMessage", noop()).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists("sendMessage".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_rejects_empty_and_forbidden() {
        let mut registry = ApiRegistry::new();
        assert_eq!(registry.add("", noop()), Err(RegistryError::EmptyName));
        assert_eq!(
            registry.add("__proto__", noop()),
            Err(RegistryError::Forbidden("__proto__".into()))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sealed_rejects_everything() {
        let mut registry = ApiRegistry::new();
        registry.add("a", noop()).unwrap();
        registry.seal();

        // Sealed wins over name validation
        for name in ["b", "a", "", "constructor"] {
            let err = registry.add(name, noop()).unwrap_err();
            assert_eq!(err.code(), "REGISTRY_SEALED");
        }
        assert!(registry.delete("a").is_err());
        assert!(registry.extend(|_, _| Ok(())).is_err());
        assert!(registry.contains("a"));
    }

    #[test]
    fn test_add_all_is_atomic() {
        let mut registry = ApiRegistry::new();
        registry.add("taken", noop()).unwrap();

        let batch = vec![("fresh".to_string(), noop()), ("taken".to_string(), noop())];
        assert!(registry.add_all(batch).is_err());
        assert!(!registry.contains("fresh"));

        let batch = vec![("one".to_string(), noop()), ("two".to_string(), noop())];
        registry.add_all(batch).unwrap();
        assert_eq!(registry.list(), vec!["one", "taken", "two"]);
    }

    #[test]
    fn test_delete_unknown_fails() {
        let mut registry = ApiRegistry::new();
        assert_eq!(
            registry.delete("ghost").unwrap_err(),
            RegistryError::NotFound("ghost".into())
        );
    }

    #[test]
    fn test_expose_is_a_snapshot() {
        let mut registry = ApiRegistry::new();
        registry.add("a", noop()).unwrap();
        let surface = registry.expose();

        registry.add("b", noop()).unwrap();
        assert_eq!(surface.names(), vec!["a"]);
        assert_eq!(registry.expose().names(), vec!["a", "b"]);
    }

    #[test]
    fn test_extend_sees_surface() {
        let mut registry = ApiRegistry::new();
        registry.add("base", noop()).unwrap();

        registry
            .extend(|surface, reg| {
                assert!(surface.contains("base"));
                reg.add("extra", noop())
            })
            .unwrap();
        assert!(registry.contains("extra"));
    }
}
