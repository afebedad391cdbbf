//! Collection registry: names to stable handles
//!
//! The registry owns the name table only; the store owns the data.
//! The engine coordinates the two (register, then create the backing
//! tree; unregister, then drop it) so the registry stays free of
//! storage concerns and is trivially reusable by other backends.
//!
//! Names are UTF-8, non-empty, NUL-free, and unique per database.
//! The empty name is not a legal registered name — it refers to the
//! default collection, which is never in this table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use lattice_core::{CollectionId, LatticeError, Result};

/// Longest accepted collection name, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Validate a collection name against the registry rules.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LatticeError::args_invalid(
            "collection name cannot be empty",
        ));
    }
    if name.contains('\0') {
        return Err(LatticeError::args_invalid(
            "collection name cannot contain NUL bytes",
        ));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(LatticeError::args_invalid(format!(
            "collection name of {} bytes exceeds maximum {}",
            name.len(),
            MAX_NAME_BYTES
        )));
    }
    Ok(())
}

/// Name table for named collections
pub struct CollectionRegistry {
    names: RwLock<HashMap<String, CollectionId>>,
    next_id: AtomicU64,
}

impl CollectionRegistry {
    /// Create an empty registry. Handle 0 is reserved for the default
    /// collection, so minted handles start at 1.
    pub fn new() -> Self {
        CollectionRegistry {
            names: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Resolve or register `name`. Returns the handle and whether it
    /// was created by this call.
    pub fn open(&self, name: &str) -> Result<(CollectionId, bool)> {
        validate_name(name)?;
        if let Some(&id) = self.names.read().get(name) {
            return Ok((id, false));
        }
        let mut names = self.names.write();
        // Raced with another opener between the read and write locks.
        if let Some(&id) = names.get(name) {
            return Ok((id, false));
        }
        let id = CollectionId::from_raw(self.next_id.fetch_add(1, Ordering::SeqCst));
        names.insert(name.to_string(), id);
        Ok((id, true))
    }

    /// Resolve `name` without registering it.
    pub fn resolve(&self, name: &str) -> Option<CollectionId> {
        self.names.read().get(name).copied()
    }

    /// Unregister `name`, invalidating its handle. The default
    /// collection is not in the table, so it can never be removed.
    pub fn remove(&self, name: &str) -> Result<CollectionId> {
        validate_name(name)?;
        self.names
            .write()
            .remove(name)
            .ok_or_else(|| LatticeError::not_found(format!("collection '{name}'")))
    }

    /// Reverse lookup, for status and error messages.
    pub fn name_of(&self, id: CollectionId) -> Option<String> {
        self.names
            .read()
            .iter()
            .find(|(_, &registered)| registered == id)
            .map(|(name, _)| name.clone())
    }

    /// Number of registered (non-default) collections.
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    /// Whether no named collections are registered.
    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("collections", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_once() {
        let registry = CollectionRegistry::new();

        let (first, created) = registry.open("graph").unwrap();
        assert!(created);
        assert!(!first.is_default());

        let (second, created) = registry.open("graph").unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_handles_are_distinct() {
        let registry = CollectionRegistry::new();
        let (a, _) = registry.open("a").unwrap();
        let (b, _) = registry.open("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.resolve("a"), Some(a));
        assert_eq!(registry.resolve("b"), Some(b));
        assert_eq!(registry.resolve("c"), None);
    }

    #[test]
    fn test_remove_invalidates_name() {
        let registry = CollectionRegistry::new();
        let (id, _) = registry.open("temp").unwrap();

        assert_eq!(registry.remove("temp").unwrap(), id);
        assert_eq!(registry.resolve("temp"), None);

        let err = registry.remove("temp").unwrap_err();
        assert_eq!(err.kind(), lattice_core::ErrorKind::NotFound);

        // Reopening mints a fresh handle.
        let (reborn, created) = registry.open("temp").unwrap();
        assert!(created);
        assert_ne!(reborn, id);
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("fine").is_ok());
        assert!(validate_name("日本語").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("nul\0byte").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_BYTES)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_BYTES + 1)).is_err());
    }

    #[test]
    fn test_name_of_reverse_lookup() {
        let registry = CollectionRegistry::new();
        let (id, _) = registry.open("edges").unwrap();
        assert_eq!(registry.name_of(id), Some("edges".to_string()));
        assert_eq!(registry.name_of(CollectionId::from_raw(999)), None);
    }

    #[test]
    fn test_concurrent_open_agrees_on_handle() {
        use std::sync::Arc;

        let registry = Arc::new(CollectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.open("shared").unwrap().0)
            })
            .collect();

        let ids: Vec<CollectionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(registry.len(), 1);
    }
}
