//! Class registry: entity class names to backend etypes.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Maps registered entity class names to their etype, the key that picks
/// the backend table family.
///
/// Everything that materializes entities resolves through the registry, so
/// an unregistered class fails fast with
/// [`Error::ClassNotFound`].
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, String>,
}

impl ClassRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class with its etype.
    ///
    /// Etypes become part of table names, so they must be non-empty and
    /// limited to lowercase ASCII letters, digits, and underscores.
    /// Re-registering a class replaces its etype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] for an empty class name or an
    /// invalid etype.
    pub fn register(&mut self, class: impl Into<String>, etype: impl Into<String>) -> Result<()> {
        let class = class.into();
        let etype = etype.into();
        if class.is_empty() {
            return Err(Error::invalid_parameters("empty class name"));
        }
        if etype.is_empty() || !is_valid_etype(&etype) {
            return Err(Error::invalid_parameters(format!(
                "invalid etype {etype:?}: lowercase letters, digits, and underscores only"
            )));
        }
        self.classes.insert(class, etype);
        Ok(())
    }

    /// Resolve a class to its etype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] for an unregistered class.
    pub fn resolve(&self, class: &str) -> Result<&str> {
        self.classes
            .get(class)
            .map(String::as_str)
            .ok_or_else(|| Error::class_not_found(class))
    }

    /// Whether a class is registered.
    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }
}

pub(crate) fn is_valid_etype(etype: &str) -> bool {
    etype
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
