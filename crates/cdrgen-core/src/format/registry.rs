//! Format Registry
//!
//! Explicit name -> format mapping. Built once during process
//! initialization (see [`FormatRegistry::with_builtin_formats`]) and shared
//! read-only afterwards, typically behind an `Arc`. Registration takes
//! `&mut self`, so uniqueness is enforced without any runtime locking.

use super::{CdrFormat, VestaFormat, ViperFormat};
use crate::error::FormatError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Case-insensitive registry of CDR formats
#[derive(Default)]
pub struct FormatRegistry {
    /// Keyed by lowercase name; BTreeMap keeps names sorted
    formats: BTreeMap<String, Arc<dyn CdrFormat>>,
}

impl FormatRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every format shipped with the crate
    pub fn with_builtin_formats() -> Self {
        let mut registry = Self::new();
        // Built-in names are distinct, so these cannot collide
        let _ = registry.register(Arc::new(VestaFormat));
        let _ = registry.register(Arc::new(ViperFormat));
        registry
    }

    /// Add a format; fails if its lowercase name is already taken
    pub fn register(&mut self, format: Arc<dyn CdrFormat>) -> Result<(), FormatError> {
        let name = format.name().to_lowercase();
        if self.formats.contains_key(&name) {
            return Err(FormatError::DuplicateFormat(name));
        }
        self.formats.insert(name, format);
        Ok(())
    }

    /// Look up a format by name (case-insensitive)
    pub fn get(&self, name: &str) -> Result<Arc<dyn CdrFormat>, FormatError> {
        self.formats
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| FormatError::UnknownFormat(name.to_string()))
    }

    /// All registered names, sorted
    pub fn list(&self) -> Vec<String> {
        self.formats.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Visit every registered format in name order
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &dyn CdrFormat),
    {
        for (name, format) in &self.formats {
            f(name, format.as_ref());
        }
    }
}
