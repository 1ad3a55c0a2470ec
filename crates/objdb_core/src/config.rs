//! Database options.

use std::any::TypeId;
use std::collections::HashMap;

/// Options for opening an [`crate::ObjectDb`].
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Create a table the first time an unknown type is stored or read.
    pub auto_register_types: bool,

    /// Create a relation the first time it is opened.
    pub auto_register_relations: bool,

    /// Initial value of each transaction's skip-unknown-types flag.
    ///
    /// When set, inline objects of types with no live binding are skipped
    /// and read back as `None` instead of failing the read.
    pub skip_unknown_types: bool,

    /// Log and skip top-level rows that cannot be decoded instead of failing.
    pub self_healing: bool,

    /// Name attached to log events from this database.
    pub name: Option<String>,

    /// Number of tracked objects after which a transaction's cache switches
    /// to weakly held entries.
    pub cache_upgrade_threshold: usize,

    /// Persisted names that replace a type's declared name, keyed by type.
    pub type_names: HashMap<TypeId, String>,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            auto_register_types: true,
            auto_register_relations: true,
            skip_unknown_types: false,
            self_healing: false,
            name: None,
            cache_upgrade_threshold: 30,
            type_names: HashMap::new(),
        }
    }
}

impl DbOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables automatic type and relation registration.
    #[must_use]
    pub const fn without_auto_registration(mut self) -> Self {
        self.auto_register_types = false;
        self.auto_register_relations = false;
        self
    }

    /// Sets whether types are registered on first use.
    #[must_use]
    pub const fn auto_register_types(mut self, value: bool) -> Self {
        self.auto_register_types = value;
        self
    }

    /// Sets whether relations are registered on first use.
    #[must_use]
    pub const fn auto_register_relations(mut self, value: bool) -> Self {
        self.auto_register_relations = value;
        self
    }

    /// Sets whether unknown inline types are skipped.
    #[must_use]
    pub const fn skip_unknown_types(mut self, value: bool) -> Self {
        self.skip_unknown_types = value;
        self
    }

    /// Sets whether undecodable rows are skipped.
    #[must_use]
    pub const fn self_healing(mut self, value: bool) -> Self {
        self.self_healing = value;
        self
    }

    /// Sets the cache upgrade threshold.
    #[must_use]
    pub const fn cache_upgrade_threshold(mut self, value: usize) -> Self {
        self.cache_upgrade_threshold = value;
        self
    }

    /// Sets the database name used in log events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stores `T` under `name` instead of its declared persisted name.
    ///
    /// Applies to both object types and relations. Renaming a type in code
    /// while keeping its old name here keeps existing rows reachable.
    #[must_use]
    pub fn with_type_name<T: 'static>(mut self, name: impl Into<String>) -> Self {
        self.type_names.insert(TypeId::of::<T>(), name.into());
        self
    }

    pub(crate) fn log_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = DbOptions::default();
        assert!(options.auto_register_types);
        assert!(options.auto_register_relations);
        assert!(!options.skip_unknown_types);
        assert!(!options.self_healing);
        assert_eq!(options.cache_upgrade_threshold, 30);
    }

    #[test]
    fn builder_pattern() {
        let options = DbOptions::new()
            .without_auto_registration()
            .self_healing(true)
            .with_name("inventory");

        assert!(!options.auto_register_types);
        assert!(!options.auto_register_relations);
        assert!(options.self_healing);
        assert_eq!(options.log_name(), "inventory");
    }

    #[test]
    fn type_names_are_keyed_by_type() {
        struct Renamed;
        let options = DbOptions::new().with_type_name::<Renamed>("Legacy");
        assert_eq!(
            options.type_names.get(&TypeId::of::<Renamed>()).map(String::as_str),
            Some("Legacy")
        );
        assert!(!options.type_names.contains_key(&TypeId::of::<String>()));
    }
}
