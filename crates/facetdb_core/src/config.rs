//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix prepended to every backend table name.
    pub table_prefix: String,

    /// Number of accesses before an entity is promoted into the cache.
    pub cache_threshold: u32,

    /// Maximum number of distinct guids the cache holds. Zero disables
    /// caching entirely (access counts are still tracked).
    pub cache_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_prefix: "facet_".to_string(),
            cache_threshold: 4,
            cache_limit: 50,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backend table name prefix.
    #[must_use]
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Sets the cache promotion threshold.
    #[must_use]
    pub const fn cache_threshold(mut self, value: u32) -> Self {
        self.cache_threshold = value;
        self
    }

    /// Sets the cache capacity in distinct guids.
    #[must_use]
    pub const fn cache_limit(mut self, value: usize) -> Self {
        self.cache_limit = value;
        self
    }
}
