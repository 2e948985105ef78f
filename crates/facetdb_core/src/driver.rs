//! Relational driver trait definition.

use facetdb_codec::{Facets, Guid};

use crate::error::Result;
use crate::query::{CompiledFind, DialectKind};

/// One identity row returned by a find, with aggregated attribute rows.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// Entity guid.
    pub guid: Guid,
    /// Creation timestamp, seconds since the epoch.
    pub cdate: f64,
    /// Last-modification timestamp, seconds since the epoch.
    pub mdate: f64,
    /// Decoded tag list.
    pub tags: Vec<String>,
    /// Attribute name and stored-form pairs. `None` when the query
    /// selected identity only.
    pub attrs: Option<Vec<(String, String)>>,
}

/// One attribute to persist: the canonical stored form plus the facet row
/// backends index for native comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrWrite {
    /// Attribute name.
    pub name: String,
    /// Canonical stored form.
    pub stored: String,
    /// Comparison facets derived from the value.
    pub facets: Facets,
}

/// A complete entity image to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Entity guid.
    pub guid: Guid,
    /// Creation timestamp.
    pub cdate: f64,
    /// Modification timestamp to store.
    pub mdate: f64,
    /// Tags, in order.
    pub tags: Vec<String>,
    /// All attributes.
    pub attrs: Vec<AttrWrite>,
}

/// One item of an import stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportItem {
    /// An entity image for a storage type.
    Entity {
        /// Target etype.
        etype: String,
        /// The image to write.
        record: EntityRecord,
    },
    /// A named UID counter value.
    Counter {
        /// Counter name.
        name: String,
        /// Counter value.
        value: u64,
    },
}

/// A relational storage driver.
///
/// Drivers are **dumb executors**. The engine compiles selectors, derives
/// facets, and decides result semantics; a driver runs parameterized
/// statements against one backend and maps its rows and errors back.
/// Methods take the resolved etype, never a class name.
///
/// # Invariants
///
/// - Per-etype tables are created lazily: a statement that fails because
///   the tables do not exist yet is retried once after creating them.
/// - `create` and `update` replace an entity's rows across all three
///   tables in one transaction.
/// - `update` verifies the stored mdate inside that same transaction and
///   returns `Ok(false)` on mismatch, writing nothing.
/// - `select` returns one row per entity, attribute rows aggregated in
///   statement order.
/// - `import_batch` applies every item in a single transaction.
pub trait Driver: Send + Sync {
    /// Which SQL dialect this driver speaks.
    fn dialect(&self) -> DialectKind;

    /// Run a compiled find and return its candidate rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails or a row cannot be read.
    fn select(&self, etype: &str, query: &CompiledFind) -> Result<Vec<EntityRow>>;

    /// Insert a new entity. Returns `Ok(false)` when the guid is already
    /// taken, so the caller can retry with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails for any other reason.
    fn create(&self, etype: &str, record: &EntityRecord) -> Result<bool>;

    /// Replace an existing entity's rows, verifying that its stored mdate
    /// still equals `expected_mdate`. Returns `Ok(false)` without writing
    /// when it does not, or when the entity is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    fn update(&self, etype: &str, record: &EntityRecord, expected_mdate: f64) -> Result<bool>;

    /// Delete an entity's rows. Returns `Ok(false)` when nothing was
    /// there.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    fn delete(&self, etype: &str, guid: Guid) -> Result<bool>;

    /// Read a UID counter's current value.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn uid_get(&self, name: &str) -> Result<Option<u64>>;

    /// Atomically increment a UID counter and return the new value. A
    /// counter starts at 1 on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn uid_new(&self, name: &str) -> Result<u64>;

    /// Set a UID counter to an explicit value, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn uid_set(&self, name: &str, value: u64) -> Result<()>;

    /// Rename a UID counter, keeping its value. Renaming an absent
    /// counter is a no-op; an existing target is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    fn uid_rename(&self, old: &str, new: &str) -> Result<()>;

    /// Remove a UID counter. Removing an absent counter is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn uid_delete(&self, name: &str) -> Result<()>;

    /// List every UID counter, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn uid_list(&self) -> Result<Vec<(String, u64)>>;

    /// Apply an import stream in one transaction. Existing entities and
    /// counters with the same identity are replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if any item fails; nothing is applied then.
    fn import_batch(&self, items: &[ImportItem]) -> Result<()>;
}
