//! # facetdb sqlite
//!
//! SQLite driver for the facetdb engine, backed by [rusqlite] with the
//! bundled SQLite. Tables are created lazily per etype; file-backed
//! databases run in WAL mode and every connection gets a `REGEXP`
//! implementation so regular-expression selectors are evaluated natively.
//!
//! [rusqlite]: https://docs.rs/rusqlite
//!
//! ## Usage
//!
//! ```
//! use facetdb_core::{Config, FindOptions, Selector, Value};
//!
//! let db = facetdb_sqlite::open_database_in_memory(Config::new()).unwrap();
//! db.register_class("Person", "person").unwrap();
//!
//! let jane = db.new_entity("Person").unwrap();
//! jane.add_tag("person").unwrap();
//! jane.set_attr("age", Value::Int(36)).unwrap();
//! db.save(&jane).unwrap();
//!
//! let options = FindOptions::new("Person");
//! let adults = db
//!     .find(&options, &[Selector::and().tag("person").gte("age", 21i64)])
//!     .unwrap();
//! assert_eq!(adults.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod functions;
mod schema;

pub use driver::SqliteDriver;

use std::path::Path;

use facetdb_core::{Config, Database, Result};

/// Opens a file-backed database at `path` with a SQLite driver configured
/// from `config`.
///
/// # Errors
///
/// Returns [`facetdb_core::Error::NotConnected`] if the file cannot be
/// opened and [`facetdb_core::Error::InvalidParameters`] for an invalid
/// table prefix.
pub fn open_database(path: impl AsRef<Path>, config: Config) -> Result<Database> {
    let driver = SqliteDriver::open(path)?.table_prefix(config.table_prefix.clone());
    Database::open(Box::new(driver), config)
}

/// Opens a private in-memory database, mostly useful in tests.
///
/// # Errors
///
/// Same as [`open_database`].
pub fn open_database_in_memory(config: Config) -> Result<Database> {
    let driver = SqliteDriver::open_in_memory()?.table_prefix(config.table_prefix.clone());
    Database::open(Box::new(driver), config)
}
