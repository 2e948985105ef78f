//! # facetdb core
//!
//! The storage engine: schema-less entities over a relational backend.
//!
//! Entities are bags of tags and dynamic attributes, identified by a guid
//! and addressed through a registered class. Queries are selector forests
//! compiled per backend dialect into parameterized SQL over per-attribute
//! comparison facets; whatever a backend cannot test exactly is re-checked
//! in process against the same loose-match semantics, so results never
//! depend on which side evaluated a clause.
//!
//! Pointers between entities are [`Reference`]s. A loaded reference is a
//! sleeping [`Entity`] that hydrates through the database on first read,
//! one hop at a time, which makes cyclic graphs cheap to hold.
//!
//! This crate is backend-agnostic: it talks to storage through the
//! [`Driver`] trait. The SQLite driver lives in its own crate.
//!
//! ## Usage
//!
//! ```
//! use facetdb_core::{FindOptions, Selector, Sort};
//!
//! // Adults, newest first.
//! let selector = Selector::and().tag("person").gte("age", 21i64);
//! let options = FindOptions::new("Person")
//!     .sort(Sort::Cdate)
//!     .reverse(true)
//!     .limit(10);
//! # let _ = (selector, options);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod database;
mod driver;
mod entity;
mod error;
mod query;
mod registry;
mod selector;

pub use cache::EntityCache;
pub use config::Config;
pub use database::Database;
pub use driver::{AttrWrite, Driver, EntityRecord, EntityRow, ImportItem};
pub use entity::{Entity, EntityData, Resolve};
pub use error::{Error, Result};
pub use query::{Bind, CompiledFind, DialectKind};
pub use registry::ClassRegistry;
pub use selector::{
    validate, Clause, Combinator, FindOptions, Return, Selector, Sort, Test,
};

pub use facetdb_codec::{Facets, Guid, Reference, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_builder_smoke() {
        let selector = Selector::or().equal("age", 21i64).isset("minor");
        assert_eq!(selector.combinator, Combinator::Or);
        assert_eq!(selector.clauses.len(), 2);
        validate(&[selector]).unwrap();
    }

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.table_prefix, "facet_");
        assert_eq!(config.cache_threshold, 4);
        assert_eq!(config.cache_limit, 50);
    }
}
