//! # facetdb codec
//!
//! Value model, storage serialization, and comparison facets for facetdb.
//!
//! Entity attributes are dynamic [`Value`]s. Each attribute is stored as a
//! canonical JSON string plus a row of [`Facets`]: cheap scalar projections
//! (truthiness, small-integer equality, numeric and string views, reachable
//! reference guids) that a SQL backend can test natively. The loose-match
//! functions in this crate define the query semantics; the facets are
//! derived from them, which keeps native and in-process evaluation in
//! agreement.
//!
//! Entities never nest inside values. A pointer to a saved entity is a
//! [`Reference`], stored as a small marker array, so cyclic entity graphs
//! serialize in finite space.
//!
//! ## Usage
//!
//! ```
//! use facetdb_codec::{from_stored, to_stored, Value};
//!
//! let value = Value::from(vec![1i64, 2, 3]);
//! let stored = to_stored(&value).unwrap();
//! let decoded = from_stored(&stored).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod facets;
mod reference;
mod stored;
mod value;

pub use error::{CodecError, CodecResult};
pub use facets::{
    collect_refs, contains_loose, loose_compare, loose_matches, numeric, truthiness, Facets,
};
pub use reference::{Guid, Reference, REF_MARKER};
pub use stored::{from_stored, to_stored};
pub use value::Value;
