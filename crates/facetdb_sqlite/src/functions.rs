//! SQL functions registered on every connection.
//!
//! SQLite has the `REGEXP` operator but ships no implementation for it;
//! `X REGEXP Y` simply calls the two-argument `regexp(Y, X)` function. The
//! compiled probes for regular-expression tests rely on it, so one is
//! registered here backed by the `regex` crate.

use std::collections::HashMap;

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

/// Patterns memoized per connection before the memo is reset. Selector
/// forests reuse a handful of patterns across many rows, so a small bound
/// is plenty.
const PATTERN_MEMO_LIMIT: usize = 64;

/// Registers the `regexp(pattern, text)` scalar function.
///
/// Non-text subjects never match, mirroring the in-process evaluator where
/// pattern tests only apply to string values. Patterns are validated before
/// a selector compiles; one that still fails to parse here matches nothing
/// rather than aborting the whole query.
pub(crate) fn register(conn: &Connection) -> rusqlite::Result<()> {
    let mut memo: HashMap<String, Regex> = HashMap::new();
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let ValueRef::Text(subject) = ctx.get_raw(1) else {
                return Ok(false);
            };
            let Ok(subject) = std::str::from_utf8(subject) else {
                return Ok(false);
            };
            let pattern = ctx.get::<String>(0)?;
            if let Some(re) = memo.get(&pattern) {
                return Ok(re.is_match(subject));
            }
            let Ok(re) = Regex::new(&pattern) else {
                return Ok(false);
            };
            let matched = re.is_match(subject);
            if memo.len() >= PATTERN_MEMO_LIMIT {
                memo.clear();
            }
            memo.insert(pattern, re);
            Ok(matched)
        },
    )
}
