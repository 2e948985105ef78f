//! In-process selector evaluation.
//!
//! This is the reference semantics for every selector test. Candidates
//! from a backend that lost exactness anywhere are re-checked here, so
//! each arm must agree with what an exact SQL rendering of the same test
//! would select.

use std::cmp::Ordering;

use facetdb_codec::{
    collect_refs, contains_loose, loose_compare, loose_matches, numeric, to_stored, Value,
};
use regex::Regex;

use crate::entity::EntityData;
use crate::selector::{Selector, Test};

/// Re-check a candidate against the selectors the backend evaluated
/// inexactly. Exact selectors are skipped; they already held in SQL.
pub(crate) fn passes_inexact(
    selectors: &[Selector],
    selector_exact: &[bool],
    data: &EntityData,
) -> bool {
    selectors
        .iter()
        .zip(selector_exact)
        .all(|(selector, &exact)| exact || selector_matches(selector, data))
}

/// Evaluate one selector against entity data.
pub(crate) fn selector_matches(selector: &Selector, data: &EntityData) -> bool {
    let is_not = selector.combinator.is_not();
    let clauses = selector
        .clauses
        .iter()
        .map(|clause| eval_test(&clause.test, data) ^ clause.negated ^ is_not);
    let nested = selector
        .selectors
        .iter()
        .map(|inner| selector_matches(inner, data) ^ is_not);
    if selector.combinator.is_or() {
        clauses.chain(nested).any(|term| term)
    } else {
        clauses.chain(nested).all(|term| term)
    }
}

/// Timestamp pseudo-attribute value, if the name addresses one.
fn time_value(name: &str, data: &EntityData) -> Option<Option<f64>> {
    match name {
        "cdate" => Some(data.cdate),
        "mdate" => Some(data.mdate),
        _ => None,
    }
}

fn eval_test(test: &Test, data: &EntityData) -> bool {
    match test {
        Test::Guid(guids) => data.guid.is_some_and(|guid| guids.contains(&guid)),
        Test::Tag(tag) => data.tags.iter().any(|t| t == tag),
        Test::Isset(name) => data.attrs.contains_key(name),
        Test::RefTo { name, guid } => data
            .attrs
            .get(name)
            .is_some_and(|value| collect_refs(value).contains(guid)),
        Test::Equal { name, value } => {
            // cdate and mdate act as numeric pseudo-attributes in equality
            // and ordering tests only.
            if let Some(stamp) = time_value(name, data) {
                return match (stamp, numeric(value)) {
                    (Some(actual), Some(wanted)) => actual == wanted,
                    _ => false,
                };
            }
            data.attrs
                .get(name)
                .is_some_and(|stored| loose_matches(stored, value))
        }
        Test::Strict { name, value } => data
            .attrs
            .get(name)
            .is_some_and(|stored| stored_text_eq(stored, value)),
        Test::Like { name, pattern } => {
            string_attr_matches(data, name, &wildcard_regex(pattern, false))
        }
        Test::Ilike { name, pattern } => {
            string_attr_matches(data, name, &wildcard_regex(pattern, true))
        }
        Test::Match { name, pattern } | Test::Pmatch { name, pattern } => {
            string_attr_matches(data, name, pattern)
        }
        Test::Ipmatch { name, pattern } => {
            string_attr_matches(data, name, &format!("(?i){pattern}"))
        }
        Test::Gt { name, value } => ordered(data, name, value, &[Ordering::Greater]),
        Test::Gte { name, value } => {
            ordered(data, name, value, &[Ordering::Greater, Ordering::Equal])
        }
        Test::Lt { name, value } => ordered(data, name, value, &[Ordering::Less]),
        Test::Lte { name, value } => {
            ordered(data, name, value, &[Ordering::Less, Ordering::Equal])
        }
        Test::Contains { name, value } => data
            .attrs
            .get(name)
            .is_some_and(|stored| contains_loose(stored, value)),
    }
}

fn ordered(data: &EntityData, name: &str, value: &Value, accept: &[Ordering]) -> bool {
    if let Some(stamp) = time_value(name, data) {
        // An incomparable pair (a NaN argument) satisfies no ordering,
        // matching loose_compare and the native column comparison.
        return match (stamp, numeric(value)) {
            (Some(actual), Some(wanted)) => actual
                .partial_cmp(&wanted)
                .is_some_and(|ordering| accept.contains(&ordering)),
            _ => false,
        };
    }
    data.attrs
        .get(name)
        .and_then(|stored| loose_compare(stored, value))
        .is_some_and(|ordering| accept.contains(&ordering))
}

/// Strict equality is identity of the canonical serialized form, the
/// text the native rendering compares against the data column. Value
/// equality would be wrong here: `-0.0` and `0.0` compare equal as
/// floats but serialize differently.
fn stored_text_eq(stored: &Value, arg: &Value) -> bool {
    match (to_stored(stored), to_stored(arg)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn string_attr_matches(data: &EntityData, name: &str, pattern: &str) -> bool {
    let Some(subject) = data.attrs.get(name).and_then(Value::as_str) else {
        return false;
    };
    // Patterns are validated before a find runs; a compile failure here
    // simply matches nothing, like an absent attribute.
    Regex::new(pattern).map(|re| re.is_match(subject)).unwrap_or(false)
}

/// Translate a `%`/`_` wildcard pattern into an anchored regex.
///
/// Case-insensitive mode folds ASCII letters only, the same rule the
/// native `LIKE` rendering applies; `(?i)` would fold the full Unicode
/// range and select rows the exact path does not.
fn wildcard_regex(pattern: &str, fold_ascii_case: bool) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other if fold_ascii_case && other.is_ascii_alphabetic() => {
                out.push('[');
                out.push(other.to_ascii_lowercase());
                out.push(other.to_ascii_uppercase());
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_codec::{Guid, Reference};

    fn person() -> EntityData {
        let attrs = [
            ("name", Value::from("Jane")),
            ("age", Value::from(36i64)),
            ("score", Value::from(7.5f64)),
            ("active", Value::from(true)),
            ("nums", Value::from(vec![1i64, 2, 3])),
            ("boss", Value::from(Reference::new(Guid::new(7), "person"))),
        ];
        EntityData {
            guid: Some(Guid::new(42)),
            cdate: Some(1000.5),
            mdate: Some(2000.5),
            tags: vec!["person".to_string(), "staff".to_string()],
            attrs: attrs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    fn matches(selector: Selector) -> bool {
        selector_matches(&selector, &person())
    }

    #[test]
    fn combinator_truth_table() {
        // Raw truths: tag "person" holds, tag "robot" does not.
        assert!(matches(Selector::and().tag("person").tag("staff")));
        assert!(!matches(Selector::and().tag("person").tag("robot")));
        assert!(matches(Selector::or().tag("person").tag("robot")));
        assert!(!matches(Selector::or().tag("robot").tag("alien")));
        // NOT-AND negates every term, then ANDs.
        assert!(matches(Selector::not_and().tag("robot").tag("alien")));
        assert!(!matches(Selector::not_and().tag("person").tag("alien")));
        // NOT-OR negates every term, then ORs.
        assert!(matches(Selector::not_or().tag("person").tag("alien")));
        assert!(!matches(Selector::not_or().tag("person").tag("staff")));
    }

    #[test]
    fn clause_negation_composes_with_combinator() {
        use crate::selector::Clause;
        // negated XOR NOT-variant: double negation restores the raw test.
        assert!(matches(
            Selector::not_and().clause(Clause::tag("person").negated())
        ));
        assert!(!matches(
            Selector::not_and().clause(Clause::tag("robot").negated())
        ));
    }

    #[test]
    fn nested_selector_result_flips_under_parent_not() {
        let inner = Selector::or().tag("robot").tag("alien");
        assert!(!matches(Selector::and().nested(inner.clone())));
        assert!(matches(Selector::not_and().nested(inner)));
    }

    #[test]
    fn guid_and_isset() {
        assert!(matches(Selector::and().guid([42u64])));
        assert!(!matches(Selector::and().guid([41u64])));
        assert!(matches(Selector::and().isset("name")));
        assert!(!matches(Selector::and().isset("missing")));
        // Timestamps are not attributes for isset.
        assert!(!matches(Selector::and().isset("cdate")));
    }

    #[test]
    fn equality_follows_loose_rules() {
        assert!(matches(Selector::and().equal("name", "Jane")));
        assert!(!matches(Selector::and().equal("name", "jane")));
        assert!(matches(Selector::and().equal("age", 36i64)));
        assert!(matches(Selector::and().equal("age", 36.0f64)));
        assert!(matches(Selector::and().equal("active", true)));
        assert!(matches(Selector::and().equal("active", 1i64)));
        assert!(!matches(Selector::and().equal("missing", 1i64)));
    }

    #[test]
    fn strict_distinguishes_numeric_types() {
        assert!(matches(Selector::and().strict("age", 36i64)));
        assert!(!matches(Selector::and().strict("age", 36.0f64)));
        assert!(matches(Selector::and().strict("score", 7.5f64)));
    }

    #[test]
    fn strict_separates_negative_zero() {
        let mut data = person();
        data.attrs.insert("offset".to_string(), Value::from(-0.0f64));
        // -0.0 == 0.0 as floats, but their serialized forms differ, and
        // strict compares the serialized form.
        assert!(selector_matches(
            &Selector::and().strict("offset", -0.0f64),
            &data
        ));
        assert!(!selector_matches(
            &Selector::and().strict("offset", 0.0f64),
            &data
        ));
    }

    #[test]
    fn timestamps_compare_numerically() {
        assert!(matches(Selector::and().equal("cdate", 1000.5f64)));
        assert!(!matches(Selector::and().equal("cdate", 1000.0f64)));
        assert!(!matches(Selector::and().equal("cdate", "noon")));
        assert!(matches(Selector::and().gte("mdate", 2000i64)));
        assert!(matches(Selector::and().lt("cdate", 2000i64)));
        assert!(!matches(Selector::and().gt("mdate", 9999i64)));
    }

    #[test]
    fn ordering_is_numeric_only() {
        assert!(matches(Selector::and().gt("age", 21i64)));
        assert!(matches(Selector::and().lte("age", 36i64)));
        assert!(matches(Selector::and().gt("score", 7i64)));
        // Strings and booleans never satisfy ordered comparisons.
        assert!(!matches(Selector::and().gt("name", 0i64)));
        assert!(!matches(Selector::and().gt("active", 0i64)));
    }

    #[test]
    fn nan_ordering_argument_matches_nothing() {
        // NaN orders against nothing, timestamps included; it must not
        // collapse into "less than everything".
        assert!(!matches(Selector::and().lt("cdate", f64::NAN)));
        assert!(!matches(Selector::and().gt("cdate", f64::NAN)));
        assert!(!matches(Selector::and().gte("mdate", f64::NAN)));
        assert!(!matches(Selector::and().lt("age", f64::NAN)));
    }

    #[test]
    fn wildcard_patterns() {
        assert!(matches(Selector::and().like("name", "J_ne")));
        assert!(matches(Selector::and().like("name", "Ja%")));
        assert!(!matches(Selector::and().like("name", "ja%")));
        assert!(matches(Selector::and().ilike("name", "ja%")));
        assert!(!matches(Selector::and().like("name", "J.ne")));
        assert!(!matches(Selector::and().like("age", "3%")));
    }

    #[test]
    fn ilike_folds_ascii_case_only() {
        let mut data = person();
        data.attrs.insert("city".to_string(), Value::from("äx"));
        // ASCII letters fold either way.
        assert!(selector_matches(&Selector::and().ilike("city", "äX"), &data));
        assert!(selector_matches(&Selector::and().ilike("city", "ä_"), &data));
        // Non-ASCII letters match exactly, the same rule as the native
        // LIKE; full Unicode folding would accept this pattern.
        assert!(!selector_matches(
            &Selector::and().ilike("city", "ÄX"),
            &data
        ));
    }

    #[test]
    fn regex_patterns() {
        assert!(matches(Selector::and().pmatch("name", "^Ja")));
        assert!(!matches(Selector::and().pmatch("name", "^ja")));
        assert!(matches(Selector::and().ipmatch("name", "^ja")));
        assert!(matches(Selector::and().matches("name", "[[:alpha:]]+")));
    }

    #[test]
    fn containment_and_references() {
        assert!(matches(Selector::and().contains("nums", 2i64)));
        assert!(matches(Selector::and().contains("nums", 2.0f64)));
        assert!(!matches(Selector::and().contains("nums", 9i64)));
        assert!(!matches(Selector::and().contains("age", 36i64)));
        assert!(matches(Selector::and().ref_to("boss", 7u64)));
        assert!(!matches(Selector::and().ref_to("boss", 8u64)));
    }

    #[test]
    fn passes_inexact_skips_exact_selectors() {
        let data = person();
        let selectors = vec![
            Selector::and().tag("robot"),
            Selector::and().contains("nums", 2i64),
        ];
        // The first selector is false for this entity, but marked exact,
        // so only the second is re-checked.
        assert!(passes_inexact(&selectors, &[true, false], &data));
        assert!(!passes_inexact(&selectors, &[false, false], &data));
    }
}
