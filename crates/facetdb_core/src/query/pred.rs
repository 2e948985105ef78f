//! Backend-neutral predicate tree lowered from selectors.
//!
//! Lowering folds combinator NOT flags into per-term negation, resolves
//! the `cdate`/`mdate` special attributes, and picks the facet fast path
//! for each clause. Dialect renderers consume this tree; they never see
//! selectors.
//!
//! A [`PredNode::Superset`] wraps a node that narrows the row set without
//! being exact (loose equality on structural arguments, array containment,
//! and similar). Renderers emit the wrapped node in positive polarity and
//! no constraint at all under negation, because negating a superset would
//! wrongly exclude matching rows; either way the containing selector loses
//! full coverage and is re-checked in process.

use facetdb_codec::{to_stored, Guid, Value};

use crate::error::Result;
use crate::selector::{Clause, Selector, Test};

/// Comparison operator for facet and timestamp predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

/// Which boolean facet column a flag predicate tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FacetFlag {
    Truthy,
    Falsy,
    EqOne,
    EqZero,
    EqNegOne,
    EqEmpty,
}

/// Identity-table timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeField {
    Cdate,
    Mdate,
}

impl TimeField {
    pub(crate) fn column(self) -> &'static str {
        match self {
            TimeField::Cdate => "cdate",
            TimeField::Mdate => "mdate",
        }
    }
}

/// Pattern operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PatternKind {
    Like,
    Ilike,
    Match,
    Pmatch,
    Ipmatch,
}

/// One renderable predicate.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PredNode {
    /// Entity guid is one of the listed guids.
    GuidIn(Vec<Guid>),
    /// The tags list contains the tag.
    TagHas(String),
    /// The attribute-name list contains the name.
    VarSet(String),
    /// The attribute's collected reference guids contain the guid.
    RefHas { name: String, guid: Guid },
    /// A boolean facet column is set for the attribute.
    FacetFlag { name: String, flag: FacetFlag },
    /// Numeric facet comparison against an integer argument.
    FacetCmpInt {
        name: String,
        op: CmpOp,
        value: i64,
    },
    /// Numeric facet comparison against a float argument.
    FacetCmpFloat {
        name: String,
        op: CmpOp,
        value: f64,
    },
    /// The string facet equals the argument.
    FacetString { name: String, value: String },
    /// The stored JSON form equals the argument's exactly.
    StoredEq { name: String, json: String },
    /// Pattern test against the string facet.
    Pattern {
        name: String,
        kind: PatternKind,
        pattern: String,
    },
    /// Identity-table timestamp comparison.
    TimeCmp {
        field: TimeField,
        op: CmpOp,
        value: f64,
    },
    /// Matches nothing.
    Never,
    /// A narrowing but inexact approximation of the original test.
    Superset(Box<PredNode>),
}

/// One term of a group: a node or a nested group, with resolved negation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PredTerm {
    Node(PredNode),
    Group(PredGroup),
}

/// A group of terms joined by AND or OR.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PredGroup {
    /// Join terms with OR rather than AND.
    pub or: bool,
    /// Terms with their effective negation (clause negation XOR the
    /// combinator's NOT flag).
    pub terms: Vec<(bool, PredTerm)>,
}

/// Lower one selector into a predicate group.
pub(crate) fn lower(selector: &Selector) -> Result<PredGroup> {
    let is_not = selector.combinator.is_not();
    let mut terms = Vec::with_capacity(selector.clauses.len() + selector.selectors.len());
    for clause in &selector.clauses {
        terms.push((clause.negated ^ is_not, PredTerm::Node(lower_clause(clause)?)));
    }
    for nested in &selector.selectors {
        terms.push((is_not, PredTerm::Group(lower(nested)?)));
    }
    Ok(PredGroup {
        or: selector.combinator.is_or(),
        terms,
    })
}

fn lower_clause(clause: &Clause) -> Result<PredNode> {
    let node = match &clause.test {
        Test::Guid(guids) => PredNode::GuidIn(guids.clone()),
        Test::Tag(tag) => PredNode::TagHas(tag.clone()),
        Test::Isset(name) => PredNode::VarSet(name.clone()),
        Test::RefTo { name, guid } => PredNode::RefHas {
            name: name.clone(),
            guid: *guid,
        },
        Test::Equal { name, value } => lower_equal(name, value),
        Test::Strict { name, value } => PredNode::StoredEq {
            name: name.clone(),
            json: to_stored(value)?,
        },
        Test::Like { name, pattern } => pattern_node(name, PatternKind::Like, pattern),
        Test::Ilike { name, pattern } => pattern_node(name, PatternKind::Ilike, pattern),
        Test::Match { name, pattern } => pattern_node(name, PatternKind::Match, pattern),
        Test::Pmatch { name, pattern } => pattern_node(name, PatternKind::Pmatch, pattern),
        Test::Ipmatch { name, pattern } => pattern_node(name, PatternKind::Ipmatch, pattern),
        Test::Gt { name, value } => lower_ordered(name, CmpOp::Gt, value),
        Test::Gte { name, value } => lower_ordered(name, CmpOp::Gte, value),
        Test::Lt { name, value } => lower_ordered(name, CmpOp::Lt, value),
        Test::Lte { name, value } => lower_ordered(name, CmpOp::Lte, value),
        Test::Contains { name, value } => lower_contains(name, value),
    };
    Ok(node)
}

fn pattern_node(name: &str, kind: PatternKind, pattern: &str) -> PredNode {
    PredNode::Pattern {
        name: name.to_string(),
        kind,
        pattern: pattern.to_string(),
    }
}

fn time_field(name: &str) -> Option<TimeField> {
    match name {
        "cdate" => Some(TimeField::Cdate),
        "mdate" => Some(TimeField::Mdate),
        _ => None,
    }
}

fn superset(node: PredNode) -> PredNode {
    PredNode::Superset(Box::new(node))
}

fn var_superset(name: &str) -> PredNode {
    superset(PredNode::VarSet(name.to_string()))
}

fn lower_equal(name: &str, value: &Value) -> PredNode {
    if let Some(field) = time_field(name) {
        return match facetdb_codec::numeric(value) {
            Some(v) => PredNode::TimeCmp {
                field,
                op: CmpOp::Eq,
                value: v,
            },
            None => PredNode::Never,
        };
    }
    let name = name.to_string();
    match value {
        Value::Null => var_superset(&name),
        Value::Bool(b) => PredNode::FacetFlag {
            name,
            flag: if *b { FacetFlag::Truthy } else { FacetFlag::Falsy },
        },
        Value::Int(1) => PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqOne,
        },
        Value::Int(0) => PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqZero,
        },
        Value::Int(-1) => PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqNegOne,
        },
        Value::Int(n) => PredNode::FacetCmpInt {
            name,
            op: CmpOp::Eq,
            value: *n,
        },
        Value::Float(f) if *f == 1.0 => PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqOne,
        },
        Value::Float(f) if *f == 0.0 => PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqZero,
        },
        Value::Float(f) if *f == -1.0 => PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqNegOne,
        },
        Value::Float(f) => PredNode::FacetCmpFloat {
            name,
            op: CmpOp::Eq,
            value: *f,
        },
        Value::Str(s) => PredNode::FacetString {
            name,
            value: s.clone(),
        },
        Value::Array(a) if a.is_empty() => superset(PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqEmpty,
        }),
        Value::Map(m) if m.is_empty() => superset(PredNode::FacetFlag {
            name,
            flag: FacetFlag::EqEmpty,
        }),
        Value::Ref(r) => superset(PredNode::RefHas {
            name,
            guid: r.guid,
        }),
        Value::Array(_) | Value::Map(_) => var_superset(&name),
    }
}

fn lower_ordered(name: &str, op: CmpOp, value: &Value) -> PredNode {
    if let Some(field) = time_field(name) {
        // Validation guarantees the argument is numeric.
        return match facetdb_codec::numeric(value) {
            Some(v) => PredNode::TimeCmp {
                field,
                op,
                value: v,
            },
            None => PredNode::Never,
        };
    }
    match value {
        Value::Int(n) => PredNode::FacetCmpInt {
            name: name.to_string(),
            op,
            value: *n,
        },
        Value::Float(f) => PredNode::FacetCmpFloat {
            name: name.to_string(),
            op,
            value: *f,
        },
        _ => PredNode::Never,
    }
}

fn lower_contains(name: &str, value: &Value) -> PredNode {
    match value {
        Value::Ref(r) => superset(PredNode::RefHas {
            name: name.to_string(),
            guid: r.guid,
        }),
        _ => var_superset(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_codec::Reference;

    fn lower_one(selector: Selector) -> PredGroup {
        lower(&selector).unwrap()
    }

    #[test]
    fn not_variant_folds_into_terms() {
        let group = lower_one(Selector::not_and().tag("a").clause(Clause::tag("b").negated()));
        assert!(!group.or);
        assert_eq!(group.terms.len(), 2);
        // NOT-AND negates each term; the already-negated clause flips back.
        assert!(group.terms[0].0);
        assert!(!group.terms[1].0);
    }

    #[test]
    fn nested_selector_negated_by_parent() {
        let group = lower_one(Selector::not_or().nested(Selector::and().tag("a")));
        assert!(group.or);
        assert!(group.terms[0].0);
        assert!(matches!(group.terms[0].1, PredTerm::Group(_)));
    }

    #[test]
    fn equal_bool_uses_truthiness_facet() {
        let group = lower_one(Selector::and().equal("on", true));
        assert_eq!(
            group.terms[0].1,
            PredTerm::Node(PredNode::FacetFlag {
                name: "on".to_string(),
                flag: FacetFlag::Truthy,
            })
        );

        let group = lower_one(Selector::and().equal("on", false));
        assert_eq!(
            group.terms[0].1,
            PredTerm::Node(PredNode::FacetFlag {
                name: "on".to_string(),
                flag: FacetFlag::Falsy,
            })
        );
    }

    #[test]
    fn equal_small_ints_use_flag_facets() {
        for (value, flag) in [
            (1i64, FacetFlag::EqOne),
            (0, FacetFlag::EqZero),
            (-1, FacetFlag::EqNegOne),
        ] {
            let group = lower_one(Selector::and().equal("n", value));
            assert_eq!(
                group.terms[0].1,
                PredTerm::Node(PredNode::FacetFlag {
                    name: "n".to_string(),
                    flag,
                })
            );
        }
    }

    #[test]
    fn equal_general_numbers_use_numeric_facets() {
        let group = lower_one(Selector::and().equal("n", 42i64));
        assert_eq!(
            group.terms[0].1,
            PredTerm::Node(PredNode::FacetCmpInt {
                name: "n".to_string(),
                op: CmpOp::Eq,
                value: 42,
            })
        );

        let group = lower_one(Selector::and().equal("n", 2.5f64));
        assert_eq!(
            group.terms[0].1,
            PredTerm::Node(PredNode::FacetCmpFloat {
                name: "n".to_string(),
                op: CmpOp::Eq,
                value: 2.5,
            })
        );
    }

    #[test]
    fn equal_structures_become_supersets() {
        let group = lower_one(Selector::and().equal("list", Vec::<i64>::new()));
        assert!(matches!(
            &group.terms[0].1,
            PredTerm::Node(PredNode::Superset(inner))
                if matches!(**inner, PredNode::FacetFlag { flag: FacetFlag::EqEmpty, .. })
        ));

        let group = lower_one(Selector::and().equal("list", vec![1i64, 2]));
        assert!(matches!(
            &group.terms[0].1,
            PredTerm::Node(PredNode::Superset(inner))
                if matches!(**inner, PredNode::VarSet(_))
        ));

        let group = lower_one(Selector::and().equal(
            "friend",
            Reference::new(Guid::new(5), "person"),
        ));
        assert!(matches!(
            &group.terms[0].1,
            PredTerm::Node(PredNode::Superset(inner))
                if matches!(**inner, PredNode::RefHas { .. })
        ));
    }

    #[test]
    fn timestamps_compile_to_identity_columns() {
        let group = lower_one(Selector::and().gte("cdate", 100.5f64));
        assert_eq!(
            group.terms[0].1,
            PredTerm::Node(PredNode::TimeCmp {
                field: TimeField::Cdate,
                op: CmpOp::Gte,
                value: 100.5,
            })
        );

        let group = lower_one(Selector::and().equal("mdate", 7i64));
        assert_eq!(
            group.terms[0].1,
            PredTerm::Node(PredNode::TimeCmp {
                field: TimeField::Mdate,
                op: CmpOp::Eq,
                value: 7.0,
            })
        );

        let group = lower_one(Selector::and().equal("cdate", "noon"));
        assert_eq!(group.terms[0].1, PredTerm::Node(PredNode::Never));
    }

    #[test]
    fn strict_serializes_canonically() {
        let group = lower_one(Selector::and().strict("n", 5i64));
        assert_eq!(
            group.terms[0].1,
            PredTerm::Node(PredNode::StoredEq {
                name: "n".to_string(),
                json: "5".to_string(),
            })
        );
    }
}
