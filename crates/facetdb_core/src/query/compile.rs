//! Selector-to-SQL compilation.
//!
//! Compilation runs in two passes. The first pass decides, per selector,
//! whether the backend can evaluate it exactly; the second renders SQL.
//! Terms the renderer discards (negated inexact ones become `1 = 1`)
//! therefore never push parameters, which keeps numbered placeholders
//! dense on backends that use them.
//!
//! Soundness rule for inexact predicates: a rendered fragment always
//! accepts a superset of the rows its term truly matches, and negation is
//! only ever applied to exact fragments. Joining supersets with AND or OR
//! yields a superset, so a query that lost exactness anywhere still
//! returns every true match and the caller re-checks candidates in
//! process.

use crate::error::Result;
use crate::selector::{FindOptions, Return, Selector, Sort};

use super::dialect::{Bind, Dialect, DialectKind};
use super::pred::{lower, FacetFlag, PredGroup, PredNode, PredTerm};

/// A find operation compiled for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFind {
    /// The SQL text.
    pub sql: String,
    /// Bound parameters, in placeholder order.
    pub binds: Vec<Bind>,
    /// Whether the SQL evaluates every selector exactly. When false the
    /// window was not pushed down and candidates need re-checking.
    pub full_coverage: bool,
    /// Per-selector exactness, indexed like the input selectors.
    pub selector_exact: Vec<bool>,
    /// Whether the SQL joins the data table and yields attribute rows.
    pub select_data: bool,
}

struct Tables {
    entities: String,
    data: String,
    comparisons: String,
}

impl Tables {
    fn new(dialect: &dyn Dialect, prefix: &str, etype: &str) -> Self {
        Tables {
            entities: dialect.quote(&format!("{prefix}entities_{etype}")),
            data: dialect.quote(&format!("{prefix}data_{etype}")),
            comparisons: dialect.quote(&format!("{prefix}comparisons_{etype}")),
        }
    }
}

struct Ctx<'a> {
    dialect: &'a dyn Dialect,
    binds: Vec<Bind>,
}

impl Ctx<'_> {
    /// Push a parameter and return its placeholder.
    fn bind(&mut self, value: Bind) -> String {
        self.binds.push(value);
        self.dialect.placeholder(self.binds.len())
    }

    /// Placeholder the next [`Ctx::push`] will occupy.
    fn next_placeholder(&self) -> String {
        self.dialect.placeholder(self.binds.len() + 1)
    }

    fn push(&mut self, value: Bind) {
        self.binds.push(value);
    }
}

/// Compile a validated selector forest into backend SQL.
pub(crate) fn compile(
    kind: DialectKind,
    prefix: &str,
    etype: &str,
    selectors: &[Selector],
    options: &FindOptions,
) -> Result<CompiledFind> {
    let dialect = kind.dialect();
    let groups = selectors
        .iter()
        .map(lower)
        .collect::<Result<Vec<PredGroup>>>()?;

    let selector_exact: Vec<bool> = groups
        .iter()
        .zip(selectors)
        .map(|(group, selector)| group_exact(dialect, group) && !selector.has_nested())
        .collect();
    let full_coverage = selector_exact.iter().all(|&exact| exact);
    let select_data = !(options.ret == Return::Guid && full_coverage);

    let tables = Tables::new(dialect, prefix, etype);
    let mut ctx = Ctx {
        dialect,
        binds: Vec::new(),
    };

    let where_sql = if groups.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = groups
            .iter()
            .map(|group| render_group(&mut ctx, &tables, group))
            .collect();
        format!(" WHERE {}", parts.join(" AND "))
    };

    // The window only applies in SQL when it selects exactly the logical
    // results; otherwise the engine windows after re-checking.
    let window = if full_coverage {
        dialect.limit_clause(options.limit, options.offset)
    } else {
        String::new()
    };
    let inner = format!(
        "SELECT e.guid, e.cdate, e.mdate, e.tags FROM {} e{} {}{}",
        tables.entities,
        where_sql,
        order_clause("e", options.sort, options.reverse),
        window,
    );

    let sql = if select_data {
        // Identity rows are windowed in the subselect, then joined to
        // attribute rows. Repeating the order keeps one entity's rows
        // contiguous for the driver to aggregate.
        format!(
            "SELECT i.guid, i.cdate, i.mdate, i.tags, d.name, d.value \
             FROM ({}) i LEFT JOIN {} d ON d.guid = i.guid {}",
            inner,
            tables.data,
            order_clause("i", options.sort, options.reverse),
        )
    } else {
        inner
    };

    Ok(CompiledFind {
        sql,
        binds: ctx.binds,
        full_coverage,
        selector_exact,
        select_data,
    })
}

fn order_clause(alias: &str, sort: Sort, reverse: bool) -> String {
    let dir = if reverse { " DESC" } else { "" };
    match sort {
        Sort::Guid => format!("ORDER BY {alias}.guid{dir}"),
        Sort::Cdate => format!("ORDER BY {alias}.cdate{dir}, {alias}.guid{dir}"),
        Sort::Mdate => format!("ORDER BY {alias}.mdate{dir}, {alias}.guid{dir}"),
    }
}

fn group_exact(dialect: &dyn Dialect, group: &PredGroup) -> bool {
    group.terms.iter().all(|(_, term)| match term {
        PredTerm::Node(node) => node_exact(dialect, node),
        PredTerm::Group(nested) => group_exact(dialect, nested),
    })
}

fn node_exact(dialect: &dyn Dialect, node: &PredNode) -> bool {
    match node {
        PredNode::Superset(_) => false,
        PredNode::Pattern { kind, .. } => dialect.supports_pattern(*kind),
        _ => true,
    }
}

fn render_group(ctx: &mut Ctx<'_>, tables: &Tables, group: &PredGroup) -> String {
    if group.terms.is_empty() {
        return "(1 = 1)".to_string();
    }
    let joiner = if group.or { " OR " } else { " AND " };
    let parts: Vec<String> = group
        .terms
        .iter()
        .map(|(negate, term)| render_term(ctx, tables, *negate, term))
        .collect();
    format!("({})", parts.join(joiner))
}

fn render_term(ctx: &mut Ctx<'_>, tables: &Tables, negate: bool, term: &PredTerm) -> String {
    match term {
        PredTerm::Node(node) => {
            if negate && !node_exact(ctx.dialect, node) {
                // Negating a superset would drop true matches; accept
                // everything and let the re-check decide.
                return "1 = 1".to_string();
            }
            render_node(ctx, tables, node, negate)
        }
        PredTerm::Group(nested) => {
            if negate && !group_exact(ctx.dialect, nested) {
                return "1 = 1".to_string();
            }
            let sql = render_group(ctx, tables, nested);
            if negate {
                format!("NOT {sql}")
            } else {
                sql
            }
        }
    }
}

fn exists(tables: &Tables, negate: bool, name_ph: &str, test: &str) -> String {
    let prefix = if negate { "NOT " } else { "" };
    format!(
        "{prefix}EXISTS (SELECT 1 FROM {} c WHERE c.guid = e.guid AND c.name = {name_ph} AND {test})",
        tables.comparisons,
    )
}

fn wrap_not(negate: bool, fragment: String) -> String {
    if negate {
        format!("NOT ({fragment})")
    } else {
        fragment
    }
}

fn flag_test(flag: FacetFlag) -> &'static str {
    match flag {
        FacetFlag::Truthy => "c.truthy = 1",
        FacetFlag::Falsy => "c.truthy = 0",
        FacetFlag::EqOne => "c.eq_one = 1",
        FacetFlag::EqZero => "c.eq_zero = 1",
        FacetFlag::EqNegOne => "c.eq_neg_one = 1",
        FacetFlag::EqEmpty => "c.eq_empty = 1",
    }
}

fn render_node(ctx: &mut Ctx<'_>, tables: &Tables, node: &PredNode, negate: bool) -> String {
    match node {
        PredNode::GuidIn(guids) => {
            if guids.is_empty() {
                return if negate { "1 = 1" } else { "1 = 0" }.to_string();
            }
            let placeholders: Vec<String> = guids
                .iter()
                .map(|guid| ctx.bind(Bind::Int(guid.as_i64())))
                .collect();
            let op = if negate { "NOT IN" } else { "IN" };
            format!("e.guid {op} ({})", placeholders.join(", "))
        }
        PredNode::TagHas(tag) => {
            let ph = ctx.bind(Bind::Text(tag.clone()));
            wrap_not(negate, ctx.dialect.list_contains("e.tags", &ph))
        }
        PredNode::VarSet(name) => {
            let ph = ctx.bind(Bind::Text(name.clone()));
            wrap_not(negate, ctx.dialect.list_contains("e.varlist", &ph))
        }
        PredNode::RefHas { name, guid } => {
            let name_ph = ctx.bind(Bind::Text(name.clone()));
            let ref_ph = ctx.bind(ctx.dialect.ref_bind(*guid));
            let test = ctx.dialect.int_list_contains("c.refs", &ref_ph);
            exists(tables, negate, &name_ph, &test)
        }
        PredNode::FacetFlag { name, flag } => {
            let name_ph = ctx.bind(Bind::Text(name.clone()));
            exists(tables, negate, &name_ph, flag_test(*flag))
        }
        PredNode::FacetCmpInt { name, op, value } => {
            let name_ph = ctx.bind(Bind::Text(name.clone()));
            let int_ph = ctx.bind(Bind::Int(*value));
            #[allow(clippy::cast_precision_loss)]
            let float_ph = ctx.bind(Bind::Float(*value as f64));
            let op = op.sql();
            let test = format!(
                "((c.is_int = 1 AND c.int_val {op} {int_ph}) OR (c.is_int = 0 AND c.float_val {op} {float_ph}))"
            );
            exists(tables, negate, &name_ph, &test)
        }
        PredNode::FacetCmpFloat { name, op, value } => {
            let name_ph = ctx.bind(Bind::Text(name.clone()));
            let value_ph = ctx.bind(Bind::Float(*value));
            let test = format!("c.float_val {} {value_ph}", op.sql());
            exists(tables, negate, &name_ph, &test)
        }
        PredNode::FacetString { name, value } => {
            let name_ph = ctx.bind(Bind::Text(name.clone()));
            let value_ph = ctx.bind(Bind::Text(value.clone()));
            let test = format!("c.string = {value_ph}");
            exists(tables, negate, &name_ph, &test)
        }
        PredNode::StoredEq { name, json } => {
            let name_ph = ctx.bind(Bind::Text(name.clone()));
            let value_ph = ctx.bind(Bind::Text(json.clone()));
            let prefix = if negate { "NOT " } else { "" };
            format!(
                "{prefix}EXISTS (SELECT 1 FROM {} dv WHERE dv.guid = e.guid AND dv.name = {name_ph} AND dv.value = {value_ph})",
                tables.data,
            )
        }
        PredNode::Pattern {
            name,
            kind,
            pattern,
        } => {
            let name_ph = ctx.bind(Bind::Text(name.clone()));
            let ph = ctx.next_placeholder();
            match ctx.dialect.pattern("c.string", *kind, pattern, &ph) {
                Some((test, bind)) => {
                    ctx.push(bind);
                    exists(tables, negate, &name_ph, &test)
                }
                // Unsupported pattern, positive polarity: narrow to rows
                // where the attribute holds a string at all.
                None => exists(tables, false, &name_ph, "c.string IS NOT NULL"),
            }
        }
        PredNode::TimeCmp { field, op, value } => {
            let ph = ctx.bind(Bind::Float(*value));
            wrap_not(
                negate,
                format!("e.{} {} {ph}", field.column(), op.sql()),
            )
        }
        PredNode::Never => {
            if negate { "1 = 1" } else { "1 = 0" }.to_string()
        }
        PredNode::Superset(inner) => render_node(ctx, tables, inner, false),
    }
}


#[cfg(test)]
mod consistency_tests {
    use super::*;
    use crate::selector::{Clause, Combinator, Test};
    use facetdb_codec::{Guid, Reference, Value};
    use proptest::prelude::*;

    fn arb_name() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-3i64..=3).prop_map(Value::Int),
            any::<i64>().prop_map(Value::Int),
            (-1.0e6f64..1.0e6).prop_map(Value::Float),
            "[a-z]{0,6}".prop_map(Value::from),
            (1u64..100).prop_map(|g| Value::from(Reference::new(Guid::new(g), "t"))),
            proptest::collection::vec((-3i64..=3).prop_map(Value::Int), 0..3)
                .prop_map(Value::Array),
        ]
    }

    fn arb_test() -> impl Strategy<Value = Test> {
        prop_oneof![
            proptest::collection::vec(1u64..50, 1..4)
                .prop_map(|gs| Test::Guid(gs.into_iter().map(Guid::new).collect())),
            "[a-z]{1,6}".prop_map(Test::Tag),
            arb_name().prop_map(Test::Isset),
            (arb_name(), 1u64..50).prop_map(|(name, g)| Test::RefTo {
                name,
                guid: Guid::new(g),
            }),
            (arb_name(), arb_value()).prop_map(|(name, value)| Test::Equal { name, value }),
            (arb_name(), arb_value()).prop_map(|(name, value)| Test::Strict { name, value }),
            (arb_name(), "[a-z%_]{0,6}").prop_map(|(name, pattern)| Test::Like { name, pattern }),
            (
                arb_name(),
                prop_oneof![
                    Just("^a".to_string()),
                    Just("b$".to_string()),
                    Just("[a-c]+".to_string()),
                ],
            )
                .prop_map(|(name, pattern)| Test::Pmatch { name, pattern }),
            (
                arb_name(),
                prop_oneof![
                    (-100i64..100).prop_map(Value::Int),
                    (-100.0f64..100.0).prop_map(Value::Float),
                ],
            )
                .prop_map(|(name, value)| Test::Gte { name, value }),
            (arb_name(), arb_value()).prop_map(|(name, value)| Test::Contains { name, value }),
        ]
    }

    fn arb_clause() -> impl Strategy<Value = Clause> {
        (any::<bool>(), arb_test()).prop_map(|(negated, test)| Clause { negated, test })
    }

    fn arb_combinator() -> impl Strategy<Value = Combinator> {
        prop_oneof![
            Just(Combinator::And),
            Just(Combinator::Or),
            Just(Combinator::NotAnd),
            Just(Combinator::NotOr),
        ]
    }

    fn arb_selector() -> impl Strategy<Value = Selector> {
        let leaf = (arb_combinator(), proptest::collection::vec(arb_clause(), 1..4)).prop_map(
            |(combinator, clauses)| Selector {
                combinator,
                clauses,
                selectors: Vec::new(),
            },
        );
        leaf.prop_recursive(2, 8, 3, |inner| {
            (
                arb_combinator(),
                proptest::collection::vec(arb_clause(), 0..3),
                proptest::collection::vec(inner, 1..3),
            )
                .prop_map(|(combinator, clauses, selectors)| Selector {
                    combinator,
                    clauses,
                    selectors,
                })
        })
    }

    proptest! {
        /// Every `?` in rendered SQL corresponds to exactly one bind,
        /// even when negated inexact terms are discarded.
        #[test]
        fn placeholder_count_matches_binds(
            selectors in proptest::collection::vec(arb_selector(), 0..3)
        ) {
            let options = FindOptions::new("person");
            for kind in [DialectKind::Sqlite, DialectKind::MySql] {
                let compiled =
                    compile(kind, "facet_", "person", &selectors, &options).unwrap();
                prop_assert_eq!(
                    compiled.sql.matches('?').count(),
                    compiled.binds.len()
                );
            }
        }

        /// Numbered placeholders stay dense: `$1..$n` for n binds.
        #[test]
        fn postgres_numbering_is_dense(
            selectors in proptest::collection::vec(arb_selector(), 0..3)
        ) {
            let compiled = compile(
                DialectKind::Postgres,
                "facet_",
                "person",
                &selectors,
                &FindOptions::new("person"),
            )
            .unwrap();
            let re = regex::Regex::new(r"\$(\d+)").unwrap();
            let mut seen: Vec<usize> = re
                .captures_iter(&compiled.sql)
                .map(|c| c[1].parse().unwrap())
                .collect();
            seen.sort_unstable();
            seen.dedup();
            let expected: Vec<usize> = (1..=compiled.binds.len()).collect();
            prop_assert_eq!(seen, expected);
        }

        /// The window reaches SQL exactly when coverage is full.
        #[test]
        fn window_only_pushed_when_fully_covered(
            selectors in proptest::collection::vec(arb_selector(), 1..3)
        ) {
            let options = FindOptions::new("person").limit(5).offset(2);
            let compiled = compile(
                DialectKind::Sqlite,
                "facet_",
                "person",
                &selectors,
                &options,
            )
            .unwrap();
            if compiled.full_coverage {
                prop_assert!(compiled.sql.contains("LIMIT 5 OFFSET 2"));
            } else {
                prop_assert!(!compiled.sql.contains("LIMIT"));
            }
        }
    }
}
