//! Selector algebra for querying entities.
//!
//! A query is a forest of selectors combined by implicit AND. Each selector
//! carries a combinator, clause terms, and nested selector terms.
//!
//! Negation distributes into terms rather than applying De Morgan to the
//! group: a term's effective truth is its raw result XOR its own negation
//! XOR the combinator's NOT flag, and terms join with AND for [`And`] and
//! [`NotAnd`], OR for [`Or`] and [`NotOr`]. `NotAnd` is therefore the AND
//! of negated terms.
//!
//! [`And`]: Combinator::And
//! [`NotAnd`]: Combinator::NotAnd
//! [`Or`]: Combinator::Or
//! [`NotOr`]: Combinator::NotOr

use facetdb_codec::{Guid, Value};

use crate::error::{Error, Result};

/// How a selector combines its terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Every term must hold.
    And,
    /// At least one term must hold.
    Or,
    /// Every term, negated, must hold.
    NotAnd,
    /// At least one term, negated, must hold.
    NotOr,
}

impl Combinator {
    /// Whether this is a NOT variant that negates each term.
    #[must_use]
    pub const fn is_not(self) -> bool {
        matches!(self, Combinator::NotAnd | Combinator::NotOr)
    }

    /// Whether terms join with OR rather than AND.
    #[must_use]
    pub const fn is_or(self) -> bool {
        matches!(self, Combinator::Or | Combinator::NotOr)
    }
}

/// A single raw test against one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    /// Entity guid is one of the listed guids.
    Guid(Vec<Guid>),
    /// Entity carries the tag.
    Tag(String),
    /// The attribute is set.
    Isset(String),
    /// The attribute holds a reference to the guid anywhere inside its
    /// value.
    RefTo {
        /// Attribute name.
        name: String,
        /// Target guid.
        guid: Guid,
    },
    /// The attribute loosely equals the value (see
    /// [`facetdb_codec::loose_matches`]).
    Equal {
        /// Attribute name.
        name: String,
        /// Comparison argument.
        value: Value,
    },
    /// The attribute's canonical stored form equals the value's exactly.
    Strict {
        /// Attribute name.
        name: String,
        /// Comparison argument.
        value: Value,
    },
    /// SQL-style wildcard pattern (`%` any run, `_` one character),
    /// case-sensitive, against string values.
    Like {
        /// Attribute name.
        name: String,
        /// Wildcard pattern.
        pattern: String,
    },
    /// SQL-style wildcard pattern, case-insensitive.
    Ilike {
        /// Attribute name.
        name: String,
        /// Wildcard pattern.
        pattern: String,
    },
    /// Regular expression with POSIX character classes, case-sensitive.
    Match {
        /// Attribute name.
        name: String,
        /// Regular expression.
        pattern: String,
    },
    /// Full modern regular expression, case-sensitive.
    Pmatch {
        /// Attribute name.
        name: String,
        /// Regular expression.
        pattern: String,
    },
    /// Full modern regular expression, case-insensitive.
    Ipmatch {
        /// Attribute name.
        name: String,
        /// Regular expression.
        pattern: String,
    },
    /// The attribute is numerically greater than the value.
    Gt {
        /// Attribute name.
        name: String,
        /// Comparison argument.
        value: Value,
    },
    /// The attribute is numerically greater than or equal to the value.
    Gte {
        /// Attribute name.
        name: String,
        /// Comparison argument.
        value: Value,
    },
    /// The attribute is numerically less than the value.
    Lt {
        /// Attribute name.
        name: String,
        /// Comparison argument.
        value: Value,
    },
    /// The attribute is numerically less than or equal to the value.
    Lte {
        /// Attribute name.
        name: String,
        /// Comparison argument.
        value: Value,
    },
    /// The attribute is an array with an element loosely matching the
    /// value.
    Contains {
        /// Attribute name.
        name: String,
        /// Element argument.
        value: Value,
    },
}

impl Test {
    /// The attribute name this test inspects, if it has one.
    #[must_use]
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Test::Guid(_) | Test::Tag(_) => None,
            Test::Isset(name)
            | Test::RefTo { name, .. }
            | Test::Equal { name, .. }
            | Test::Strict { name, .. }
            | Test::Like { name, .. }
            | Test::Ilike { name, .. }
            | Test::Match { name, .. }
            | Test::Pmatch { name, .. }
            | Test::Ipmatch { name, .. }
            | Test::Gt { name, .. }
            | Test::Gte { name, .. }
            | Test::Lt { name, .. }
            | Test::Lte { name, .. }
            | Test::Contains { name, .. } => Some(name),
        }
    }
}

/// One selector term: a raw test with optional negation.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Negate the raw test result.
    pub negated: bool,
    /// The raw test.
    pub test: Test,
}

impl Clause {
    const fn of(test: Test) -> Self {
        Clause {
            negated: false,
            test,
        }
    }

    /// Entity guid is one of the listed guids.
    pub fn guid<I, G>(guids: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<Guid>,
    {
        Clause::of(Test::Guid(guids.into_iter().map(Into::into).collect()))
    }

    /// Entity carries the tag.
    pub fn tag(tag: impl Into<String>) -> Self {
        Clause::of(Test::Tag(tag.into()))
    }

    /// The attribute is set.
    pub fn isset(name: impl Into<String>) -> Self {
        Clause::of(Test::Isset(name.into()))
    }

    /// The attribute references the guid.
    pub fn ref_to(name: impl Into<String>, guid: impl Into<Guid>) -> Self {
        Clause::of(Test::RefTo {
            name: name.into(),
            guid: guid.into(),
        })
    }

    /// The attribute loosely equals the value.
    pub fn equal(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::of(Test::Equal {
            name: name.into(),
            value: value.into(),
        })
    }

    /// The attribute's stored form equals the value's exactly.
    pub fn strict(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::of(Test::Strict {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Case-sensitive wildcard pattern.
    pub fn like(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Clause::of(Test::Like {
            name: name.into(),
            pattern: pattern.into(),
        })
    }

    /// Case-insensitive wildcard pattern.
    pub fn ilike(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Clause::of(Test::Ilike {
            name: name.into(),
            pattern: pattern.into(),
        })
    }

    /// Case-sensitive POSIX regular expression.
    pub fn matches(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Clause::of(Test::Match {
            name: name.into(),
            pattern: pattern.into(),
        })
    }

    /// Case-sensitive modern regular expression.
    pub fn pmatch(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Clause::of(Test::Pmatch {
            name: name.into(),
            pattern: pattern.into(),
        })
    }

    /// Case-insensitive modern regular expression.
    pub fn ipmatch(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Clause::of(Test::Ipmatch {
            name: name.into(),
            pattern: pattern.into(),
        })
    }

    /// The attribute is numerically greater than the value.
    pub fn gt(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::of(Test::Gt {
            name: name.into(),
            value: value.into(),
        })
    }

    /// The attribute is numerically greater than or equal to the value.
    pub fn gte(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::of(Test::Gte {
            name: name.into(),
            value: value.into(),
        })
    }

    /// The attribute is numerically less than the value.
    pub fn lt(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::of(Test::Lt {
            name: name.into(),
            value: value.into(),
        })
    }

    /// The attribute is numerically less than or equal to the value.
    pub fn lte(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::of(Test::Lte {
            name: name.into(),
            value: value.into(),
        })
    }

    /// The attribute is an array containing a loosely matching element.
    pub fn contains(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::of(Test::Contains {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Flip this clause's negation.
    #[must_use]
    pub const fn negated(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

/// A selector: a combinator over clause and nested-selector terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    /// How terms combine.
    pub combinator: Combinator,
    /// Clause terms.
    pub clauses: Vec<Clause>,
    /// Nested selector terms. A nested selector's result is negated by the
    /// parent's NOT variant like any other term.
    pub selectors: Vec<Selector>,
}

impl Selector {
    /// Create an empty selector with the given combinator.
    #[must_use]
    pub const fn new(combinator: Combinator) -> Self {
        Selector {
            combinator,
            clauses: Vec::new(),
            selectors: Vec::new(),
        }
    }

    /// An AND selector.
    #[must_use]
    pub const fn and() -> Self {
        Selector::new(Combinator::And)
    }

    /// An OR selector.
    #[must_use]
    pub const fn or() -> Self {
        Selector::new(Combinator::Or)
    }

    /// A NOT-AND selector (every term negated, joined by AND).
    #[must_use]
    pub const fn not_and() -> Self {
        Selector::new(Combinator::NotAnd)
    }

    /// A NOT-OR selector (every term negated, joined by OR).
    #[must_use]
    pub const fn not_or() -> Self {
        Selector::new(Combinator::NotOr)
    }

    /// Add a clause term.
    #[must_use]
    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Add a nested selector term.
    #[must_use]
    pub fn nested(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Add a tag clause.
    #[must_use]
    pub fn tag(self, tag: impl Into<String>) -> Self {
        self.clause(Clause::tag(tag))
    }

    /// Add a guid membership clause.
    #[must_use]
    pub fn guid<I, G>(self, guids: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<Guid>,
    {
        self.clause(Clause::guid(guids))
    }

    /// Add an attribute-is-set clause.
    #[must_use]
    pub fn isset(self, name: impl Into<String>) -> Self {
        self.clause(Clause::isset(name))
    }

    /// Add a reference clause.
    #[must_use]
    pub fn ref_to(self, name: impl Into<String>, guid: impl Into<Guid>) -> Self {
        self.clause(Clause::ref_to(name, guid))
    }

    /// Add a loose equality clause.
    #[must_use]
    pub fn equal(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::equal(name, value))
    }

    /// Add a strict equality clause.
    #[must_use]
    pub fn strict(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::strict(name, value))
    }

    /// Add a case-sensitive wildcard clause.
    #[must_use]
    pub fn like(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.clause(Clause::like(name, pattern))
    }

    /// Add a case-insensitive wildcard clause.
    #[must_use]
    pub fn ilike(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.clause(Clause::ilike(name, pattern))
    }

    /// Add a POSIX regular expression clause.
    #[must_use]
    pub fn matches(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.clause(Clause::matches(name, pattern))
    }

    /// Add a modern regular expression clause.
    #[must_use]
    pub fn pmatch(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.clause(Clause::pmatch(name, pattern))
    }

    /// Add a case-insensitive regular expression clause.
    #[must_use]
    pub fn ipmatch(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.clause(Clause::ipmatch(name, pattern))
    }

    /// Add a greater-than clause.
    #[must_use]
    pub fn gt(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::gt(name, value))
    }

    /// Add a greater-or-equal clause.
    #[must_use]
    pub fn gte(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::gte(name, value))
    }

    /// Add a less-than clause.
    #[must_use]
    pub fn lt(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::lt(name, value))
    }

    /// Add a less-or-equal clause.
    #[must_use]
    pub fn lte(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::lte(name, value))
    }

    /// Add an array containment clause.
    #[must_use]
    pub fn contains(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::contains(name, value))
    }

    /// Whether this selector or any nested one has sub-selectors.
    #[must_use]
    pub fn has_nested(&self) -> bool {
        !self.selectors.is_empty()
    }
}

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sort {
    /// By guid.
    Guid,
    /// By creation time.
    #[default]
    Cdate,
    /// By last modification time.
    Mdate,
}

/// What a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Return {
    /// Full entities.
    #[default]
    Entity,
    /// Guids only.
    Guid,
}

/// Options controlling a find operation.
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Registered class to search.
    pub class: String,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of matching results to skip.
    pub offset: usize,
    /// Sort order.
    pub sort: Sort,
    /// Reverse the sort order.
    pub reverse: bool,
    /// What to return.
    pub ret: Return,
    /// Opaque flag carried for outer access-control layers. The engine
    /// never interprets it.
    pub skip_ac: bool,
}

impl FindOptions {
    /// Options for the given class with defaults: no window, cdate order,
    /// full entities.
    pub fn new(class: impl Into<String>) -> Self {
        FindOptions {
            class: class.into(),
            limit: None,
            offset: 0,
            sort: Sort::default(),
            reverse: false,
            ret: Return::default(),
            skip_ac: false,
        }
    }

    /// Sets the result limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the result offset.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub const fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Reverses the sort order.
    #[must_use]
    pub const fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Sets what the query returns.
    #[must_use]
    pub const fn ret(mut self, ret: Return) -> Self {
        self.ret = ret;
        self
    }

    /// Sets the access-control bypass flag for outer layers.
    #[must_use]
    pub const fn skip_ac(mut self, skip: bool) -> Self {
        self.skip_ac = skip;
        self
    }
}

/// Validate a selector forest before compilation.
///
/// # Errors
///
/// Returns [`Error::InvalidParameters`] for empty selectors, empty
/// attribute names or tags, empty guid lists, ordered comparisons against
/// non-numeric or non-finite arguments, and regular expression patterns
/// that do not compile.
pub fn validate(selectors: &[Selector]) -> Result<()> {
    for selector in selectors {
        validate_selector(selector)?;
    }
    Ok(())
}

fn validate_selector(selector: &Selector) -> Result<()> {
    if selector.clauses.is_empty() && selector.selectors.is_empty() {
        return Err(Error::invalid_parameters("empty selector"));
    }
    for clause in &selector.clauses {
        validate_test(&clause.test)?;
    }
    for nested in &selector.selectors {
        validate_selector(nested)?;
    }
    Ok(())
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_parameters("empty attribute name"));
    }
    Ok(())
}

fn require_numeric(op: &str, value: &Value) -> Result<()> {
    match facetdb_codec::numeric(value) {
        None => Err(Error::invalid_parameters(format!(
            "{op} argument must be numeric, got {}",
            value.type_name()
        ))),
        // NaN and infinity have no stored counterpart to compare against.
        Some(number) if !number.is_finite() => Err(Error::invalid_parameters(format!(
            "{op} argument must be finite"
        ))),
        Some(_) => Ok(()),
    }
}

fn require_pattern(pattern: &str) -> Result<()> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| Error::invalid_parameters(format!("invalid pattern: {e}")))
}

fn validate_test(test: &Test) -> Result<()> {
    match test {
        Test::Guid(guids) => {
            if guids.is_empty() {
                return Err(Error::invalid_parameters("empty guid list"));
            }
            Ok(())
        }
        Test::Tag(tag) => {
            if tag.is_empty() {
                return Err(Error::invalid_parameters("empty tag"));
            }
            Ok(())
        }
        Test::Isset(name) => require_name(name),
        Test::RefTo { name, .. }
        | Test::Equal { name, .. }
        | Test::Strict { name, .. }
        | Test::Contains { name, .. } => require_name(name),
        Test::Like { name, .. } | Test::Ilike { name, .. } => require_name(name),
        Test::Match { name, pattern }
        | Test::Pmatch { name, pattern }
        | Test::Ipmatch { name, pattern } => {
            require_name(name)?;
            require_pattern(pattern)
        }
        Test::Gt { name, value }
        | Test::Gte { name, value }
        | Test::Lt { name, value }
        | Test::Lte { name, value } => {
            require_name(name)?;
            require_numeric("ordered comparison", value)
        }
    }
}
