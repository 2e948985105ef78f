//! SQL dialect renderers.
//!
//! Every backend-specific piece of query text lives behind [`Dialect`]:
//! identifier quoting, placeholder syntax, list-membership tests over the
//! encoded tag/name/reference lists, and the pattern operators. The
//! compiler builds identical predicate trees for every backend and lets
//! the dialect decide the final spelling.

use facetdb_codec::Guid;

use super::pred::PatternKind;

/// Which SQL dialect a driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    /// SQLite, with a registered `REGEXP` function.
    Sqlite,
    /// MySQL or MariaDB.
    MySql,
    /// PostgreSQL.
    Postgres,
}

impl DialectKind {
    pub(crate) fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::Sqlite => &SqliteDialect,
            DialectKind::MySql => &MySqlDialect,
            DialectKind::Postgres => &PostgresDialect,
        }
    }
}

/// One bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    /// 64-bit integer parameter.
    Int(i64),
    /// Float parameter.
    Float(f64),
    /// Text parameter.
    Text(String),
}

pub(crate) trait Dialect: Sync {
    /// Quote an identifier.
    fn quote(&self, ident: &str) -> String;

    /// Placeholder for the `index`-th parameter (1-based).
    fn placeholder(&self, index: usize) -> String;

    /// Test that an encoded text list column contains the bound element.
    fn list_contains(&self, column: &str, ph: &str) -> String;

    /// Test that an encoded guid list column contains the bound guid.
    fn int_list_contains(&self, column: &str, ph: &str) -> String;

    /// Bind value for a guid probed through [`Dialect::int_list_contains`].
    fn ref_bind(&self, guid: Guid) -> Bind;

    /// Render a pattern test, or `None` when this backend cannot run it
    /// natively. Returns the SQL fragment and the (possibly rewritten)
    /// pattern to bind.
    fn pattern(&self, column: &str, kind: PatternKind, pattern: &str, ph: &str)
        -> Option<(String, Bind)>;

    /// Whether [`Dialect::pattern`] would succeed for this kind.
    fn supports_pattern(&self, kind: PatternKind) -> bool;

    /// Render the window clause, with a leading space when non-empty.
    fn limit_clause(&self, limit: Option<usize>, offset: usize) -> String {
        match (limit, offset) {
            (None, 0) => String::new(),
            (Some(l), 0) => format!(" LIMIT {l}"),
            (Some(l), o) => format!(" LIMIT {l} OFFSET {o}"),
            (None, o) => format!(" OFFSET {o}"),
        }
    }
}

pub(crate) struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn list_contains(&self, column: &str, ph: &str) -> String {
        // Lists are stored comma-wrapped (",a,b,") so a comma-delimited
        // probe cannot match a fragment of a longer element.
        format!("instr({column}, ',' || {ph} || ',') > 0")
    }

    fn int_list_contains(&self, column: &str, ph: &str) -> String {
        self.list_contains(column, ph)
    }

    fn ref_bind(&self, guid: Guid) -> Bind {
        Bind::Text(guid.to_string())
    }

    fn pattern(
        &self,
        column: &str,
        kind: PatternKind,
        pattern: &str,
        ph: &str,
    ) -> Option<(String, Bind)> {
        match kind {
            PatternKind::Like => Some((
                format!("{column} GLOB {ph}"),
                Bind::Text(like_to_glob(pattern)),
            )),
            PatternKind::Ilike => {
                // SQLite LIKE is case-insensitive for ASCII by default.
                Some((format!("{column} LIKE {ph}"), Bind::Text(pattern.to_string())))
            }
            PatternKind::Match | PatternKind::Pmatch => Some((
                format!("{column} REGEXP {ph}"),
                Bind::Text(pattern.to_string()),
            )),
            PatternKind::Ipmatch => Some((
                format!("{column} REGEXP {ph}"),
                Bind::Text(format!("(?i){pattern}")),
            )),
        }
    }

    fn supports_pattern(&self, _kind: PatternKind) -> bool {
        true
    }

    fn limit_clause(&self, limit: Option<usize>, offset: usize) -> String {
        match (limit, offset) {
            (None, 0) => String::new(),
            (Some(l), 0) => format!(" LIMIT {l}"),
            (Some(l), o) => format!(" LIMIT {l} OFFSET {o}"),
            // SQLite requires a LIMIT before OFFSET; -1 means unbounded.
            (None, o) => format!(" LIMIT -1 OFFSET {o}"),
        }
    }
}

pub(crate) struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn quote(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn list_contains(&self, column: &str, ph: &str) -> String {
        format!("FIND_IN_SET({ph}, {column}) > 0")
    }

    fn int_list_contains(&self, column: &str, ph: &str) -> String {
        self.list_contains(column, ph)
    }

    fn ref_bind(&self, guid: Guid) -> Bind {
        Bind::Text(guid.to_string())
    }

    fn pattern(
        &self,
        column: &str,
        kind: PatternKind,
        pattern: &str,
        ph: &str,
    ) -> Option<(String, Bind)> {
        match kind {
            PatternKind::Like => Some((
                format!("{column} LIKE BINARY {ph}"),
                Bind::Text(pattern.to_string()),
            )),
            PatternKind::Ilike => {
                Some((format!("{column} LIKE {ph}"), Bind::Text(pattern.to_string())))
            }
            PatternKind::Match => Some((
                format!("{column} REGEXP {ph}"),
                Bind::Text(pattern.to_string()),
            )),
            // MySQL regex syntax differs enough from Perl-style patterns
            // that these run in process instead.
            PatternKind::Pmatch | PatternKind::Ipmatch => None,
        }
    }

    fn supports_pattern(&self, kind: PatternKind) -> bool {
        !matches!(kind, PatternKind::Pmatch | PatternKind::Ipmatch)
    }

    fn limit_clause(&self, limit: Option<usize>, offset: usize) -> String {
        match (limit, offset) {
            (None, 0) => String::new(),
            (Some(l), 0) => format!(" LIMIT {l}"),
            (Some(l), o) => format!(" LIMIT {l} OFFSET {o}"),
            // MySQL has no unbounded marker; the manual suggests this.
            (None, o) => format!(" LIMIT 18446744073709551615 OFFSET {o}"),
        }
    }
}

pub(crate) struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn list_contains(&self, column: &str, ph: &str) -> String {
        format!("{ph} = ANY({column})")
    }

    fn int_list_contains(&self, column: &str, ph: &str) -> String {
        format!("{ph} = ANY({column})")
    }

    fn ref_bind(&self, guid: Guid) -> Bind {
        Bind::Int(guid.as_i64())
    }

    fn pattern(
        &self,
        column: &str,
        kind: PatternKind,
        pattern: &str,
        ph: &str,
    ) -> Option<(String, Bind)> {
        let sql = match kind {
            PatternKind::Like => format!("{column} LIKE {ph}"),
            PatternKind::Ilike => format!("{column} ILIKE {ph}"),
            PatternKind::Match | PatternKind::Pmatch => format!("{column} ~ {ph}"),
            PatternKind::Ipmatch => format!("{column} ~* {ph}"),
        };
        Some((sql, Bind::Text(pattern.to_string())))
    }

    fn supports_pattern(&self, _kind: PatternKind) -> bool {
        true
    }
}

/// Translate a `%`/`_` wildcard pattern to SQLite GLOB syntax.
///
/// GLOB metacharacters in the input are escaped with character classes so
/// only the translated wildcards stay special.
pub(crate) fn like_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '%' => out.push('*'),
            '_' => out.push('?'),
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_to_glob_translates_wildcards() {
        assert_eq!(like_to_glob("J%n_"), "J*n?");
        assert_eq!(like_to_glob("100%"), "100*");
        assert_eq!(like_to_glob("plain"), "plain");
    }

    #[test]
    fn like_to_glob_escapes_glob_metacharacters() {
        assert_eq!(like_to_glob("a*b"), "a[*]b");
        assert_eq!(like_to_glob("a?b"), "a[?]b");
        assert_eq!(like_to_glob("a[b]"), "a[[]b]");
        assert_eq!(like_to_glob("*?["), "[*][?][[]");
    }

    #[test]
    fn sqlite_list_probe_is_comma_delimited() {
        let d = SqliteDialect;
        assert_eq!(
            d.list_contains("e.tags", "?"),
            "instr(e.tags, ',' || ? || ',') > 0"
        );
    }

    #[test]
    fn mysql_uses_find_in_set_and_binary_like() {
        let d = MySqlDialect;
        assert_eq!(d.list_contains("e.tags", "?"), "FIND_IN_SET(?, e.tags) > 0");
        let (sql, bind) = d.pattern("c.string", PatternKind::Like, "J%", "?").unwrap();
        assert_eq!(sql, "c.string LIKE BINARY ?");
        assert_eq!(bind, Bind::Text("J%".to_string()));
        assert!(d.pattern("c.string", PatternKind::Pmatch, "^J", "?").is_none());
        assert!(!d.supports_pattern(PatternKind::Ipmatch));
    }

    #[test]
    fn postgres_numbers_placeholders_and_probes_arrays() {
        let d = PostgresDialect;
        assert_eq!(d.placeholder(1), "$1");
        assert_eq!(d.placeholder(12), "$12");
        assert_eq!(d.list_contains("e.tags", "$3"), "$3 = ANY(e.tags)");
        assert_eq!(d.ref_bind(Guid::new(9)), Bind::Int(9));
    }

    #[test]
    fn sqlite_case_insensitive_regex_rewrites_pattern() {
        let d = SqliteDialect;
        let (sql, bind) = d
            .pattern("c.string", PatternKind::Ipmatch, "^jo", "?")
            .unwrap();
        assert_eq!(sql, "c.string REGEXP ?");
        assert_eq!(bind, Bind::Text("(?i)^jo".to_string()));
    }

    #[test]
    fn offset_without_limit_stays_valid_per_dialect() {
        assert_eq!(SqliteDialect.limit_clause(None, 5), " LIMIT -1 OFFSET 5");
        assert_eq!(
            MySqlDialect.limit_clause(None, 5),
            " LIMIT 18446744073709551615 OFFSET 5"
        );
        assert_eq!(PostgresDialect.limit_clause(None, 5), " OFFSET 5");
        assert_eq!(SqliteDialect.limit_clause(Some(10), 0), " LIMIT 10");
        assert_eq!(PostgresDialect.limit_clause(Some(10), 20), " LIMIT 10 OFFSET 20");
        assert_eq!(MySqlDialect.limit_clause(None, 0), "");
    }
}
