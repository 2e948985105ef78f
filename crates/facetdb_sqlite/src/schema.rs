//! Table layout for the SQLite backend.
//!
//! Each etype owns three tables: an identity table keyed by guid, a data
//! table holding the serialized attribute values, and a comparisons table
//! holding the facet row the compiled probes test against. Tags, attribute
//! name lists, and reference lists are stored comma-wrapped (`,a,b,`) so a
//! substring probe on `,item,` can only hit whole items. All DDL uses
//! `IF NOT EXISTS` and is safe to reapply.

/// Quoted names of the three tables backing one etype.
pub(crate) struct Tables {
    /// Identity table: guid, tags, varlist, cdate, mdate.
    pub entities: String,
    /// Serialized attribute values.
    pub data: String,
    /// Facet rows for native comparisons.
    pub comparisons: String,
}

impl Tables {
    pub(crate) fn new(prefix: &str, etype: &str) -> Tables {
        Tables {
            entities: quote(&format!("{prefix}entities_{etype}")),
            data: quote(&format!("{prefix}data_{etype}")),
            comparisons: quote(&format!("{prefix}comparisons_{etype}")),
        }
    }
}

/// Quoted name of the shared UID counter table.
pub(crate) fn uids_table(prefix: &str) -> String {
    quote(&format!("{prefix}uids"))
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// DDL batch creating the three tables and the comparisons name index for
/// one etype.
pub(crate) fn etype_ddl(prefix: &str, etype: &str) -> String {
    let tables = Tables::new(prefix, etype);
    let name_index = quote(&format!("{prefix}idx_comparisons_{etype}_name"));
    format!(
        r#"CREATE TABLE IF NOT EXISTS {entities} (
    guid INTEGER PRIMARY KEY,
    tags TEXT NOT NULL,
    varlist TEXT NOT NULL,
    cdate REAL NOT NULL,
    mdate REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS {data} (
    guid INTEGER NOT NULL REFERENCES {entities} (guid) ON DELETE CASCADE,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (guid, name)
);

CREATE TABLE IF NOT EXISTS {comparisons} (
    guid INTEGER NOT NULL REFERENCES {entities} (guid) ON DELETE CASCADE,
    name TEXT NOT NULL,
    truthy INTEGER NOT NULL,
    eq_one INTEGER NOT NULL,
    eq_zero INTEGER NOT NULL,
    eq_neg_one INTEGER NOT NULL,
    eq_empty INTEGER NOT NULL,
    string TEXT,
    int_val INTEGER,
    float_val REAL,
    is_int INTEGER NOT NULL,
    refs TEXT NOT NULL,
    PRIMARY KEY (guid, name)
);

CREATE INDEX IF NOT EXISTS {name_index} ON {comparisons} (name);
"#,
        entities = tables.entities,
        data = tables.data,
        comparisons = tables.comparisons,
    )
}

/// DDL for the shared UID counter table.
pub(crate) fn uids_ddl(prefix: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {uids} (
    name TEXT PRIMARY KEY,
    cur_uid INTEGER NOT NULL
);
"#,
        uids = uids_table(prefix),
    )
}
