//! SQLite storage driver.

use std::fmt;
use std::path::Path;

use facetdb_codec::Guid;
use facetdb_core::{
    Bind, CompiledFind, Config, DialectKind, Driver, EntityRecord, EntityRow, Error, ImportItem,
    Result,
};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::{debug, warn};

use crate::functions;
use crate::schema::{self, Tables};

/// Driver for one SQLite database, file-backed or in memory.
///
/// The connection sits behind a [`Mutex`]: rusqlite connections are not
/// `Sync`, and serializing statements through one handle also makes the
/// UID counter bumps atomic without backend-specific locking.
///
/// Per-etype tables are created lazily. A statement that fails because
/// they do not exist yet is retried once after running the DDL; any other
/// failure maps to [`Error::QueryFailed`] with the statement attached.
///
/// # Example
///
/// ```
/// use facetdb_core::{Config, Database};
/// use facetdb_sqlite::SqliteDriver;
///
/// let driver = SqliteDriver::open_in_memory().unwrap();
/// let db = Database::open(Box::new(driver), Config::new()).unwrap();
/// assert!(db.is_open());
/// ```
pub struct SqliteDriver {
    conn: Mutex<Connection>,
    prefix: String,
}

impl SqliteDriver {
    /// Opens or creates the database file at `path`.
    ///
    /// File-backed databases run in WAL mode with `synchronous = NORMAL`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the file cannot be opened or
    /// configured.
    pub fn open(path: impl AsRef<Path>) -> Result<SqliteDriver> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(connect_failed)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;\nPRAGMA synchronous = NORMAL;")
            .map_err(connect_failed)?;
        debug!("sqlite driver open at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the connection cannot be
    /// configured.
    pub fn open_in_memory() -> Result<SqliteDriver> {
        let conn = Connection::open_in_memory().map_err(connect_failed)?;
        debug!("sqlite driver open in memory");
        Self::with_connection(conn)
    }

    /// Sets the table name prefix.
    ///
    /// Must match the prefix in the [`Config`] the database is opened
    /// with; the [`open_database`](crate::open_database) helpers keep the
    /// two in sync.
    #[must_use]
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> SqliteDriver {
        self.prefix = prefix.into();
        self
    }

    fn with_connection(conn: Connection) -> Result<SqliteDriver> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(connect_failed)?;
        functions::register(&conn).map_err(connect_failed)?;
        Ok(SqliteDriver {
            conn: Mutex::new(conn),
            prefix: Config::default().table_prefix,
        })
    }

    /// Runs `op`, creating the etype's tables and retrying once when it
    /// failed because they do not exist yet.
    fn with_tables<T>(
        &self,
        etype: &str,
        op: impl Fn(&mut Connection, &Tables) -> SqlResult<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tables = Tables::new(&self.prefix, etype);
        match op(&mut conn, &tables) {
            Ok(value) => Ok(value),
            Err(fail) if fail.missing_table => {
                warn!("creating tables for etype {etype:?} after: {}", fail.message);
                self.create_schema(&conn, etype)?;
                op(&mut conn, &tables).map_err(StmtFail::into_error)
            }
            Err(fail) => Err(fail.into_error()),
        }
    }

    /// Same retry scheme for statements against the shared UID table.
    fn with_uids<T>(&self, op: impl Fn(&mut Connection, &str) -> SqlResult<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let table = schema::uids_table(&self.prefix);
        match op(&mut conn, &table) {
            Ok(value) => Ok(value),
            Err(fail) if fail.missing_table => {
                warn!("creating uid table after: {}", fail.message);
                self.ensure_uids(&conn)?;
                op(&mut conn, &table).map_err(StmtFail::into_error)
            }
            Err(fail) => Err(fail.into_error()),
        }
    }

    fn create_schema(&self, conn: &Connection, etype: &str) -> Result<()> {
        let ddl = schema::etype_ddl(&self.prefix, etype);
        conn.execute_batch(&ddl)
            .map_err(|err| Error::query_failed(err.to_string(), ddl.clone()))?;
        Ok(())
    }

    fn ensure_uids(&self, conn: &Connection) -> Result<()> {
        let ddl = schema::uids_ddl(&self.prefix);
        conn.execute_batch(&ddl)
            .map_err(|err| Error::query_failed(err.to_string(), ddl.clone()))?;
        Ok(())
    }
}

impl fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn select(&self, etype: &str, query: &CompiledFind) -> Result<Vec<EntityRow>> {
        self.with_tables(etype, |conn, _tables| {
            select_rows(conn, query).map_err(stmt_fail(&query.sql))
        })
    }

    fn create(&self, etype: &str, record: &EntityRecord) -> Result<bool> {
        self.with_tables(etype, |conn, tables| create_tx(conn, tables, record))
    }

    fn update(&self, etype: &str, record: &EntityRecord, expected_mdate: f64) -> Result<bool> {
        self.with_tables(etype, |conn, tables| {
            update_tx(conn, tables, record, expected_mdate)
        })
    }

    fn delete(&self, etype: &str, guid: Guid) -> Result<bool> {
        self.with_tables(etype, |conn, tables| {
            let sql = format!("DELETE FROM {} WHERE guid = ?", tables.entities);
            let removed = conn
                .execute(&sql, [guid.as_i64()])
                .map_err(stmt_fail(&sql))?;
            Ok(removed > 0)
        })
    }

    fn uid_get(&self, name: &str) -> Result<Option<u64>> {
        self.with_uids(|conn, table| {
            let sql = format!("SELECT cur_uid FROM {table} WHERE name = ?");
            let value: Option<i64> = conn
                .query_row(&sql, [name], |row| row.get(0))
                .optional()
                .map_err(stmt_fail(&sql))?;
            Ok(value.map(|v| v as u64))
        })
    }

    fn uid_new(&self, name: &str) -> Result<u64> {
        self.with_uids(|conn, table| {
            let tx = begin(conn)?;
            let bump = format!(
                "INSERT INTO {table} (name, cur_uid) VALUES (?, 1) \
                 ON CONFLICT (name) DO UPDATE SET cur_uid = cur_uid + 1"
            );
            tx.execute(&bump, [name]).map_err(stmt_fail(&bump))?;
            let read = format!("SELECT cur_uid FROM {table} WHERE name = ?");
            let value: i64 = tx
                .query_row(&read, [name], |row| row.get(0))
                .map_err(stmt_fail(&read))?;
            commit(tx)?;
            Ok(value as u64)
        })
    }

    fn uid_set(&self, name: &str, value: u64) -> Result<()> {
        self.with_uids(|conn, table| {
            let sql = format!(
                "INSERT INTO {table} (name, cur_uid) VALUES (?, ?) \
                 ON CONFLICT (name) DO UPDATE SET cur_uid = excluded.cur_uid"
            );
            conn.execute(&sql, params![name, value as i64])
                .map_err(stmt_fail(&sql))?;
            Ok(())
        })
    }

    fn uid_rename(&self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.with_uids(|conn, table| {
            let tx = begin(conn)?;
            let read = format!("SELECT cur_uid FROM {table} WHERE name = ?");
            let value: Option<i64> = tx
                .query_row(&read, [old], |row| row.get(0))
                .optional()
                .map_err(stmt_fail(&read))?;
            if let Some(value) = value {
                let put = format!("INSERT OR REPLACE INTO {table} (name, cur_uid) VALUES (?, ?)");
                tx.execute(&put, params![new, value]).map_err(stmt_fail(&put))?;
                let drop_old = format!("DELETE FROM {table} WHERE name = ?");
                tx.execute(&drop_old, [old]).map_err(stmt_fail(&drop_old))?;
            }
            commit(tx)
        })
    }

    fn uid_delete(&self, name: &str) -> Result<()> {
        self.with_uids(|conn, table| {
            let sql = format!("DELETE FROM {table} WHERE name = ?");
            conn.execute(&sql, [name]).map_err(stmt_fail(&sql))?;
            Ok(())
        })
    }

    fn uid_list(&self) -> Result<Vec<(String, u64)>> {
        self.with_uids(|conn, table| {
            let sql = format!("SELECT name, cur_uid FROM {table} ORDER BY name");
            let mut stmt = conn.prepare(&sql).map_err(stmt_fail(&sql))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })
                .map_err(stmt_fail(&sql))?;
            let mut out = Vec::new();
            for item in rows {
                out.push(item.map_err(stmt_fail(&sql))?);
            }
            Ok(out)
        })
    }

    fn import_batch(&self, items: &[ImportItem]) -> Result<()> {
        let mut conn = self.conn.lock();
        // The stream may touch etypes this database has never seen, so the
        // schema is brought up front and the items applied in one
        // transaction after that.
        let mut etypes: Vec<&str> = items
            .iter()
            .filter_map(|item| match item {
                ImportItem::Entity { etype, .. } => Some(etype.as_str()),
                ImportItem::Counter { .. } => None,
            })
            .collect();
        etypes.sort_unstable();
        etypes.dedup();
        for etype in &etypes {
            self.create_schema(&conn, etype)?;
        }
        self.ensure_uids(&conn)?;
        import_tx(&mut conn, &self.prefix, items).map_err(StmtFail::into_error)
    }
}

/// A failed statement, held until the lazy-create retry decides whether
/// it is fatal.
struct StmtFail {
    message: String,
    statement: String,
    missing_table: bool,
}

impl StmtFail {
    fn into_error(self) -> Error {
        Error::query_failed(self.message, self.statement)
    }
}

type SqlResult<T> = std::result::Result<T, StmtFail>;

/// Tags a rusqlite error with the statement it came from.
fn stmt_fail(statement: &str) -> impl FnOnce(rusqlite::Error) -> StmtFail + '_ {
    move |err| StmtFail {
        missing_table: matches!(
            &err,
            rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("no such table")
        ),
        message: err.to_string(),
        statement: statement.to_string(),
    }
}

fn connect_failed(err: rusqlite::Error) -> Error {
    Error::not_connected(err.to_string())
}

fn begin(conn: &mut Connection) -> SqlResult<Transaction<'_>> {
    conn.transaction().map_err(stmt_fail("BEGIN"))
}

fn commit(tx: Transaction<'_>) -> SqlResult<()> {
    tx.commit().map_err(stmt_fail("COMMIT"))
}

fn bind_value(bind: &Bind) -> SqlValue {
    match bind {
        Bind::Int(value) => SqlValue::Integer(*value),
        Bind::Float(value) => SqlValue::Real(*value),
        Bind::Text(value) => SqlValue::Text(value.clone()),
    }
}

/// Encodes a list comma-wrapped, so a probe on `,item,` only hits whole
/// items: `[] -> ","`, `[a, b] -> ",a,b,"`.
fn encode_list<S: AsRef<str>>(items: &[S]) -> String {
    let mut out = String::from(",");
    for item in items {
        out.push_str(item.as_ref());
        out.push(',');
    }
    out
}

fn decode_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn encode_refs(refs: &[Guid]) -> String {
    let mut out = String::from(",");
    for guid in refs {
        out.push_str(&guid.to_string());
        out.push(',');
    }
    out
}

fn attr_names(record: &EntityRecord) -> Vec<&str> {
    record.attrs.iter().map(|attr| attr.name.as_str()).collect()
}

/// Runs a compiled find, folding attribute rows into their entity. Rows
/// for one guid arrive contiguously because every ORDER BY the compiler
/// emits ends with the guid column.
fn select_rows(conn: &Connection, query: &CompiledFind) -> rusqlite::Result<Vec<EntityRow>> {
    let mut stmt = conn.prepare(&query.sql)?;
    let binds = query.binds.iter().map(bind_value);
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut out: Vec<EntityRow> = Vec::new();
    while let Some(row) = rows.next()? {
        let guid = Guid::new(row.get::<_, i64>(0)? as u64);
        let same = out.last().map_or(false, |prev| prev.guid == guid);
        if !same {
            out.push(EntityRow {
                guid,
                cdate: row.get(1)?,
                mdate: row.get(2)?,
                tags: decode_list(&row.get::<_, String>(3)?),
                attrs: query.select_data.then(Vec::new),
            });
        }
        if query.select_data {
            let name: Option<String> = row.get(4)?;
            let value: Option<String> = row.get(5)?;
            if let (Some(name), Some(value)) = (name, value) {
                if let Some(attrs) = out.last_mut().and_then(|r| r.attrs.as_mut()) {
                    attrs.push((name, value));
                }
            }
        }
    }
    Ok(out)
}

fn create_tx(conn: &mut Connection, tables: &Tables, record: &EntityRecord) -> SqlResult<bool> {
    let tx = begin(conn)?;
    let claim = format!(
        "INSERT OR IGNORE INTO {} (guid, tags, varlist, cdate, mdate) VALUES (?, ?, ?, ?, ?)",
        tables.entities
    );
    let inserted = tx
        .execute(
            &claim,
            params![
                record.guid.as_i64(),
                encode_list(&record.tags),
                encode_list(&attr_names(record)),
                record.cdate,
                record.mdate,
            ],
        )
        .map_err(stmt_fail(&claim))?;
    if inserted == 0 {
        // Guid already taken; the transaction rolls back on drop.
        return Ok(false);
    }
    insert_attrs(&tx, tables, record)?;
    commit(tx)?;
    Ok(true)
}

fn update_tx(
    conn: &mut Connection,
    tables: &Tables,
    record: &EntityRecord,
    expected_mdate: f64,
) -> SqlResult<bool> {
    let tx = begin(conn)?;
    let check = format!("SELECT mdate FROM {} WHERE guid = ?", tables.entities);
    let stored: Option<f64> = tx
        .query_row(&check, [record.guid.as_i64()], |row| row.get(0))
        .optional()
        .map_err(stmt_fail(&check))?;
    // Exact comparison is intended: REAL round-trips the f64 that was
    // written, and any divergence means another writer got here first.
    if stored != Some(expected_mdate) {
        return Ok(false);
    }
    let refresh = format!(
        "UPDATE {} SET tags = ?, varlist = ?, cdate = ?, mdate = ? WHERE guid = ?",
        tables.entities
    );
    tx.execute(
        &refresh,
        params![
            encode_list(&record.tags),
            encode_list(&attr_names(record)),
            record.cdate,
            record.mdate,
            record.guid.as_i64(),
        ],
    )
    .map_err(stmt_fail(&refresh))?;
    let clear_data = format!("DELETE FROM {} WHERE guid = ?", tables.data);
    tx.execute(&clear_data, [record.guid.as_i64()])
        .map_err(stmt_fail(&clear_data))?;
    let clear_comparisons = format!("DELETE FROM {} WHERE guid = ?", tables.comparisons);
    tx.execute(&clear_comparisons, [record.guid.as_i64()])
        .map_err(stmt_fail(&clear_comparisons))?;
    insert_attrs(&tx, tables, record)?;
    commit(tx)?;
    Ok(true)
}

fn insert_attrs(tx: &Transaction<'_>, tables: &Tables, record: &EntityRecord) -> SqlResult<()> {
    let data_sql = format!(
        "INSERT INTO {} (guid, name, value) VALUES (?, ?, ?)",
        tables.data
    );
    let comparisons_sql = format!(
        "INSERT INTO {} (guid, name, truthy, eq_one, eq_zero, eq_neg_one, eq_empty, \
         string, int_val, float_val, is_int, refs) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        tables.comparisons
    );
    let mut data_stmt = tx.prepare(&data_sql).map_err(stmt_fail(&data_sql))?;
    let mut comparisons_stmt = tx
        .prepare(&comparisons_sql)
        .map_err(stmt_fail(&comparisons_sql))?;
    for attr in &record.attrs {
        data_stmt
            .execute(params![record.guid.as_i64(), attr.name, attr.stored])
            .map_err(stmt_fail(&data_sql))?;
        let facets = &attr.facets;
        comparisons_stmt
            .execute(params![
                record.guid.as_i64(),
                attr.name,
                facets.truthy,
                facets.eq_one,
                facets.eq_zero,
                facets.eq_neg_one,
                facets.eq_empty,
                facets.string,
                facets.int_val,
                facets.float_val,
                facets.is_int,
                encode_refs(&facets.refs),
            ])
            .map_err(stmt_fail(&comparisons_sql))?;
    }
    Ok(())
}

fn import_tx(conn: &mut Connection, prefix: &str, items: &[ImportItem]) -> SqlResult<()> {
    let tx = begin(conn)?;
    let uids = schema::uids_table(prefix);
    for item in items {
        match item {
            ImportItem::Entity { etype, record } => {
                let tables = Tables::new(prefix, etype);
                let clear = format!("DELETE FROM {} WHERE guid = ?", tables.entities);
                tx.execute(&clear, [record.guid.as_i64()])
                    .map_err(stmt_fail(&clear))?;
                let put = format!(
                    "INSERT INTO {} (guid, tags, varlist, cdate, mdate) VALUES (?, ?, ?, ?, ?)",
                    tables.entities
                );
                tx.execute(
                    &put,
                    params![
                        record.guid.as_i64(),
                        encode_list(&record.tags),
                        encode_list(&attr_names(record)),
                        record.cdate,
                        record.mdate,
                    ],
                )
                .map_err(stmt_fail(&put))?;
                insert_attrs(&tx, &tables, record)?;
            }
            ImportItem::Counter { name, value } => {
                let put = format!(
                    "INSERT INTO {uids} (name, cur_uid) VALUES (?, ?) \
                     ON CONFLICT (name) DO UPDATE SET cur_uid = excluded.cur_uid"
                );
                tx.execute(&put, params![name, *value as i64])
                    .map_err(stmt_fail(&put))?;
            }
        }
    }
    commit(tx)
}
