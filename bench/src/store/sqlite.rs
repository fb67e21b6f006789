//! SQLite backend (`rusqlite`, bundled).
//!
//! SQLite has no `autocommit` session variable. `autocommit = 0` is emulated
//! the way MySQL behaves: a transaction is kept open and `commit()` closes it
//! and immediately opens the next one.

use super::{Dialect, ResultSet, SessionSettings, Store, Value};
use crate::error::StoreError;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, ToSql};
use tokidx_core::{Identifier, SQL_DATETIME_FORMAT};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::DateTime(v) => {
                ToSqlOutput::Owned(SqlValue::Text(v.format(SQL_DATETIME_FORMAT).to_string()))
            }
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn decode(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<{} bytes>", bytes.len())),
    }
}

/// Map a rusqlite error onto the harness taxonomy.
fn classify(op: &str, err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let message = message.clone().unwrap_or_else(|| failure.to_string());
        if matches!(
            failure.code,
            ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::PermissionDenied
        ) {
            return StoreError::connectivity(op, message);
        }
        if let Some(object) = message.strip_suffix(" already exists") {
            return StoreError::AlreadyExists {
                op: op.to_string(),
                object: object.to_string(),
                message,
            };
        }
        return StoreError::query(op, message);
    }
    StoreError::query(op, err)
}

pub struct SqliteStore {
    conn: Connection,
    /// Emulated `autocommit = 0`.
    autocommit_off: bool,
}

impl SqliteStore {
    /// Open a database file; `":memory:"` gives a private in-memory database.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| classify("open sqlite database", e))?;
        log::info!("Opened SQLite database at {path}");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            autocommit_off: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn batch(&self, op: &str, sql: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(sql).map_err(|e| classify(op, e))
    }
}

impl Store for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| classify("execute", e))?;
        match stmt.execute(params_from_iter(params.iter())) {
            Ok(n) => Ok(n as u64),
            // Setter pragmas that echo their new value have already taken effect.
            Err(rusqlite::Error::ExecuteReturnedResults) => Ok(0),
            Err(e) => Err(classify("execute", e)),
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| classify("query", e))?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| classify("query", e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| classify("query", e))? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(decode(row.get_ref(i).map_err(|e| classify("query", e))?));
            }
            out.push(values);
        }
        Ok(ResultSet { columns, rows: out })
    }

    fn fetch_all_count(&mut self, sql: &str, params: &[Value]) -> Result<usize, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| classify("fetch", e))?;
        let width = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| classify("fetch", e))?;
        let mut materialized: Vec<Vec<SqlValue>> = Vec::new();
        while let Some(row) = rows.next().map_err(|e| classify("fetch", e))? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get::<_, SqlValue>(i).map_err(|e| classify("fetch", e))?);
            }
            materialized.push(values);
        }
        Ok(materialized.len())
    }

    fn session_settings(&mut self) -> Result<SessionSettings, StoreError> {
        let foreign_keys: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .map_err(|e| classify("read session settings", e))?;
        Ok(SessionSettings {
            autocommit: !self.autocommit_off,
            foreign_key_checks: foreign_keys != 0,
        })
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), StoreError> {
        if enabled {
            if !self.conn.is_autocommit() {
                self.batch("set autocommit", "COMMIT")?;
            }
        } else if self.conn.is_autocommit() {
            self.batch("set autocommit", "BEGIN")?;
        }
        self.autocommit_off = !enabled;
        Ok(())
    }

    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<(), StoreError> {
        // No-op inside an open transaction; callers toggle it outside one.
        let sql = if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        self.batch("set foreign key checks", sql)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            self.batch("commit", "COMMIT")?;
        }
        if self.autocommit_off {
            self.batch("commit", "BEGIN")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            self.batch("rollback", "ROLLBACK")?;
        }
        if self.autocommit_off {
            self.batch("rollback", "BEGIN")?;
        }
        Ok(())
    }

    fn use_database(&mut self, database: &Identifier) -> Result<(), StoreError> {
        log::debug!("sqlite: ignoring database `{database}`");
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        self.conn
            .close()
            .map_err(|(_, e)| classify("close sqlite database", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let mut s = SqliteStore::open_in_memory().unwrap();
        s.execute("CREATE TABLE t (a INT, b TEXT)", &[]).unwrap();
        s
    }

    #[test]
    fn binds_and_decodes_values() {
        let mut s = store();
        s.execute(
            "INSERT INTO t (a, b) VALUES (?, ?), (?, ?)",
            &[Value::Int(1), "x".into(), Value::Int(2), Value::Null],
        )
        .unwrap();
        let sql = "SELECT a, b FROM t WHERE a >= ? ORDER BY a";
        let rs = s.query(sql, &[Value::Int(1)]).unwrap();
        assert_eq!(rs.columns, vec!["a", "b"]);
        assert_eq!(rs.rows[0], vec![Value::Int(1), Value::Text("x".into())]);
        assert_eq!(rs.rows[1], vec![Value::Int(2), Value::Null]);
        assert_eq!(s.fetch_all_count("SELECT * FROM t", &[]).unwrap(), 2);
    }

    #[test]
    fn classifies_duplicate_index_and_bad_column() {
        let mut s = store();
        s.execute("CREATE INDEX idx_a ON t (a)", &[]).unwrap();
        let dup = s.execute("CREATE INDEX idx_a ON t (a)", &[]).unwrap_err();
        assert!(dup.is_already_exists(), "{dup}");

        let bad = s.query("SELECT nope FROM t", &[]).unwrap_err();
        assert!(matches!(bad, StoreError::Query { .. }), "{bad}");
    }

    #[test]
    fn emulated_autocommit_round_trip() {
        let mut s = store();
        assert!(s.session_settings().unwrap().autocommit);

        s.set_autocommit(false).unwrap();
        s.execute("INSERT INTO t (a) VALUES (1)", &[]).unwrap();
        s.rollback().unwrap();
        assert_eq!(s.fetch_all_count("SELECT * FROM t", &[]).unwrap(), 0);

        s.execute("INSERT INTO t (a) VALUES (2)", &[]).unwrap();
        s.commit().unwrap();
        assert!(
            !s.connection().is_autocommit(),
            "commit reopens a transaction"
        );

        s.set_autocommit(true).unwrap();
        assert!(s.connection().is_autocommit());
        assert!(s.session_settings().unwrap().autocommit);
        assert_eq!(s.fetch_all_count("SELECT * FROM t", &[]).unwrap(), 1);
    }

    #[test]
    fn foreign_key_pragma_is_observable() {
        let mut s = store();
        s.set_foreign_key_checks(true).unwrap();
        assert!(s.session_settings().unwrap().foreign_key_checks);
        s.set_foreign_key_checks(false).unwrap();
        assert!(!s.session_settings().unwrap().foreign_key_checks);
    }

    #[test]
    fn explain_returns_plan_rows() {
        let mut s = store();
        let sql = "SELECT * FROM t WHERE a = ?";
        let plan = s.explain(sql, &[Value::Int(1)]).unwrap();
        assert!(!plan.is_empty());
        assert!(plan[0].get("detail").is_some());
    }
}
