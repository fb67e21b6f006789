//! MySQL backend.
//!
//! One `sqlx` [`MySqlConnection`] driven by a private current-thread tokio
//! runtime. Every trait call `block_on`s a single round-trip, so the harness
//! stays a plain sequential program.

use super::{Dialect, ResultSet, SessionSettings, Store, Value};
use crate::config::MySqlSettings;
use crate::error::StoreError;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlDatabaseError, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, MySql, MySqlConnection, Row, ValueRef};
use tokidx_core::Identifier;
use tokio::runtime::{Builder, Runtime};

/// ER_DB_CREATE_EXISTS, ER_TABLE_EXISTS_ERROR, ER_DUP_KEYNAME.
const ALREADY_EXISTS_CODES: [u16; 3] = [1007, 1050, 1061];

fn classify(op: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| e.number());
            let message = db.message().to_string();
            match code {
                Some(code) if ALREADY_EXISTS_CODES.contains(&code) => StoreError::AlreadyExists {
                    op: op.to_string(),
                    object: object_from_message(&message),
                    message,
                },
                _ => StoreError::query(op, message),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::connectivity(op, err),
        other => StoreError::query(op, other),
    }
}

/// `Duplicate key name 'idx_user_id'` → `idx_user_id`.
fn object_from_message(message: &str) -> String {
    message
        .split('\'')
        .nth(1)
        .map(str::to_string)
        .unwrap_or_else(|| message.to_string())
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(Option::<String>::None),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::DateTime(v) => query.bind(*v),
            Value::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

/// `@@autocommit, @@foreign_key_checks`. A value that does not decode is an
/// error: the bulk-load guard restores whatever is read here.
fn session_from_row(row: &[Value]) -> Result<SessionSettings, StoreError> {
    let flag = |i: usize, name: &str| match row.get(i).and_then(Value::as_i64) {
        Some(v) => Ok(v != 0),
        None => Err(StoreError::query("read session settings", format!("bad @@{name}"))),
    };
    Ok(SessionSettings {
        autocommit: flag(0, "autocommit")?,
        foreign_key_checks: flag(1, "foreign_key_checks")?,
    })
}

/// Best-effort decode of one column; the harness only displays these.
fn decode(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        Ok(_) => {}
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::Int(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return i64::try_from(v).map_or_else(|_| Value::Text(v.to_string()), Value::Int);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::Float(v);
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Value::DateTime(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::Text(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return Value::Text(String::from_utf8_lossy(&v).into_owned());
    }
    Value::Text("?".to_string())
}

pub struct MySqlStore {
    runtime: Runtime,
    conn: MySqlConnection,
}

impl MySqlStore {
    /// Connect without selecting a database; call [`Store::use_database`] or
    /// the schema manager's `ensure_database` afterwards.
    pub fn connect(settings: &MySqlSettings) -> Result<Self, StoreError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::connectivity("start client runtime", e))?;

        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password);

        let conn = runtime
            .block_on(MySqlConnection::connect_with(&options))
            .map_err(|e| {
                let err = classify("connect", e);
                // A refused login is still "cannot reach the store" for the run.
                match err {
                    StoreError::Query { op, message } => StoreError::Connectivity { op, message },
                    other => other,
                }
            })?;

        log::info!(
            "Connected to MySQL at {}:{} as {}",
            settings.host,
            settings.port,
            settings.user
        );
        Ok(Self { runtime, conn })
    }

    fn raw(&mut self, op: &str, sql: &str) -> Result<u64, StoreError> {
        let conn = &mut self.conn;
        self.runtime
            .block_on(async move { sqlx::raw_sql(sql).execute(conn).await })
            .map(|r| r.rows_affected())
            .map_err(|e| classify(op, e))
    }

    fn fetch_rows(
        &mut self,
        op: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<MySqlRow>, StoreError> {
        let conn = &mut self.conn;
        let query = bind_all(sqlx::query(sql), params);
        self.runtime
            .block_on(async move { query.fetch_all(conn).await })
            .map_err(|e| classify(op, e))
    }
}

impl Store for MySqlStore {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        if params.is_empty() {
            // Text protocol: DDL and SET statements need not be preparable.
            return self.raw("execute", sql);
        }
        let conn = &mut self.conn;
        let query = bind_all(sqlx::query(sql), params);
        self.runtime
            .block_on(async move { query.execute(conn).await })
            .map(|r| r.rows_affected())
            .map_err(|e| classify("execute", e))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, StoreError> {
        let rows = self.fetch_rows("query", sql, params)?;
        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| decode(row, i)).collect())
            .collect();
        Ok(ResultSet { columns, rows })
    }

    fn fetch_all_count(&mut self, sql: &str, params: &[Value]) -> Result<usize, StoreError> {
        Ok(self.fetch_rows("fetch", sql, params)?.len())
    }

    fn session_settings(&mut self) -> Result<SessionSettings, StoreError> {
        let rs = self.query(
            "SELECT @@autocommit AS autocommit, @@foreign_key_checks AS foreign_key_checks",
            &[],
        )?;
        let row = rs
            .rows
            .first()
            .ok_or_else(|| StoreError::query("read session settings", "no row returned"))?;
        session_from_row(row)
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), StoreError> {
        let sql = if enabled {
            "SET autocommit = 1"
        } else {
            "SET autocommit = 0"
        };
        self.raw("set autocommit", sql).map(|_| ())
    }

    fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<(), StoreError> {
        let sql = if enabled {
            "SET FOREIGN_KEY_CHECKS = 1"
        } else {
            "SET FOREIGN_KEY_CHECKS = 0"
        };
        self.raw("set foreign key checks", sql).map(|_| ())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.raw("commit", "COMMIT").map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.raw("rollback", "ROLLBACK").map(|_| ())
    }

    fn use_database(&mut self, database: &Identifier) -> Result<(), StoreError> {
        let sql = format!("USE {}", Dialect::MySql.quote(database.as_str()));
        self.raw("use database", &sql).map(|_| ())
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        let MySqlStore { runtime, conn } = *self;
        runtime
            .block_on(conn.close())
            .map_err(|e| classify("close connection", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_name_from_server_message() {
        assert_eq!(
            object_from_message("Duplicate key name 'idx_user_id'"),
            "idx_user_id"
        );
        assert_eq!(
            object_from_message("Table 'oauth_tokens' already exists"),
            "oauth_tokens"
        );
        assert_eq!(object_from_message("weird"), "weird");
    }

    #[test]
    fn session_flags_must_decode() {
        let settings = session_from_row(&[Value::Int(1), Value::Int(0)]).unwrap();
        assert!(settings.autocommit);
        assert!(!settings.foreign_key_checks);

        assert!(session_from_row(&[Value::Null, Value::Int(1)]).is_err());
        assert!(session_from_row(&[Value::Int(1)]).is_err());
        assert!(session_from_row(&[Value::Text("ON".into()), Value::Int(1)]).is_err());
    }

    #[test]
    fn io_failures_are_connectivity() {
        let err = classify(
            "connect",
            sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )),
        );
        assert!(err.is_connectivity());
    }
}
