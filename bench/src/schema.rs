//! Schema manager: database, token table and secondary-index housekeeping.
//!
//! Every operation is idempotent. "Already exists" is a warning and a
//! successful [`DdlOutcome::AlreadyExists`], never an error.

use crate::error::{Result, StoreError};
use crate::store::{DdlOutcome, Store, Value};
use serde::Serialize;
use tokidx_core::Identifier;

/// Create `database` if it is missing, then switch the connection to it.
pub fn ensure_database(store: &mut dyn Store, database: &Identifier) -> Result<DdlOutcome> {
    let dialect = store.dialect();
    let Some(create) = dialect.create_database(database) else {
        log::info!("{}: the open file is the database", dialect.name());
        return Ok(DdlOutcome::AlreadyExists);
    };

    let outcome = if store.database_exists(database)? {
        log::warn!("Database {database} already exists");
        DdlOutcome::AlreadyExists
    } else {
        match store.execute(&create, &[]) {
            Ok(_) => {
                log::info!("Created database {database}");
                DdlOutcome::Created
            }
            Err(e) if e.is_already_exists() => {
                log::warn!("Database {database} already exists");
                DdlOutcome::AlreadyExists
            }
            Err(e) => return Err(e.in_op("create database").into()),
        }
    };
    store.use_database(database)?;
    Ok(outcome)
}

/// Create the token table with its primary key and nothing else.
pub fn ensure_table(store: &mut dyn Store, table: &Identifier) -> Result<DdlOutcome> {
    if store.table_exists(table)? {
        log::warn!("Table {table} already exists");
        return Ok(DdlOutcome::AlreadyExists);
    }
    let sql = store.dialect().create_token_table(table);
    log::debug!("{sql}");
    store
        .execute(&sql, &[])
        .map_err(|e| e.in_op("create table"))?;
    log::info!("Created table {table}");
    Ok(DdlOutcome::Created)
}

/// Drop and recreate the token table. This is the only way rows are removed.
pub fn reset_table(store: &mut dyn Store, table: &Identifier) -> Result<()> {
    let dialect = store.dialect();
    store
        .execute(&dialect.drop_table(table), &[])
        .map_err(|e| e.in_op("drop table"))?;
    log::info!("Dropped table {table}");
    ensure_table(store, table)?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropSummary {
    pub dropped: Vec<String>,
    pub failed: Vec<String>,
}

/// Drop every non-primary index on `table`, one statement per index. A failed
/// drop is logged and skipped; the rest still go.
///
/// Names come from the catalog, so they are quoted as-is rather than checked
/// against the identifier rules applied to caller-supplied names.
pub fn drop_all_secondary_indexes(
    store: &mut dyn Store,
    table: &Identifier,
) -> Result<DropSummary> {
    let dialect = store.dialect();
    let mut summary = DropSummary::default();

    for name in store.secondary_indexes(table)? {
        match store.execute(&dialect.drop_index(table, &name), &[]) {
            Ok(_) => {
                log::info!("Dropped index {name}");
                summary.dropped.push(name);
            }
            Err(e) if e.is_connectivity() => return Err(e.in_op("drop index").into()),
            Err(e) => {
                log::error!("Failed to drop index {name}: {}", e.in_op("drop index"));
                summary.failed.push(name);
            }
        }
    }

    if summary.dropped.is_empty() && summary.failed.is_empty() {
        log::info!("No secondary indexes on {table}");
    }
    Ok(summary)
}

/// Refresh optimizer statistics.
pub fn analyze_table(store: &mut dyn Store, table: &Identifier) -> Result<()> {
    let sql = store.dialect().analyze_table(table);
    // MySQL answers ANALYZE/OPTIMIZE with a status row set.
    store
        .query(&sql, &[])
        .map_err(|e| e.in_op("analyze table"))?;
    log::info!("Analyzed {table}");
    Ok(())
}

/// Rebuild table storage after a large load.
pub fn optimize_table(store: &mut dyn Store, table: &Identifier) -> Result<()> {
    let sql = store.dialect().optimize_table(table);
    store
        .query(&sql, &[])
        .map_err(|e| e.in_op("optimize table"))?;
    log::info!("Optimized {table}");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub rows: u64,
    pub data_bytes: Option<u64>,
    pub index_bytes: Option<u64>,
    pub engine: Option<String>,
}

/// Row estimate and storage sizes as the store reports them. MySQL row counts
/// come from InnoDB statistics and are approximate.
pub fn table_status(store: &mut dyn Store, table: &Identifier) -> Result<TableStatus> {
    let (sql, params) = store.dialect().table_status(table);
    let rs = store
        .query(&sql, &params)
        .map_err(|e| e.in_op("table status"))?;
    let row = rs
        .rows
        .first()
        .ok_or_else(|| StoreError::query("table status", format!("table {table} not found")))?;

    let number = |i: usize| {
        row.get(i)
            .and_then(Value::as_i64)
            .and_then(|v| u64::try_from(v).ok())
    };
    Ok(TableStatus {
        rows: number(0).unwrap_or(0),
        data_bytes: number(1),
        index_bytes: number(2),
        engine: row.get(3).and_then(Value::as_text).map(str::to_string),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TuningSummary {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
}

/// Apply the dialect's session optimizer settings one by one, then analyze
/// the table. A rejected setting is a warning.
pub fn tune_session(store: &mut dyn Store, table: &Identifier) -> Result<TuningSummary> {
    let mut summary = TuningSummary::default();
    for &stmt in store.dialect().tuning_statements() {
        match store.execute(stmt, &[]) {
            Ok(_) => {
                log::info!("Applied: {stmt}");
                summary.applied.push(stmt.to_string());
            }
            Err(e) if e.is_connectivity() => return Err(e.in_op("tune session").into()),
            Err(e) => {
                log::warn!("Could not apply {stmt}: {e}");
                summary.failed.push(stmt.to_string());
            }
        }
    }
    analyze_table(store, table)?;
    Ok(summary)
}
