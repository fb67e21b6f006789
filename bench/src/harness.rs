//! End-to-end flows behind the CLI commands.

use crate::cases;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result, StoreError};
use crate::indexes::{self, ApplyOutcome, IndexSet};
use crate::loader::{BatchLoader, LoadOptions, LoadSummary};
use crate::populate::TokenGenerator;
use crate::report::ReportSink;
use crate::runner::{BenchmarkCase, BenchmarkRunner, RunReport, RunnerOptions};
use crate::schema::{self, TableStatus};
use crate::store::{DdlOutcome, Store};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::PathBuf;
use tokidx_core::Identifier;

/// Where benchmark cases come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseSource {
    Suite(String),
    File(PathBuf),
}

impl Default for CaseSource {
    fn default() -> Self {
        CaseSource::Suite("basic".to_string())
    }
}

pub fn resolve_cases(source: &CaseSource, now: NaiveDateTime) -> Result<Vec<BenchmarkCase>> {
    match source {
        CaseSource::Suite(name) => cases::builtin(name, now).ok_or_else(|| {
            let known: Vec<&str> = cases::SUITES.iter().map(|(n, _)| *n).collect();
            HarnessError::Config(format!(
                "unknown suite `{name}` (known: {})",
                known.join(", ")
            ))
        }),
        CaseSource::File(path) => cases::load_case_file(path),
    }
}

/// Create the database and the bare token table; with `reset`, drop and
/// recreate the table first.
pub fn setup(store: &mut dyn Store, config: &HarnessConfig, reset: bool) -> Result<()> {
    schema::ensure_database(store, &config.database)?;
    if reset {
        schema::reset_table(store, &config.table)
    } else {
        schema::ensure_table(store, &config.table).map(|_| ())
    }
}

pub fn load(
    store: &mut dyn Store,
    config: &HarnessConfig,
    options: LoadOptions,
) -> Result<LoadSummary> {
    if !store.table_exists(&config.table)? {
        return Err(HarnessError::Config(format!(
            "table {} does not exist; run `setup` first",
            config.table
        )));
    }
    let generator = TokenGenerator::new(config.generator.clone())?;
    let loader = BatchLoader::new(options)?;
    loader.load(store, &config.table, &generator)
}

/// Human-readable list of the active secondary indexes.
pub fn describe_indexes(store: &mut dyn Store, table: &Identifier) -> Result<String> {
    let active = indexes::list_active(store, table)?;
    Ok(if active.is_empty() {
        format!("Active indexes on {table}: none")
    } else {
        format!("Active indexes on {table}: {}", active.join(", "))
    })
}

pub fn add_indexes(
    store: &mut dyn Store,
    table: &Identifier,
    set: IndexSet,
) -> Result<Vec<ApplyOutcome>> {
    log::info!("Applying the {set} index set to {table}");
    let descriptors = set.descriptors()?;
    indexes::apply_all(store, table, &descriptors)
}

fn summarize_apply(outcomes: &[ApplyOutcome]) -> String {
    let mut created = Vec::new();
    let mut existing = Vec::new();
    let mut failed = Vec::new();
    for o in outcomes {
        match &o.result {
            Ok(DdlOutcome::Created) => created.push(o.name.as_str()),
            Ok(DdlOutcome::AlreadyExists) => existing.push(o.name.as_str()),
            Err(_) => failed.push(o.name.as_str()),
        }
    }
    format!(
        "Indexes created: [{}]; already present: [{}]; failed: [{}]",
        created.join(", "),
        existing.join(", "),
        failed.join(", ")
    )
}

/// Run `cases`, record the run in `sink`, and fail if the store went away.
pub fn bench(
    store: &mut dyn Store,
    table: &Identifier,
    options: RunnerOptions,
    cases: &[BenchmarkCase],
    title: &str,
    sink: &mut ReportSink,
) -> Result<RunReport> {
    sink.note(&describe_indexes(store, table)?)?;
    let runner = BenchmarkRunner::new(options)?;
    let report = runner.run(store, table, cases);
    sink.record_run(title, &report)?;
    if report.connectivity_lost {
        return Err(StoreError::connectivity("benchmark", "store unreachable mid-run").into());
    }
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub index_set: String,
    pub before: RunReport,
    pub after: RunReport,
}

/// Benchmark with no secondary indexes, apply `set`, benchmark again.
pub fn compare(
    store: &mut dyn Store,
    table: &Identifier,
    options: RunnerOptions,
    cases: &[BenchmarkCase],
    set: IndexSet,
    sink: &mut ReportSink,
) -> Result<Comparison> {
    let dropped = indexes::drop_all(store, table)?;
    sink.note(&format!(
        "Dropped indexes: [{}]; failed drops: [{}]",
        dropped.dropped.join(", "),
        dropped.failed.join(", ")
    ))?;
    let before = bench(
        store,
        table,
        options,
        cases,
        "Without secondary indexes",
        sink,
    )?;

    let outcomes = add_indexes(store, table, set)?;
    sink.note(&summarize_apply(&outcomes))?;
    schema::analyze_table(store, table)?;
    let after = bench(
        store,
        table,
        options,
        cases,
        &format!("With the {set} index set"),
        sink,
    )?;

    sink.record_comparison(&before, &after)?;
    Ok(Comparison {
        index_set: set.to_string(),
        before,
        after,
    })
}

fn megabytes(bytes: Option<u64>) -> String {
    bytes.map_or("n/a".to_string(), |b| format!("{:.2} MB", b as f64 / 1_048_576.0))
}

pub fn status(store: &mut dyn Store, table: &Identifier) -> Result<String> {
    let TableStatus {
        rows,
        data_bytes,
        index_bytes,
        engine,
    } = schema::table_status(store, table)?;
    Ok(format!(
        "Table {table}: {rows} rows, data {}, indexes {}, engine {}\n{}",
        megabytes(data_bytes),
        megabytes(index_bytes),
        engine.as_deref().unwrap_or("unknown"),
        describe_indexes(store, table)?
    ))
}
