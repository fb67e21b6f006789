//! `tokidx-bench`: command-line front end for the harness.
//!
//! Settings come from the environment (and `.env`); flags override them.
//!
//! Usage:
//!   tokidx-bench setup --reset
//!   tokidx-bench load --total 1000000
//!   tokidx-bench compare --suite hinted --set generalized
//!   tokidx-bench --backend sqlite bench --cases my_cases.json --samples 5 --json

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokidx_bench::cases::SUITES;
use tokidx_bench::harness::{self, CaseSource};
use tokidx_bench::indexes::IndexSet;
use tokidx_bench::report::ReportSink;
use tokidx_bench::runner::RunnerOptions;
use tokidx_bench::schema;
use tokidx_bench::{Backend, HarnessConfig, HarnessError, Store};
use tokidx_core::Identifier;

#[derive(Parser, Debug)]
#[command(author, version, about = "Index-strategy benchmark harness for an OAuth token table")]
struct Cli {
    /// Store backend (overrides BENCH_BACKEND).
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    /// SQLite database file (overrides BENCH_SQLITE_PATH).
    #[arg(long, global = true)]
    sqlite_path: Option<String>,

    /// Token table name (overrides DB_TABLE).
    #[arg(long, global = true)]
    table: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct CaseArgs {
    /// Built-in suite name (see `suites`).
    #[arg(long, conflicts_with = "cases")]
    suite: Option<String>,

    /// JSON file of `[{"description", "query", "params"}]`.
    #[arg(long)]
    cases: Option<PathBuf>,

    #[arg(long)]
    samples: Option<usize>,

    #[arg(long)]
    warmup: Option<usize>,

    /// Also write results as JSON next to the report log.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl CaseArgs {
    fn source(&self) -> CaseSource {
        match (&self.suite, &self.cases) {
            (_, Some(path)) => CaseSource::File(path.clone()),
            (Some(name), None) => CaseSource::Suite(name.clone()),
            (None, None) => CaseSource::default(),
        }
    }

    fn runner_options(&self, config: &HarnessConfig) -> RunnerOptions {
        RunnerOptions {
            samples: self.samples.unwrap_or(config.runner.samples),
            warmup: self.warmup.unwrap_or(config.runner.warmup),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and the token table (primary key only).
    Setup {
        /// Drop and recreate the table, deleting every row.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Bulk-load synthetic tokens.
    Load {
        #[arg(long)]
        total: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        commit_every: Option<usize>,
        /// Run OPTIMIZE/VACUUM and ANALYZE after loading.
        #[arg(long, default_value_t = false)]
        optimize: bool,
    },
    /// Add, drop or list secondary indexes.
    Indexes {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Run a case suite against the current index state.
    Bench {
        #[command(flatten)]
        cases: CaseArgs,
    },
    /// Drop all indexes, bench, apply an index set, bench again.
    Compare {
        #[command(flatten)]
        cases: CaseArgs,
        #[arg(long, default_value_t = IndexSet::Generalized)]
        set: IndexSet,
    },
    /// Apply session optimizer settings and refresh table statistics.
    Tune,
    /// Show row count, storage sizes and active indexes.
    Status,
    /// List the built-in case suites.
    Suites,
}

#[derive(Subcommand, Debug)]
enum IndexAction {
    Add {
        #[arg(long, default_value_t = IndexSet::Generalized)]
        set: IndexSet,
    },
    Drop,
    List,
}

fn resolve_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::from_env().context("reading configuration")?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(path) = &cli.sqlite_path {
        config.sqlite_path = path.clone();
    }
    if let Some(table) = &cli.table {
        config.table = Identifier::new(table).context("--table")?;
    }
    Ok(config)
}

fn print_suites() {
    for (name, summary) in SUITES {
        println!("  {name:18} {summary}");
    }
}

fn execute(
    command: &Command,
    store: &mut dyn Store,
    config: &HarnessConfig,
    started_at: chrono::NaiveDateTime,
) -> Result<()> {
    let table = &config.table;
    let open_sink = |label: &str| ReportSink::create(&config.report_dir, started_at, label);

    match command {
        Command::Setup { reset } => {
            harness::setup(store, config, *reset).context("setup")?;
            println!("Schema ready: {}.{}", config.database, table);
        }
        Command::Load {
            total,
            batch_size,
            commit_every,
            optimize,
        } => {
            let mut options = config.load;
            options.total = total.unwrap_or(options.total);
            options.batch_size = batch_size.unwrap_or(options.batch_size);
            options.commit_every = commit_every.unwrap_or(options.commit_every);
            let summary = harness::load(store, config, options).context("load")?;
            if *optimize {
                schema::optimize_table(store, table)?;
                schema::analyze_table(store, table)?;
            }
            let mut sink = open_sink("load")?;
            sink.note(&format!(
                "Loaded {} records in {} batches of up to {} ({:.2}s, {:.0} rows/s)",
                summary.inserted,
                summary.batches,
                summary.batch_size,
                summary.elapsed.as_secs_f64(),
                summary.rows_per_sec()
            ))?;
        }
        Command::Indexes { action } => match action {
            IndexAction::Add { set } => {
                harness::add_indexes(store, table, *set)?;
                println!("{}", harness::describe_indexes(store, table)?);
            }
            IndexAction::Drop => {
                let summary = schema::drop_all_secondary_indexes(store, table)?;
                println!(
                    "Dropped: [{}]; failed: [{}]",
                    summary.dropped.join(", "),
                    summary.failed.join(", ")
                );
            }
            IndexAction::List => println!("{}", harness::describe_indexes(store, table)?),
        },
        Command::Bench { cases } => {
            let list = harness::resolve_cases(&cases.source(), Utc::now().naive_utc())?;
            let title = match cases.source() {
                CaseSource::Suite(name) => format!("Suite: {name}"),
                CaseSource::File(path) => format!("Cases: {}", path.display()),
            };
            let mut sink = open_sink("bench")?;
            let report = harness::bench(
                store,
                table,
                cases.runner_options(config),
                &list,
                &title,
                &mut sink,
            )?;
            if cases.json {
                sink.write_json(&report)?;
            }
        }
        Command::Compare { cases, set } => {
            let list = harness::resolve_cases(&cases.source(), Utc::now().naive_utc())?;
            let mut sink = open_sink("compare")?;
            let comparison = harness::compare(
                store,
                table,
                cases.runner_options(config),
                &list,
                *set,
                &mut sink,
            )?;
            if cases.json {
                sink.write_json(&comparison)?;
            }
        }
        Command::Tune => {
            let summary = schema::tune_session(store, table)?;
            println!(
                "Applied {} settings, {} rejected; statistics refreshed",
                summary.applied.len(),
                summary.failed.len()
            );
        }
        Command::Status => println!("{}", harness::status(store, table)?),
        Command::Suites => print_suites(),
    }
    Ok(())
}

fn is_connectivity(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<HarnessError>()
            .is_some_and(HarnessError::is_connectivity)
            || cause
                .downcast_ref::<tokidx_bench::StoreError>()
                .is_some_and(tokidx_bench::StoreError::is_connectivity)
    })
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Suites = cli.command {
        print_suites();
        return Ok(());
    }

    let config = resolve_config(&cli)?;
    tokidx_core::initialize_logger(config.log_level, config.log_file.as_deref())
        .context("initializing logger")?;
    let started_at = Local::now().naive_local();
    log::info!(
        "tokidx-bench {} starting ({:?} backend, table {})",
        env!("CARGO_PKG_VERSION"),
        config.backend,
        config.table
    );

    let mut store = config.open_store().context("connecting to store")?;
    let outcome = execute(&cli.command, store.as_mut(), &config, started_at);
    if let Err(e) = store.close() {
        log::warn!("Closing connection: {e}");
    }
    outcome
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("error: {e:#}");
            if is_connectivity(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
