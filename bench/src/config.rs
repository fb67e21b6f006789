//! Harness configuration, resolved from the environment (after `.env`).
//!
//! Every knob has a default; a value that is present but does not parse is a
//! configuration error rather than a silent fallback.

use crate::error::{HarnessError, Result};
use crate::loader::LoadOptions;
use crate::populate::GeneratorParams;
use crate::runner::RunnerOptions;
use crate::store::Store;
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokidx_core::{parse_log_level, Identifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    Mysql,
    Sqlite,
}

impl FromStr for Backend {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(Backend::Mysql),
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(HarnessError::Config(format!(
                "unknown backend `{other}` (expected mysql or sqlite)"
            ))),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct MySqlSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for MySqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub backend: Backend,
    pub mysql: MySqlSettings,
    pub database: Identifier,
    pub table: Identifier,
    pub sqlite_path: String,
    pub load: LoadOptions,
    pub generator: GeneratorParams,
    pub runner: RunnerOptions,
    pub report_dir: PathBuf,
    pub log_level: LevelFilter,
    pub log_file: Option<String>,
}

fn resolve_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn resolve_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| HarnessError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

fn resolve_identifier(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<Identifier> {
    let raw = resolve_string(lookup, key, default);
    Identifier::new(raw.trim()).map_err(|e| HarnessError::Config(format!("{key}: {e}")))
}

fn resolve_log_level(lookup: &impl Fn(&str) -> Option<String>) -> Result<LevelFilter> {
    match lookup("BENCH_LOG_LEVEL") {
        None => Ok(LevelFilter::Info),
        Some(raw) => parse_log_level(&raw)
            .ok_or_else(|| HarnessError::Config(format!("BENCH_LOG_LEVEL={raw:?}: unknown level"))),
    }
}

fn resolve_log_file(lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    match lookup("BENCH_LOG_FILE") {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => Some("tokidx-bench.log".to_string()),
    }
}

impl HarnessConfig {
    /// Load `.env` if there is one, then resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(HarnessError::Config(format!(".env: {e}"))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve every setting through `lookup`, which returns the raw value of
    /// a variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = &lookup;
        let mut generator = GeneratorParams::standard();
        generator.users = resolve_parsed(lookup, "GEN_USERS", generator.users)?;
        generator.clients = resolve_parsed(lookup, "GEN_CLIENTS", generator.clients)?;
        generator.revoked_ratio =
            resolve_parsed(lookup, "GEN_REVOKED_RATIO", generator.revoked_ratio)?;
        generator.validate()?;

        let load = LoadOptions {
            total: resolve_parsed(lookup, "LOAD_TOTAL", 5_000_000)?,
            batch_size: resolve_parsed(lookup, "LOAD_BATCH_SIZE", 5_000)?,
            commit_every: resolve_parsed(lookup, "LOAD_COMMIT_EVERY", 10)?,
        };
        load.validate()?;

        let runner = RunnerOptions {
            samples: resolve_parsed(lookup, "BENCH_SAMPLES", 1)?,
            warmup: resolve_parsed(lookup, "BENCH_WARMUP", 0)?,
        };
        if runner.samples == 0 {
            return Err(HarnessError::Config("BENCH_SAMPLES must be at least 1".into()));
        }

        Ok(Self {
            backend: resolve_parsed(lookup, "BENCH_BACKEND", Backend::Mysql)?,
            mysql: MySqlSettings {
                host: resolve_string(lookup, "DB_HOST", "127.0.0.1"),
                port: resolve_parsed(lookup, "DB_PORT", 3306)?,
                user: resolve_string(lookup, "DB_USER", "root"),
                password: resolve_string(lookup, "DB_PASSWORD", ""),
            },
            database: resolve_identifier(lookup, "DB_DATABASE", "token_bench")?,
            table: resolve_identifier(lookup, "DB_TABLE", "oauth_tokens")?,
            sqlite_path: resolve_string(lookup, "BENCH_SQLITE_PATH", "tokidx.sqlite3"),
            load,
            generator,
            runner,
            report_dir: PathBuf::from(resolve_string(lookup, "BENCH_REPORT_DIR", "logs")),
            log_level: resolve_log_level(lookup)?,
            log_file: resolve_log_file(lookup),
        })
    }

    /// Connect to the configured backend and select the configured database
    /// if it already exists.
    pub fn open_store(&self) -> Result<Box<dyn Store>> {
        let mut store: Box<dyn Store> = match self.backend {
            Backend::Sqlite => {
                Box::new(crate::store::sqlite::SqliteStore::open(&self.sqlite_path)?)
            }
            #[cfg(feature = "mysql")]
            Backend::Mysql => Box::new(crate::store::mysql::MySqlStore::connect(&self.mysql)?),
            #[cfg(not(feature = "mysql"))]
            Backend::Mysql => {
                return Err(HarnessError::Config(
                    "built without the `mysql` feature; use --backend sqlite".into(),
                ));
            }
        };
        if store.database_exists(&self.database)? {
            store.use_database(&self.database)?;
        }
        Ok(store)
    }
}
