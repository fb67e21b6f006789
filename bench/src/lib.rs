//! Index-strategy benchmark harness for a fixed OAuth token table.
//!
//! The workflow is: provision the schema, bulk-load synthetic tokens, toggle
//! secondary indexes, run query cases with their plans, and write a report.
//! The index and benchmark steps repeat to compare before/after states.
//!
//! Two backends sit behind [`store::Store`]:
//! - **MySQL** via `sqlx` (feature `mysql`, on by default)
//! - **SQLite** via `rusqlite`, used for local runs, tests and benches
//!
//! Run benchmarks: `cargo bench`
//! Run tests: `cargo test`

pub mod cases;
pub mod config;
pub mod error;
pub mod harness;
pub mod indexes;
pub mod loader;
pub mod populate;
pub mod report;
pub mod runner;
pub mod schema;
pub mod store;

pub use config::{Backend, HarnessConfig};
pub use error::{HarnessError, Result, StoreError};
pub use store::{Dialect, Store, Value};
