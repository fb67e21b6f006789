//! Benchmark runner: executes query cases in order, timing each one and
//! capturing the store's plan.
//!
//! A case that fails is recorded with its error and the run moves on. Only a
//! lost connection ends a run early; the remaining cases are then recorded as
//! skipped so the report still lines up with the input.

use crate::error::{HarnessError, Result};
use crate::store::{Dialect, PlanStep, Store, Value};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokidx_core::Identifier;

/// One query to benchmark.
///
/// `query` is a template: `{table}` becomes the quoted table name and
/// `{table:idx_name}` the table with an index hint for `idx_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub description: String,
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl BenchmarkCase {
    pub fn new(
        description: impl Into<String>,
        query: impl Into<String>,
        params: impl IntoIterator<Item = Value>,
    ) -> Self {
        Self {
            description: description.into(),
            query: query.into(),
            params: params.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Untimed executions before sampling.
    pub warmup: usize,
    /// Timed executions; the reported time is their mean.
    pub samples: usize,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            warmup: 0,
            samples: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub description: String,
    /// The rendered statement that was executed.
    pub query: String,
    pub params: Vec<Value>,
    pub execution_time_ms: f64,
    pub row_count: usize,
    pub plan: Vec<PlanStep>,
    pub samples_ms: Vec<f64>,
    pub error: Option<String>,
}

impl BenchmarkResult {
    fn failed(case: &BenchmarkCase, query: String, error: String) -> Self {
        Self {
            description: case.description.clone(),
            query,
            params: case.params.clone(),
            execution_time_ms: 0.0,
            row_count: 0,
            plan: Vec::new(),
            samples_ms: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Nearest-rank percentile over the timed samples.
    pub fn percentile_ms(&self, pct: f64) -> f64 {
        if self.samples_ms.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples_ms.clone();
        sorted.sort_by(f64::total_cmp);
        let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub results: Vec<BenchmarkResult>,
    /// Set when the run stopped early because the store went away.
    pub connectivity_lost: bool,
}

impl RunReport {
    /// The successful case with the lowest mean time. Ties go to the earlier
    /// case.
    pub fn fastest(&self) -> Option<&BenchmarkResult> {
        let mut best: Option<&BenchmarkResult> = None;
        for r in self.results.iter().filter(|r| r.is_ok()) {
            if best.is_none_or(|b| r.execution_time_ms < b.execution_time_ms) {
                best = Some(r);
            }
        }
        best
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }
}

/// Expand `{table}` and `{table:idx_name}` in `template`.
pub fn render_query(dialect: Dialect, table: &Identifier, template: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| HarnessError::Template(format!("unclosed `{{` in `{template}`")))?;
        let placeholder = &after[..close];
        match placeholder.split_once(':') {
            None if placeholder == "table" => out.push_str(&dialect.quote(table.as_str())),
            Some(("table", index)) => {
                let index = Identifier::new(index.trim())?;
                out.push_str(&dialect.table_with_hint(table, &index));
            }
            _ => {
                return Err(HarnessError::Template(format!(
                    "unknown placeholder `{{{placeholder}}}`"
                )));
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkRunner {
    options: RunnerOptions,
}

impl BenchmarkRunner {
    pub fn new(options: RunnerOptions) -> Result<Self> {
        if options.samples == 0 {
            return Err(HarnessError::Config("samples must be at least 1".into()));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> RunnerOptions {
        self.options
    }

    /// Run `cases` strictly in input order.
    pub fn run(
        &self,
        store: &mut dyn Store,
        table: &Identifier,
        cases: &[BenchmarkCase],
    ) -> RunReport {
        let mut report = RunReport::default();
        for (i, case) in cases.iter().enumerate() {
            if report.connectivity_lost {
                report.results.push(BenchmarkResult::failed(
                    case,
                    case.query.clone(),
                    "skipped: store unreachable".to_string(),
                ));
                continue;
            }

            log::info!("[{}/{}] {}", i + 1, cases.len(), case.description);
            let result = match self.run_case(store, table, case) {
                Ok(result) => {
                    log::info!(
                        "  {} rows in {:.3} ms",
                        result.row_count,
                        result.execution_time_ms
                    );
                    result
                }
                Err((query, e)) => {
                    log::error!("Case '{}' failed: {e}", case.description);
                    report.connectivity_lost = e.is_connectivity();
                    BenchmarkResult::failed(case, query, e.to_string())
                }
            };
            report.results.push(result);
        }
        report
    }

    fn run_case(
        &self,
        store: &mut dyn Store,
        table: &Identifier,
        case: &BenchmarkCase,
    ) -> std::result::Result<BenchmarkResult, (String, HarnessError)> {
        let query = render_query(store.dialect(), table, &case.query)
            .map_err(|e| (case.query.clone(), e))?;
        log::debug!("{query}");
        let fail = |e: crate::error::StoreError| (query.clone(), HarnessError::from(e));

        let plan = store.explain(&query, &case.params).map_err(fail)?;

        for _ in 0..self.options.warmup {
            store.fetch_all_count(&query, &case.params).map_err(fail)?;
        }

        let mut samples_ms = Vec::with_capacity(self.options.samples);
        let mut row_count = 0;
        for _ in 0..self.options.samples {
            let start = Instant::now();
            row_count = store.fetch_all_count(&query, &case.params).map_err(fail)?;
            samples_ms.push(start.elapsed().as_secs_f64() * 1e3);
        }
        let execution_time_ms = samples_ms.iter().sum::<f64>() / samples_ms.len() as f64;

        Ok(BenchmarkResult {
            description: case.description.clone(),
            query: query.clone(),
            params: case.params.clone(),
            execution_time_ms,
            row_count,
            plan,
            samples_ms,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Identifier {
        Identifier::new("oauth_tokens").unwrap()
    }

    fn timed(description: &str, ms: f64) -> BenchmarkResult {
        BenchmarkResult {
            description: description.into(),
            query: String::new(),
            params: Vec::new(),
            execution_time_ms: ms,
            row_count: 1,
            plan: Vec::new(),
            samples_ms: vec![ms],
            error: None,
        }
    }

    #[test]
    fn fastest_picks_minimum_and_skips_failures() {
        let mut report = RunReport {
            results: vec![timed("a", 12.4), timed("b", 3.1), timed("c", 9.0)],
            connectivity_lost: false,
        };
        assert_eq!(report.fastest().unwrap().description, "b");

        report.results[1].error = Some("boom".into());
        assert_eq!(report.fastest().unwrap().description, "c");
        assert_eq!(report.failures(), 1);
    }

    #[test]
    fn fastest_tie_goes_to_first() {
        let report = RunReport {
            results: vec![timed("a", 5.0), timed("b", 2.0), timed("c", 2.0)],
            connectivity_lost: false,
        };
        assert_eq!(report.fastest().unwrap().description, "b");
        assert!(RunReport::default().fastest().is_none());
    }

    #[test]
    fn percentiles_over_samples() {
        let mut r = timed("a", 0.0);
        r.samples_ms = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(r.percentile_ms(50.0), 3.0);
        assert_eq!(r.percentile_ms(95.0), 5.0);
        assert_eq!(r.percentile_ms(0.0), 1.0);

        r.samples_ms = (1..=10).map(f64::from).collect();
        assert_eq!(r.percentile_ms(50.0), 5.0);
        assert_eq!(r.percentile_ms(90.0), 9.0);
        assert_eq!(r.percentile_ms(100.0), 10.0);
    }

    #[test]
    fn renders_table_and_hint_placeholders() {
        let sql = render_query(
            Dialect::MySql,
            &table(),
            "SELECT id FROM {table:idx_user_covering} WHERE user_id = ?",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT id FROM `oauth_tokens` USE INDEX (`idx_user_covering`) WHERE user_id = ?"
        );

        let sql = render_query(Dialect::Sqlite, &table(), "SELECT COUNT(*) FROM {table}").unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM \"oauth_tokens\"");
    }

    #[test]
    fn rejects_bad_templates() {
        for bad in [
            "SELECT * FROM {tabel}",
            "SELECT * FROM {table",
            "SELECT * FROM {table:idx-1}",
        ] {
            assert!(
                render_query(Dialect::MySql, &table(), bad).is_err(),
                "{bad}"
            );
        }
    }

    #[test]
    fn case_files_deserialize_plain_json_params() {
        let cases: Vec<BenchmarkCase> = serde_json::from_str(
            r#"[{"description": "by user", "query": "SELECT * FROM {table} WHERE user_id = ?", "params": [10]},
                {"description": "all", "query": "SELECT * FROM {table}"}]"#,
        )
        .unwrap();
        assert_eq!(cases[0].params, vec![Value::Int(10)]);
        assert!(cases[1].params.is_empty());
    }
}
