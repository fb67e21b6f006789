//! Report module: renders benchmark runs as text and persists them.
//!
//! Every rendered section goes to stdout and is appended to one artifact per
//! harness invocation, `<dir>/<label>-<timestamp>.log`.

use crate::error::{HarnessError, Result};
use crate::runner::{BenchmarkResult, RunReport};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Timestamp format used in artifact file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

fn status(r: &BenchmarkResult) -> &'static str {
    if r.is_ok() { "ok" } else { "FAILED" }
}

/// Detailed per-case sections followed by the comparison table.
pub fn render_run(title: &str, report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", "=".repeat(80));
    let _ = writeln!(out, "  {title}");
    let _ = writeln!(out, "{}", "=".repeat(80));

    for (i, r) in report.results.iter().enumerate() {
        let _ = writeln!(out, "\n  {}. {}", i + 1, r.description);
        let _ = writeln!(out, "  {}", "-".repeat(60));
        let _ = writeln!(out, "  Query:   {}", r.query);
        if !r.params.is_empty() {
            let params: Vec<String> = r.params.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "  Params:  [{}]", params.join(", "));
        }
        if let Some(err) = &r.error {
            let _ = writeln!(out, "  Error:   {err}");
            continue;
        }
        let _ = writeln!(out, "  Rows:    {}", r.row_count);
        let _ = writeln!(
            out,
            "  Time:    {:.3} ms (p50 {:.3}, p95 {:.3}, {} samples)",
            r.execution_time_ms,
            r.percentile_ms(50.0),
            r.percentile_ms(95.0),
            r.samples_ms.len()
        );
        render_plan(&mut out, r);
    }

    let _ = writeln!(out, "\n  Comparison Summary:");
    let _ = writeln!(
        out,
        "  {:40} {:>12} {:>12} {:>10} {:>8}",
        "Case", "Mean (ms)", "p95 (ms)", "Rows", "Status"
    );
    let _ = writeln!(out, "  {}", "-".repeat(86));
    for r in &report.results {
        let _ = writeln!(
            out,
            "  {:40} {:>12.3} {:>12.3} {:>10} {:>8}",
            truncate(&r.description, 40),
            r.execution_time_ms,
            r.percentile_ms(95.0),
            r.row_count,
            status(r)
        );
    }

    match report.fastest() {
        Some(best) => {
            let _ = writeln!(
                out,
                "\n  Fastest: \"{}\" at {:.3} ms",
                best.description, best.execution_time_ms
            );
        }
        None => {
            let _ = writeln!(out, "\n  Fastest: none (no case succeeded)");
        }
    }
    if report.connectivity_lost {
        let _ = writeln!(out, "  Run stopped early: store unreachable");
    }
    out
}

fn render_plan(out: &mut String, r: &BenchmarkResult) {
    let Some(first) = r.plan.first() else {
        let _ = writeln!(out, "  Plan:    (empty)");
        return;
    };
    let _ = writeln!(out, "  Plan:");
    let header: Vec<&str> = first.fields.iter().map(|(c, _)| c.as_str()).collect();
    let _ = writeln!(out, "    {}", header.join(" | "));
    for step in &r.plan {
        let cells: Vec<&str> = step
            .fields
            .iter()
            .map(|(_, v)| if v.is_empty() { "NULL" } else { v.as_str() })
            .collect();
        let _ = writeln!(out, "    {}", cells.join(" | "));
    }
}

/// Side-by-side means of two runs of the same cases, matched by position.
pub fn render_comparison(before: &RunReport, after: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n  Before / After:");
    let _ = writeln!(
        out,
        "  {:40} {:>12} {:>12} {:>10}",
        "Case", "Before (ms)", "After (ms)", "Speedup"
    );
    let _ = writeln!(out, "  {}", "-".repeat(78));
    for (b, a) in before.results.iter().zip(&after.results) {
        let speedup = match (b.is_ok(), a.is_ok()) {
            (true, true) if a.execution_time_ms > 0.0 => {
                format!("{:.2}x", b.execution_time_ms / a.execution_time_ms)
            }
            (true, true) => "-".to_string(),
            _ => "n/a".to_string(),
        };
        let _ = writeln!(
            out,
            "  {:40} {:>12.3} {:>12.3} {:>10}",
            truncate(&b.description, 40),
            b.execution_time_ms,
            a.execution_time_ms,
            speedup
        );
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
    t.push('~');
    t
}

/// Append-only report artifact.
pub struct ReportSink {
    path: PathBuf,
    file: File,
}

impl ReportSink {
    /// Open `<dir>/<label>-<started_at>.log` for appending, creating `dir` if
    /// needed.
    pub fn create(dir: &Path, started_at: NaiveDateTime, label: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| HarnessError::io(format!("creating report dir {}", dir.display()), e))?;
        let path = dir.join(format!(
            "{label}-{}.log",
            started_at.format(FILE_TIMESTAMP_FORMAT)
        ));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HarnessError::io(format!("opening report {}", path.display()), e))?;
        log::info!("Writing report to {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| HarnessError::io(format!("writing report {}", self.path.display()), e))
    }

    /// Print `text` and append it to the artifact.
    pub fn emit(&mut self, text: &str) -> Result<()> {
        print!("{text}");
        self.append(text)
    }

    pub fn note(&mut self, line: &str) -> Result<()> {
        self.emit(&format!("{line}\n"))
    }

    pub fn record_run(&mut self, title: &str, report: &RunReport) -> Result<()> {
        self.emit(&render_run(title, report))
    }

    pub fn record_comparison(&mut self, before: &RunReport, after: &RunReport) -> Result<()> {
        self.emit(&render_comparison(before, after))
    }

    /// Write `payload` as pretty JSON next to the log, same stem.
    pub fn write_json<T: Serialize>(&self, payload: &T) -> Result<PathBuf> {
        let path = self.path.with_extension("json");
        let json = serde_json::to_string_pretty(payload).map_err(|e| {
            HarnessError::io(
                "serializing results",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        fs::write(&path, json)
            .map_err(|e| HarnessError::io(format!("writing {}", path.display()), e))?;
        log::info!("Wrote JSON results to {}", path.display());
        Ok(path)
    }
}
