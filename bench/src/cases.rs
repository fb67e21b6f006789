//! Query case sources: the built-in suites and JSON case files.
//!
//! Suites are data. Time-dependent filters take `now` as a bound parameter
//! instead of calling `NOW()`, so every built-in case runs unchanged on MySQL
//! and SQLite.

use crate::error::{HarnessError, Result};
use crate::runner::BenchmarkCase;
use crate::store::Value;
use chrono::{Duration, NaiveDateTime};
use std::path::Path;
use tokidx_core::TokenType;

/// Built-in suite names with a one-line summary, in display order.
pub const SUITES: [(&str, &str); 7] = [
    ("basic", "equality, IN, BETWEEN and compound filters on user_id"),
    ("optimization", "filters, ordering, grouping and expiry scans"),
    ("active-tokens", "ways of selecting unexpired, unrevoked tokens"),
    ("aggregates", "per-user counts with and without a type filter"),
    ("limit-impact", "the same filter under shrinking LIMITs"),
    ("column-selection", "SELECT * against a narrow column list"),
    ("hinted", "forced index use via {table:idx} hints"),
];

fn case<const N: usize>(description: &str, query: &str, params: [Value; N]) -> BenchmarkCase {
    BenchmarkCase::new(description, query, params)
}

fn int(v: i64) -> Value {
    Value::Int(v)
}

fn bearer() -> Value {
    TokenType::Bearer.into()
}

/// Cases of the named suite, with `now` bound wherever a query filters on the
/// current time.
pub fn builtin(name: &str, now: NaiveDateTime) -> Option<Vec<BenchmarkCase>> {
    let today = now.date();
    let day_start = today.and_hms_opt(0, 0, 0).unwrap_or(now);
    let day_end = day_start + Duration::days(1);
    let today_text: Value = today.format("%Y-%m-%d").to_string().into();

    let cases = match name {
        "basic" => vec![
            case(
                "Equality on user_id",
                "SELECT * FROM {table} WHERE user_id = ?",
                [int(10)],
            ),
            case(
                "IN list on user_id",
                "SELECT * FROM {table} WHERE user_id IN (?, ?, ?, ?, ?)",
                [int(10), int(20), int(30), int(40), int(50)],
            ),
            case(
                "BETWEEN on user_id",
                "SELECT * FROM {table} WHERE user_id BETWEEN ? AND ?",
                [int(5), int(15)],
            ),
            case(
                "user_id AND token_type",
                "SELECT * FROM {table} WHERE user_id = ? AND token_type = ?",
                [int(10), bearer()],
            ),
        ],
        "optimization" => vec![
            case(
                "WHERE on user_id",
                "SELECT * FROM {table} WHERE user_id = ?",
                [int(10)],
            ),
            case(
                "WHERE on user_id and token_type",
                "SELECT * FROM {table} WHERE user_id = ? AND token_type = ?",
                [int(10), bearer()],
            ),
            case(
                "Latest 100 tokens of a user",
                "SELECT * FROM {table} WHERE user_id = ? ORDER BY issued_at DESC LIMIT 100",
                [int(10)],
            ),
            case(
                "Top 10 users by token count",
                "SELECT user_id, COUNT(*) AS token_count FROM {table} \
                 GROUP BY user_id ORDER BY token_count DESC LIMIT 10",
                [],
            ),
            case(
                "Active tokens",
                "SELECT * FROM {table} WHERE expires_at > ? AND revoked_at IS NULL LIMIT 1000",
                [now.into()],
            ),
            case(
                "Tokens expiring today",
                "SELECT * FROM {table} WHERE expires_at >= ? AND expires_at < ? LIMIT 1000",
                [day_start.into(), day_end.into()],
            ),
        ],
        "active-tokens" => vec![
            case(
                "Function on date column",
                "SELECT * FROM {table} WHERE DATE(expires_at) > ? AND revoked_at IS NULL LIMIT 100",
                [today_text],
            ),
            case(
                "Direct date comparison",
                "SELECT * FROM {table} WHERE expires_at > ? AND revoked_at IS NULL LIMIT 100",
                [now.into()],
            ),
            case(
                "Date comparison with user_id range",
                "SELECT * FROM {table} WHERE expires_at > ? AND revoked_at IS NULL \
                 AND user_id BETWEEN ? AND ? LIMIT 100",
                [now.into(), int(1), int(50)],
            ),
        ],
        "aggregates" => vec![
            case(
                "Count per user",
                "SELECT user_id, COUNT(*) AS token_count FROM {table} \
                 GROUP BY user_id ORDER BY token_count DESC LIMIT 10",
                [],
            ),
            case(
                "Count per user for one token type",
                "SELECT user_id, COUNT(*) AS token_count FROM {table} WHERE token_type = ? \
                 GROUP BY user_id ORDER BY token_count DESC LIMIT 10",
                [bearer()],
            ),
        ],
        "limit-impact" => {
            let query = "SELECT * FROM {table} WHERE user_id = ? AND token_type = ?";
            let mut cases = vec![case("No LIMIT", query, [int(5), bearer()])];
            for limit in [1000, 100, 10] {
                cases.push(case(
                    &format!("LIMIT {limit}"),
                    &format!("{query} LIMIT {limit}"),
                    [int(5), bearer()],
                ));
            }
            cases
        }
        "column-selection" => vec![
            case(
                "All columns",
                "SELECT * FROM {table} WHERE user_id = ? LIMIT 1000",
                [int(10)],
            ),
            case(
                "Four columns",
                "SELECT id, user_id, access_token, expires_at FROM {table} \
                 WHERE user_id = ? LIMIT 1000",
                [int(10)],
            ),
        ],
        "hinted" => vec![
            case(
                "Baseline SELECT *",
                "SELECT * FROM {table} WHERE user_id = ?",
                [int(10)],
            ),
            case(
                "Covering index on user_id",
                "SELECT user_id, token_type, client_id FROM {table:idx_user_covering} WHERE user_id = ?",
                [int(10)],
            ),
            case(
                "Covering index with IN list",
                "SELECT user_id, token_type, client_id FROM {table:idx_user_covering} \
                 WHERE user_id IN (?, ?, ?, ?, ?)",
                [int(10), int(20), int(30), int(40), int(50)],
            ),
            case(
                "UNION ALL of point lookups",
                "SELECT user_id, token_type, client_id FROM {table:idx_user_covering} WHERE user_id = ? \
                 UNION ALL SELECT user_id, token_type, client_id FROM {table:idx_user_covering} WHERE user_id = ? \
                 UNION ALL SELECT user_id, token_type, client_id FROM {table:idx_user_covering} WHERE user_id = ?",
                [int(10), int(20), int(30)],
            ),
            case(
                "Covering index on user_id and token_type",
                "SELECT * FROM {table:idx_user_covering} WHERE user_id = ? AND token_type = ?",
                [int(10), bearer()],
            ),
            case(
                "OR across user_id and client_id",
                "SELECT * FROM {table} WHERE user_id = ? OR client_id = ?",
                [int(10), int(5)],
            ),
            // Range form of `LIKE 'A%'`; SQLite's default LIKE is case-insensitive
            // and cannot use a binary-collated index.
            case(
                "Access tokens starting with A",
                "SELECT * FROM {table:idx_access_token} WHERE access_token >= ? AND access_token < ? LIMIT 100",
                ["A".into(), "B".into()],
            ),
            case(
                "Latest tokens via (user_id, issued_at DESC)",
                "SELECT * FROM {table:idx_user_issued} WHERE user_id = ? ORDER BY issued_at DESC LIMIT 100",
                [int(10)],
            ),
            case(
                "Token type breakdown for a user",
                "SELECT token_type, COUNT(*) AS count FROM {table:idx_user_covering} \
                 WHERE user_id = ? GROUP BY token_type",
                [int(10)],
            ),
        ],
        _ => return None,
    };
    Some(cases)
}

/// Read `[{"description", "query", "params"}]` from a JSON file.
pub fn load_case_file(path: &Path) -> Result<Vec<BenchmarkCase>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| HarnessError::io(format!("reading case file {}", path.display()), e))?;
    let cases: Vec<BenchmarkCase> =
        serde_json::from_str(&text).map_err(|source| HarnessError::CaseFile {
            path: path.display().to_string(),
            source,
        })?;
    if cases.is_empty() {
        return Err(HarnessError::Config(format!(
            "case file {} contains no cases",
            path.display()
        )));
    }
    log::info!("Loaded {} cases from {}", cases.len(), path.display());
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::render_query;
    use crate::store::Dialect;
    use chrono::NaiveDate;
    use std::io::Write;
    use tokidx_core::Identifier;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
    }

    #[test]
    fn every_listed_suite_exists_and_renders() {
        let table = Identifier::new("oauth_tokens").unwrap();
        for (name, _) in SUITES {
            let cases = builtin(name, now()).unwrap_or_else(|| panic!("suite {name}"));
            assert!(!cases.is_empty());
            for c in &cases {
                let sql = render_query(Dialect::MySql, &table, &c.query).unwrap();
                assert_eq!(
                    sql.matches('?').count(),
                    c.params.len(),
                    "{}",
                    c.description
                );
            }
        }
        assert!(builtin("nope", now()).is_none());
    }

    #[test]
    fn limit_suite_shrinks() {
        let cases = builtin("limit-impact", now()).unwrap();
        let names: Vec<_> = cases.iter().map(|c| c.description.as_str()).collect();
        assert_eq!(names, ["No LIMIT", "LIMIT 1000", "LIMIT 100", "LIMIT 10"]);
    }

    #[test]
    fn reads_case_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"description": "one", "query": "SELECT * FROM {{table}} WHERE user_id = ?", "params": [3]}}]"#
        )
        .unwrap();
        let cases = load_case_file(file.path()).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].params, vec![Value::Int(3)]);

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        write!(empty, "[]").unwrap();
        assert!(load_case_file(empty.path()).is_err());

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "{{").unwrap();
        assert!(matches!(
            load_case_file(broken.path()),
            Err(HarnessError::CaseFile { .. })
        ));
    }
}
