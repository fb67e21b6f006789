//! SQL text that differs between MySQL and SQLite.
//!
//! Only quoted names ([`Identifier`]s, [`TokenColumn`]s and index names read
//! from the catalog) are spliced into statements built here; values always
//! travel as bound `?` parameters.

use super::Value;
use tokidx_core::{ColumnSpec, Identifier, IndexDescriptor, SortOrder, TokenColumn};

const MYSQL_SCHEMA_EXISTS: &str =
    "SELECT 1 FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Placeholder limit per prepared statement.
    pub fn max_bind_params(self) -> usize {
        match self {
            Dialect::MySql => 65_535,
            // SQLITE_MAX_VARIABLE_NUMBER default since 3.32.
            Dialect::Sqlite => 32_766,
        }
    }

    pub fn explain_prefix(self) -> &'static str {
        match self {
            Dialect::MySql => "EXPLAIN ",
            Dialect::Sqlite => "EXPLAIN QUERY PLAN ",
        }
    }

    pub fn supports_prefix_length(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// Table with only its primary key; no secondary indexes.
    pub fn create_token_table(self, table: &Identifier) -> String {
        let t = self.quote(table.as_str());
        match self {
            Dialect::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
                    user_id INT UNSIGNED NOT NULL,
                    client_id INT UNSIGNED NOT NULL,
                    access_token VARCHAR(255) NOT NULL,
                    token_type VARCHAR(20) NOT NULL,
                    refresh_token VARCHAR(255) NOT NULL,
                    issued_at DATETIME NOT NULL,
                    revoked_at DATETIME NULL,
                    expires_at DATETIME NOT NULL,
                    refresh_token_expires_at DATETIME NOT NULL
                ) ENGINE=InnoDB"
            ),
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    client_id INTEGER NOT NULL,
                    access_token TEXT NOT NULL,
                    token_type TEXT NOT NULL,
                    refresh_token TEXT NOT NULL,
                    issued_at TEXT NOT NULL,
                    revoked_at TEXT NULL,
                    expires_at TEXT NOT NULL,
                    refresh_token_expires_at TEXT NOT NULL
                )"
            ),
        }
    }

    pub fn drop_table(self, table: &Identifier) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote(table.as_str()))
    }

    pub fn create_database(self, database: &Identifier) -> Option<String> {
        match self {
            Dialect::MySql => Some(format!(
                "CREATE DATABASE IF NOT EXISTS {}",
                self.quote(database.as_str())
            )),
            Dialect::Sqlite => None,
        }
    }

    /// Key part list, e.g. `` `user_id`, `issued_at` DESC ``.
    pub fn key_parts(self, columns: &[ColumnSpec]) -> String {
        columns
            .iter()
            .map(|spec| self.key_part(spec))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn key_part(self, spec: &ColumnSpec) -> String {
        let mut part = self.quote(spec.column.name());
        if let Some(len) = spec.prefix_len {
            if self.supports_prefix_length() {
                part.push_str(&format!("({len})"));
            } else {
                log::debug!(
                    "{}: ignoring prefix length {len} on {}",
                    self.name(),
                    spec.column
                );
            }
        }
        match spec.order {
            Some(SortOrder::Desc) => part.push_str(" DESC"),
            Some(SortOrder::Asc) => part.push_str(" ASC"),
            None => {}
        }
        part
    }

    pub fn create_index(self, table: &Identifier, index: &IndexDescriptor) -> String {
        format!(
            "CREATE INDEX {} ON {} ({})",
            self.quote(index.name.as_str()),
            self.quote(table.as_str()),
            self.key_parts(&index.columns)
        )
    }

    /// `index` is a name read back from the catalog. It need not be a valid
    /// [`Identifier`]; quoting alone keeps it inert.
    pub fn drop_index(self, table: &Identifier, index: &str) -> String {
        match self {
            Dialect::MySql => format!(
                "DROP INDEX {} ON {}",
                self.quote(index),
                self.quote(table.as_str())
            ),
            Dialect::Sqlite => format!("DROP INDEX {}", self.quote(index)),
        }
    }

    /// Names of every non-primary index on a table; one `?` for the table name.
    pub fn secondary_indexes_query(self) -> &'static str {
        match self {
            Dialect::MySql => {
                "SELECT DISTINCT INDEX_NAME FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME <> 'PRIMARY' \
                 ORDER BY INDEX_NAME"
            }
            // Auto-indexes (UNIQUE/PK backing) have no SQL text.
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master \
                 WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL \
                 ORDER BY name"
            }
        }
    }

    /// One `?` for the table name; returns a row iff the table exists.
    pub fn table_exists_query(self) -> &'static str {
        match self {
            Dialect::MySql => {
                "SELECT 1 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
            }
            Dialect::Sqlite => "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
        }
    }

    /// One `?` for the schema name; `None` where databases are not a concept.
    pub fn database_exists_query(self) -> Option<&'static str> {
        match self {
            Dialect::MySql => Some(MYSQL_SCHEMA_EXISTS),
            Dialect::Sqlite => None,
        }
    }

    /// Row count, storage sizes and engine of a table, in that column order.
    pub fn table_status(self, table: &Identifier) -> (String, Vec<Value>) {
        match self {
            Dialect::MySql => (
                "SELECT TABLE_ROWS, DATA_LENGTH, INDEX_LENGTH, ENGINE \
                 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
                    .to_string(),
                vec![table.as_str().into()],
            ),
            // No per-table size accounting without the dbstat extension.
            Dialect::Sqlite => (
                format!(
                    "SELECT COUNT(*), NULL, NULL, 'sqlite' FROM {}",
                    self.quote(table.as_str())
                ),
                Vec::new(),
            ),
        }
    }

    /// Table reference forcing a specific index.
    pub fn table_with_hint(self, table: &Identifier, index: &Identifier) -> String {
        match self {
            Dialect::MySql => format!(
                "{} USE INDEX ({})",
                self.quote(table.as_str()),
                self.quote(index.as_str())
            ),
            Dialect::Sqlite => format!(
                "{} INDEXED BY {}",
                self.quote(table.as_str()),
                self.quote(index.as_str())
            ),
        }
    }

    pub fn analyze_table(self, table: &Identifier) -> String {
        match self {
            Dialect::MySql => format!("ANALYZE TABLE {}", self.quote(table.as_str())),
            Dialect::Sqlite => format!("ANALYZE {}", self.quote(table.as_str())),
        }
    }

    /// Statement that rebuilds table storage. SQLite has no table-scoped form
    /// and vacuums the whole file.
    pub fn optimize_table(self, table: &Identifier) -> String {
        match self {
            Dialect::MySql => format!("OPTIMIZE TABLE {}", self.quote(table.as_str())),
            Dialect::Sqlite => "VACUUM".to_string(),
        }
    }

    /// Session-level optimizer knobs. Each one may be rejected by a given
    /// server version; callers apply them one at a time.
    pub fn tuning_statements(self) -> &'static [&'static str] {
        match self {
            Dialect::MySql => &[
                "SET SESSION optimizer_switch='mrr=on,mrr_cost_based=off'",
                "SET SESSION optimizer_switch='batched_key_access=on'",
                "SET SESSION optimizer_switch='materialization=on'",
                "SET SESSION optimizer_switch='semijoin=on'",
                "SET SESSION join_buffer_size = 4194304",
                "SET SESSION sort_buffer_size = 8388608",
                "SET SESSION read_buffer_size = 2097152",
                "SET SESSION read_rnd_buffer_size = 4194304",
            ],
            Dialect::Sqlite => &[
                "PRAGMA cache_size = -131072",
                "PRAGMA temp_store = MEMORY",
            ],
        }
    }

    /// Multi-row insert of `rows` token records, `?` placeholders only.
    pub fn insert_tokens(self, table: &Identifier, rows: usize) -> String {
        let columns = TokenColumn::INSERTABLE
            .iter()
            .map(|c| self.quote(c.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let tuple = format!(
            "({})",
            vec!["?"; TokenColumn::INSERTABLE.len()].join(", ")
        );
        let mut sql = String::with_capacity(64 + columns.len() + rows * (tuple.len() + 2));
        sql.push_str("INSERT INTO ");
        sql.push_str(&self.quote(table.as_str()));
        sql.push_str(" (");
        sql.push_str(&columns);
        sql.push_str(") VALUES ");
        for i in 0..rows {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&tuple);
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Identifier {
        Identifier::new("oauth_tokens").unwrap()
    }

    #[test]
    fn renders_index_ddl_per_dialect() {
        let idx = IndexDescriptor::new(
            "idx_user_issued",
            [
                ColumnSpec::new(TokenColumn::UserId),
                ColumnSpec::new(TokenColumn::IssuedAt).desc(),
            ],
        )
        .unwrap();
        assert_eq!(
            Dialect::MySql.create_index(&table(), &idx),
            "CREATE INDEX `idx_user_issued` ON `oauth_tokens` (`user_id`, `issued_at` DESC)"
        );
        assert_eq!(
            Dialect::Sqlite.create_index(&table(), &idx),
            "CREATE INDEX \"idx_user_issued\" ON \"oauth_tokens\" (\"user_id\", \"issued_at\" DESC)"
        );
    }

    #[test]
    fn prefix_length_only_on_mysql() {
        let idx = IndexDescriptor::new(
            "idx_access_token",
            [ColumnSpec::new(TokenColumn::AccessToken).prefix(8)],
        )
        .unwrap();
        assert!(Dialect::MySql
            .create_index(&table(), &idx)
            .ends_with("(`access_token`(8))"));
        assert!(Dialect::Sqlite
            .create_index(&table(), &idx)
            .ends_with("(\"access_token\")"));
    }

    #[test]
    fn drop_index_forms() {
        assert_eq!(
            Dialect::MySql.drop_index(&table(), "idx_a"),
            "DROP INDEX `idx_a` ON `oauth_tokens`"
        );
        assert_eq!(
            Dialect::Sqlite.drop_index(&table(), "idx_a"),
            "DROP INDEX \"idx_a\""
        );
        assert_eq!(
            Dialect::MySql.drop_index(&table(), "idx`legacy"),
            "DROP INDEX `idx``legacy` ON `oauth_tokens`"
        );
        assert_eq!(
            Dialect::Sqlite.drop_index(&table(), "idx-legacy"),
            "DROP INDEX \"idx-legacy\""
        );
    }

    #[test]
    fn insert_has_one_tuple_per_row() {
        let sql = Dialect::MySql.insert_tokens(&table(), 3);
        assert_eq!(sql.matches("(?, ?, ?, ?, ?, ?, ?, ?, ?)").count(), 3);
        assert_eq!(sql.matches('?').count(), 27);
        assert!(sql.starts_with("INSERT INTO `oauth_tokens` (`user_id`, "));
    }

    #[test]
    fn hints_follow_dialect() {
        let name = Identifier::new("idx_user_covering").unwrap();
        assert_eq!(
            Dialect::MySql.table_with_hint(&table(), &name),
            "`oauth_tokens` USE INDEX (`idx_user_covering`)"
        );
        assert_eq!(
            Dialect::Sqlite.table_with_hint(&table(), &name),
            "\"oauth_tokens\" INDEXED BY \"idx_user_covering\""
        );
    }
}
