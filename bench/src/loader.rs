//! Batched bulk insert of generated tokens.
//!
//! Foreign-key checks and autocommit are switched off for the duration of a
//! load by [`BulkLoadSession`], which puts the observed values back however the
//! load ends.

use crate::error::{HarnessError, Result, StoreError};
use crate::populate::TokenGenerator;
use crate::store::{SessionSettings, Store, Value};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokidx_core::{Identifier, TokenColumn, TokenRecord};

/// Bound values per inserted row.
pub const PARAMS_PER_ROW: usize = TokenColumn::INSERTABLE.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub total: usize,
    pub batch_size: usize,
    /// Commit after this many batches (and always after the last one).
    pub commit_every: usize,
}

impl LoadOptions {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(HarnessError::Config("batch size must be at least 1".into()));
        }
        if self.commit_every == 0 {
            return Err(HarnessError::Config("commit interval must be at least 1".into()));
        }
        Ok(())
    }
}

/// Sizes of the batches a load is split into: full batches, then the
/// remainder. `total = 0` plans nothing.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    remaining: usize,
    batch_size: usize,
}

impl BatchPlan {
    pub fn new(total: usize, batch_size: usize) -> Self {
        Self {
            remaining: total,
            batch_size: batch_size.max(1),
        }
    }
}

impl Iterator for BatchPlan {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let size = self.remaining.min(self.batch_size);
        self.remaining -= size;
        Some(size)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.div_ceil(self.batch_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for BatchPlan {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSummary {
    pub inserted: usize,
    pub batches: usize,
    pub batch_size: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl LoadSummary {
    pub fn rows_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.inserted as f64 / secs
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1e3)
    }
}

/// Scoped session state for a bulk load.
///
/// `begin` records the current autocommit and FK-check values and turns both
/// off. `finish` restores them and reports failures; if the session is dropped
/// without `finish` (error or panic), the open transaction is rolled back and
/// the settings are restored, with failures logged.
///
/// FK checks are only toggled with no transaction open (SQLite ignores the
/// pragma inside one), so a caller's pending work is committed by `begin`.
pub struct BulkLoadSession<'a> {
    store: &'a mut dyn Store,
    saved: SessionSettings,
    finished: bool,
}

impl<'a> BulkLoadSession<'a> {
    pub fn begin(store: &'a mut dyn Store) -> std::result::Result<Self, StoreError> {
        let saved = store.session_settings()?;
        let mut session = Self {
            store,
            saved,
            finished: false,
        };
        // On error `session` is dropped, which restores `saved`.
        if !saved.autocommit {
            session.store.set_autocommit(true)?;
        }
        session.store.set_foreign_key_checks(false)?;
        session.store.set_autocommit(false)?;
        log::debug!("Bulk load session started; saved {saved:?}");
        Ok(session)
    }

    pub fn saved(&self) -> SessionSettings {
        self.saved
    }

    pub fn store(&mut self) -> &mut dyn Store {
        &mut *self.store
    }

    /// Close any open transaction, put FK checks back, then autocommit.
    fn restore(&mut self) -> std::result::Result<(), StoreError> {
        let closed = self.store.set_autocommit(true);
        let fk = self
            .store
            .set_foreign_key_checks(self.saved.foreign_key_checks);
        let autocommit = if self.saved.autocommit {
            Ok(())
        } else {
            self.store.set_autocommit(false)
        };
        closed
            .and(fk)
            .and(autocommit)
            .map_err(|e| e.in_op("restore session settings"))
    }

    /// End a successful load. Uncommitted work is the caller's to commit first.
    pub fn finish(mut self) -> std::result::Result<(), StoreError> {
        self.finished = true;
        self.restore()
    }
}

impl Drop for BulkLoadSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.store.rollback() {
            log::error!("Rollback after failed load: {e}");
        }
        match self.restore() {
            Ok(()) => log::info!("Session settings restored after failed load"),
            Err(e) => log::error!("{e}"),
        }
    }
}

fn record_params(record: TokenRecord) -> [Value; PARAMS_PER_ROW] {
    [
        record.user_id.into(),
        record.client_id.into(),
        record.access_token.into(),
        record.token_type.into(),
        record.refresh_token.into(),
        record.issued_at.into(),
        record.revoked_at.into(),
        record.expires_at.into(),
        record.refresh_token_expires_at.into(),
    ]
}

#[derive(Debug, Clone)]
pub struct BatchLoader {
    options: LoadOptions,
}

impl BatchLoader {
    pub fn new(options: LoadOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    /// Requested batch size, reduced so one batch fits the store's bind limit.
    pub fn effective_batch_size(&self, store: &dyn Store) -> usize {
        let max_rows = (store.max_bind_params() / PARAMS_PER_ROW).max(1);
        if self.options.batch_size > max_rows {
            log::warn!(
                "Batch size {} needs {} bound parameters; {} allows {}, using {} rows per batch",
                self.options.batch_size,
                self.options.batch_size * PARAMS_PER_ROW,
                store.dialect().name(),
                store.max_bind_params(),
                max_rows
            );
            max_rows
        } else {
            self.options.batch_size
        }
    }

    /// Generate and insert `total` records into `table`.
    pub fn load(
        &self,
        store: &mut dyn Store,
        table: &Identifier,
        generator: &TokenGenerator,
    ) -> Result<LoadSummary> {
        let total = self.options.total;
        let batch_size = self.effective_batch_size(store);
        let plan = BatchPlan::new(total, batch_size);
        let batches = plan.len();
        let dialect = store.dialect();
        let full_sql = dialect.insert_tokens(table, batch_size);

        log::info!(
            "Loading {total} records into {table}: {batches} batches of up to {batch_size}, \
             commit every {}",
            self.options.commit_every
        );
        let start = Instant::now();
        let mut session = BulkLoadSession::begin(store)
            .map_err(|source| HarnessError::Load { batch: 0, source })?;

        let mut records = generator.generate(total);
        let mut inserted = 0usize;
        let mut params: Vec<Value> = Vec::with_capacity(batch_size * PARAMS_PER_ROW);

        for (i, size) in plan.enumerate() {
            let batch = i + 1;
            params.clear();
            params.extend(records.by_ref().take(size).flat_map(record_params));

            let tail_sql;
            let sql = if size == batch_size {
                &full_sql
            } else {
                tail_sql = dialect.insert_tokens(table, size);
                &tail_sql
            };

            session
                .store()
                .execute(sql, &params)
                .map_err(|e| HarnessError::Load {
                    batch,
                    source: e.in_op("insert batch"),
                })?;
            inserted += size;

            if batch % self.options.commit_every == 0 || batch == batches {
                session.store().commit().map_err(|e| HarnessError::Load {
                    batch,
                    source: e.in_op("commit"),
                })?;
            }

            log::info!(
                "batch {batch}/{batches}: {inserted}/{total} rows ({:.1}%)",
                inserted as f64 * 100.0 / total as f64
            );
        }

        session.finish().map_err(|source| HarnessError::Load {
            batch: batches,
            source,
        })?;

        let summary = LoadSummary {
            inserted,
            batches,
            batch_size,
            elapsed: start.elapsed(),
        };
        log::info!(
            "Loaded {} records in {:.2}s ({:.0} rows/s)",
            summary.inserted,
            summary.elapsed.as_secs_f64(),
            summary.rows_per_sec()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::populate::GeneratorParams;
    use crate::schema::ensure_table;
    use crate::store::sqlite::SqliteStore;

    fn table() -> Identifier {
        Identifier::new("oauth_tokens").unwrap()
    }

    fn store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        ensure_table(&mut store, &table()).unwrap();
        store
    }

    fn count(store: &mut SqliteStore) -> usize {
        store
            .fetch_all_count("SELECT id FROM oauth_tokens", &[])
            .unwrap()
    }

    #[test]
    fn plans_full_batches_then_remainder() {
        assert_eq!(BatchPlan::new(23, 10).collect::<Vec<_>>(), vec![10, 10, 3]);
        assert_eq!(BatchPlan::new(20, 10).collect::<Vec<_>>(), vec![10, 10]);
        assert_eq!(BatchPlan::new(3, 10).collect::<Vec<_>>(), vec![3]);
        assert_eq!(BatchPlan::new(0, 10).len(), 0);
        assert_eq!(BatchPlan::new(23, 10).len(), 3);
    }

    #[test]
    fn rejects_zero_sizes() {
        let opts = LoadOptions {
            total: 10,
            batch_size: 0,
            commit_every: 1,
        };
        assert!(BatchLoader::new(opts).is_err());
        let opts = LoadOptions {
            total: 10,
            batch_size: 5,
            commit_every: 0,
        };
        assert!(BatchLoader::new(opts).is_err());
    }

    #[test]
    fn clamps_batch_to_bind_limit() {
        let store = store();
        let loader = BatchLoader::new(LoadOptions {
            total: 1,
            batch_size: 1_000_000,
            commit_every: 1,
        })
        .unwrap();
        assert_eq!(loader.effective_batch_size(&store), 32_766 / 9);
    }

    #[test]
    fn loads_every_record_and_restores_session() {
        let mut store = store();
        store.set_foreign_key_checks(true).unwrap();
        let generator = TokenGenerator::new(GeneratorParams::seeded(3)).unwrap();
        let loader = BatchLoader::new(LoadOptions {
            total: 23,
            batch_size: 10,
            commit_every: 2,
        })
        .unwrap();

        let summary = loader.load(&mut store, &table(), &generator).unwrap();
        assert_eq!(summary.inserted, 23);
        assert_eq!(summary.batches, 3);
        assert_eq!(count(&mut store), 23);

        let after = store.session_settings().unwrap();
        assert!(after.autocommit);
        assert!(after.foreign_key_checks);
        assert!(store.connection().is_autocommit());
    }

    #[test]
    fn empty_load_inserts_nothing() {
        let mut store = store();
        let generator = TokenGenerator::new(GeneratorParams::seeded(3)).unwrap();
        let loader = BatchLoader::new(LoadOptions {
            total: 0,
            batch_size: 10,
            commit_every: 1,
        })
        .unwrap();
        let summary = loader.load(&mut store, &table(), &generator).unwrap();
        assert_eq!((summary.inserted, summary.batches), (0, 0));
        assert_eq!(count(&mut store), 0);
    }

    #[test]
    fn dropped_session_rolls_back_and_restores() {
        let mut store = store();
        {
            let mut session = BulkLoadSession::begin(&mut store).unwrap();
            assert!(!session.store().session_settings().unwrap().autocommit);
            session
                .store()
                .execute(
                    "INSERT INTO oauth_tokens (user_id, client_id, access_token, token_type, \
                     refresh_token, issued_at, expires_at, refresh_token_expires_at) \
                     VALUES (1, 1, 'a', 'Bearer', 'r', '2024-01-01 00:00:00', \
                     '2024-01-02 00:00:00', '2024-02-01 00:00:00')",
                    &[],
                )
                .unwrap();
        }
        assert_eq!(count(&mut store), 0);
        assert!(store.session_settings().unwrap().autocommit);
    }

    #[test]
    fn open_transaction_does_not_keep_fk_checks_on() {
        let mut store = store();
        store.set_foreign_key_checks(true).unwrap();
        store.set_autocommit(false).unwrap();
        let before = store.session_settings().unwrap();

        let mut session = BulkLoadSession::begin(&mut store).unwrap();
        let during = session.store().session_settings().unwrap();
        assert!(!during.foreign_key_checks);
        assert!(!during.autocommit);
        session.finish().unwrap();

        assert_eq!(store.session_settings().unwrap(), before);
        assert!(!store.connection().is_autocommit());
    }
}
