//! Index controller: apply and drop secondary indexes on the token table.
//!
//! Nothing is cached. What is active is always whatever the catalog says.

use crate::error::{Result, StoreError};
use crate::schema;
use crate::store::{DdlOutcome, Store};
use std::fmt;
use std::str::FromStr;
use tokidx_core::{ColumnSpec, Identifier, IndexDescriptor, IndexError, TokenColumn};

/// Named collection of index descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexSet {
    /// One index per commonly filtered column plus `(user_id, token_type)`.
    Basic,
    /// The basic set with a prefix-limited access token index, a covering
    /// index for per-user listings and a `(user_id, issued_at DESC)` index.
    #[default]
    Generalized,
}

impl IndexSet {
    pub const ALL: [IndexSet; 2] = [IndexSet::Basic, IndexSet::Generalized];

    pub fn name(self) -> &'static str {
        match self {
            IndexSet::Basic => "basic",
            IndexSet::Generalized => "generalized",
        }
    }

    pub fn descriptors(self) -> std::result::Result<Vec<IndexDescriptor>, IndexError> {
        use TokenColumn::*;
        let mut set = vec![
            IndexDescriptor::new("idx_user_id", [UserId])?,
            IndexDescriptor::new("idx_client_id", [ClientId])?,
            IndexDescriptor::new("idx_token_type", [TokenType])?,
            IndexDescriptor::new("idx_access_token", [AccessToken])?,
            IndexDescriptor::new("idx_refresh_token", [RefreshToken])?,
            IndexDescriptor::new("idx_expires_at", [ExpiresAt])?,
            IndexDescriptor::new("idx_user_token_type", [UserId, TokenType])?,
        ];
        if self == IndexSet::Generalized {
            set[3] = IndexDescriptor::new(
                "idx_access_token",
                [ColumnSpec::new(AccessToken).prefix(8)],
            )?;
            set.push(IndexDescriptor::new(
                "idx_user_covering",
                [UserId, TokenType, ClientId, IssuedAt],
            )?);
            set.push(IndexDescriptor::new(
                "idx_user_issued",
                [ColumnSpec::new(UserId), ColumnSpec::new(IssuedAt).desc()],
            )?);
        }
        Ok(set)
    }
}

impl fmt::Display for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexSet {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        IndexSet::ALL
            .into_iter()
            .find(|set| set.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown index set `{s}` (expected basic or generalized)"))
    }
}

/// Ensure `index` exists on `table`. An existing index of that name is a
/// warning and [`DdlOutcome::AlreadyExists`].
pub fn apply(
    store: &mut dyn Store,
    table: &Identifier,
    index: &IndexDescriptor,
) -> std::result::Result<DdlOutcome, StoreError> {
    let sql = store.dialect().create_index(table, index);
    log::debug!("{sql}");
    let start = std::time::Instant::now();
    match store.execute(&sql, &[]) {
        Ok(_) => {
            log::info!(
                "Created index {} ({}) in {:.2}s",
                index.name,
                index.column_names().join(", "),
                start.elapsed().as_secs_f64()
            );
            Ok(DdlOutcome::Created)
        }
        Err(e) if e.is_already_exists() => {
            log::warn!("Index {} already exists on {table}", index.name);
            Ok(DdlOutcome::AlreadyExists)
        }
        Err(e) => Err(e.in_op(&format!("create index {}", index.name))),
    }
}

/// Outcome of one descriptor in [`apply_all`].
#[derive(Debug)]
pub struct ApplyOutcome {
    pub name: String,
    pub result: std::result::Result<DdlOutcome, StoreError>,
}

/// Apply each descriptor in order. Failures are recorded per index and do not
/// stop the rest, except a lost connection.
pub fn apply_all(
    store: &mut dyn Store,
    table: &Identifier,
    indexes: &[IndexDescriptor],
) -> Result<Vec<ApplyOutcome>> {
    let mut outcomes = Vec::with_capacity(indexes.len());
    for index in indexes {
        let result = match apply(store, table, index) {
            Err(e) if e.is_connectivity() => return Err(e.into()),
            Err(e) => {
                log::error!("{e}");
                Err(e)
            }
            ok => ok,
        };
        outcomes.push(ApplyOutcome {
            name: index.name.to_string(),
            result,
        });
    }
    Ok(outcomes)
}

/// Drop every secondary index on `table`.
pub fn drop_all(store: &mut dyn Store, table: &Identifier) -> Result<schema::DropSummary> {
    schema::drop_all_secondary_indexes(store, table)
}

/// Sorted names of the secondary indexes currently on `table`.
pub fn list_active(store: &mut dyn Store, table: &Identifier) -> Result<Vec<String>> {
    Ok(store.secondary_indexes(table)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generalized_extends_basic() {
        let basic = IndexSet::Basic.descriptors().unwrap();
        let generalized = IndexSet::Generalized.descriptors().unwrap();
        assert_eq!(basic.len(), 7);
        assert_eq!(generalized.len(), 9);

        let access = generalized
            .iter()
            .find(|d| d.name.as_str() == "idx_access_token")
            .unwrap();
        assert_eq!(access.columns[0].prefix_len, Some(8));

        let covering = generalized
            .iter()
            .find(|d| d.name.as_str() == "idx_user_covering")
            .unwrap();
        assert_eq!(
            covering.column_names(),
            vec!["user_id", "token_type", "client_id", "issued_at"]
        );
    }

    #[test]
    fn parses_set_names() {
        assert_eq!("basic".parse::<IndexSet>().unwrap(), IndexSet::Basic);
        assert_eq!(
            "Generalized".parse::<IndexSet>().unwrap(),
            IndexSet::Generalized
        );
        assert!("optimized-v2".parse::<IndexSet>().is_err());
    }
}
