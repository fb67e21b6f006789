//! Declarative secondary-index descriptors.

use crate::identifier::{Identifier, IdentifierError};
use crate::token::TokenColumn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One key part of an index: column, optional direction, optional prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column: TokenColumn,
    #[serde(default)]
    pub order: Option<SortOrder>,
    #[serde(default)]
    pub prefix_len: Option<u16>,
}

impl ColumnSpec {
    pub fn new(column: TokenColumn) -> Self {
        Self {
            column,
            order: None,
            prefix_len: None,
        }
    }

    pub fn desc(mut self) -> Self {
        self.order = Some(SortOrder::Desc);
        self
    }

    pub fn prefix(mut self, len: u16) -> Self {
        self.prefix_len = Some(len);
        self
    }
}

impl From<TokenColumn> for ColumnSpec {
    fn from(column: TokenColumn) -> Self {
        ColumnSpec::new(column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Name(#[from] IdentifierError),
    #[error("index `{0}` has no columns")]
    NoColumns(String),
    #[error("index `{index}` lists column `{column}` twice")]
    DuplicateColumn { index: String, column: TokenColumn },
    #[error("index `{index}`: prefix length on non-text column `{column}`")]
    PrefixOnNonText { index: String, column: TokenColumn },
    #[error("index `{index}`: prefix length must be at least 1")]
    ZeroPrefix { index: String },
}

/// `{name, columns}`; applying one means "ensure this index exists".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: Identifier,
    pub columns: Vec<ColumnSpec>,
}

impl IndexDescriptor {
    pub fn new<C: Into<ColumnSpec>>(
        name: &str,
        columns: impl IntoIterator<Item = C>,
    ) -> Result<Self, IndexError> {
        let descriptor = Self {
            name: Identifier::new(name)?,
            columns: columns.into_iter().map(Into::into).collect(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        let index = self.name.to_string();
        if self.columns.is_empty() {
            return Err(IndexError::NoColumns(index));
        }
        for (i, spec) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|s| s.column == spec.column) {
                return Err(IndexError::DuplicateColumn {
                    index,
                    column: spec.column,
                });
            }
            match spec.prefix_len {
                Some(0) => return Err(IndexError::ZeroPrefix { index }),
                Some(_) if !spec.column.is_text() => {
                    return Err(IndexError::PrefixOnNonText {
                        index,
                        column: spec.column,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.column.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_compound_descriptor() {
        let d = IndexDescriptor::new(
            "idx_user_issued",
            [
                ColumnSpec::new(TokenColumn::UserId),
                ColumnSpec::new(TokenColumn::IssuedAt).desc(),
            ],
        )
        .unwrap();
        assert_eq!(d.column_names(), vec!["user_id", "issued_at"]);
        assert_eq!(d.columns[1].order, Some(SortOrder::Desc));
    }

    #[test]
    fn rejects_bad_descriptors() {
        let none: [TokenColumn; 0] = [];
        assert!(matches!(
            IndexDescriptor::new("idx_empty", none),
            Err(IndexError::NoColumns(_))
        ));
        assert!(matches!(
            IndexDescriptor::new("idx_dup", [TokenColumn::UserId, TokenColumn::UserId]),
            Err(IndexError::DuplicateColumn { .. })
        ));
        assert!(matches!(
            IndexDescriptor::new("idx_p", [ColumnSpec::new(TokenColumn::UserId).prefix(4)]),
            Err(IndexError::PrefixOnNonText { .. })
        ));
        assert!(matches!(
            IndexDescriptor::new("bad-name", [TokenColumn::UserId]),
            Err(IndexError::Name(_))
        ));
    }

    #[test]
    fn deserializes_from_json_shape() {
        let d: IndexDescriptor = serde_json::from_str(
            r#"{"name":"idx_access_token","columns":[{"column":"access_token","prefix_len":8}]}"#,
        )
        .unwrap();
        assert_eq!(d.columns[0].prefix_len, Some(8));
        assert!(d.validate().is_ok());
    }
}
