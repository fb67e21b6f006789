//! Validated SQL identifiers.
//!
//! Database, table and index names end up interpolated into DDL, so they are
//! only accepted when they match `[A-Za-z_][A-Za-z0-9_]{0,63}`. Column names
//! never go through here; they come from the closed [`crate::TokenColumn`] set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest identifier accepted (MySQL's limit for table and index names).
pub const MAX_IDENTIFIER_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier `{0}` is longer than {MAX_IDENTIFIER_LEN} characters")]
    TooLong(String),
    #[error("identifier `{0}` must start with a letter or underscore")]
    BadStart(String),
    #[error("identifier `{name}` contains disallowed character {ch:?}")]
    BadChar { name: String, ch: char },
}

/// A database, table or index name that is safe to splice into SQL text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: &str) -> Result<Self, IdentifierError> {
        let mut chars = name.chars();
        let first = chars.next().ok_or(IdentifierError::Empty)?;
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong(name.to_string()));
        }
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(IdentifierError::BadStart(name.to_string()));
        }
        if let Some(ch) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(IdentifierError::BadChar {
                name: name.to_string(),
                ch,
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["oauth_tokens", "_tmp", "idx_user_id", "T1"] {
            assert_eq!(Identifier::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_injection_attempts() {
        assert_eq!(Identifier::new(""), Err(IdentifierError::Empty));
        assert!(matches!(
            Identifier::new("1abc"),
            Err(IdentifierError::BadStart(_))
        ));
        assert!(matches!(
            Identifier::new("t; DROP TABLE x"),
            Err(IdentifierError::BadChar { ch: ';', .. })
        ));
        assert!(matches!(
            Identifier::new("t`x"),
            Err(IdentifierError::BadChar { ch: '`', .. })
        ));
        assert!(matches!(
            Identifier::new(&"a".repeat(65)),
            Err(IdentifierError::TooLong(_))
        ));
    }

    #[test]
    fn owned_strings_go_through_validation() {
        let ok = Identifier::try_from("idx_a".to_string()).unwrap();
        assert_eq!(ok.as_str(), "idx_a");
        assert!(Identifier::try_from("bad name".to_string()).is_err());
        assert!("idx_b".parse::<Identifier>().is_ok());
    }
}
