//! The benchmarked row shape: one OAuth-style token record.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Text form used for DATETIME columns (second resolution, no zone).
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
    Refresh,
}

impl TokenType {
    pub const ALL: [TokenType; 2] = [TokenType::Bearer, TokenType::Refresh];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Bearer => "Bearer",
            TokenType::Refresh => "Refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of columns on the token table. Anything that names a column in
/// generated SQL goes through this enum, so it doubles as the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenColumn {
    Id,
    UserId,
    ClientId,
    AccessToken,
    TokenType,
    RefreshToken,
    IssuedAt,
    RevokedAt,
    ExpiresAt,
    RefreshTokenExpiresAt,
}

impl TokenColumn {
    /// Table order, as created by the schema manager.
    pub const ALL: [TokenColumn; 10] = [
        TokenColumn::Id,
        TokenColumn::UserId,
        TokenColumn::ClientId,
        TokenColumn::AccessToken,
        TokenColumn::TokenType,
        TokenColumn::RefreshToken,
        TokenColumn::IssuedAt,
        TokenColumn::RevokedAt,
        TokenColumn::ExpiresAt,
        TokenColumn::RefreshTokenExpiresAt,
    ];

    /// Columns written by a bulk insert (`id` is assigned by the store).
    pub const INSERTABLE: [TokenColumn; 9] = [
        TokenColumn::UserId,
        TokenColumn::ClientId,
        TokenColumn::AccessToken,
        TokenColumn::TokenType,
        TokenColumn::RefreshToken,
        TokenColumn::IssuedAt,
        TokenColumn::RevokedAt,
        TokenColumn::ExpiresAt,
        TokenColumn::RefreshTokenExpiresAt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TokenColumn::Id => "id",
            TokenColumn::UserId => "user_id",
            TokenColumn::ClientId => "client_id",
            TokenColumn::AccessToken => "access_token",
            TokenColumn::TokenType => "token_type",
            TokenColumn::RefreshToken => "refresh_token",
            TokenColumn::IssuedAt => "issued_at",
            TokenColumn::RevokedAt => "revoked_at",
            TokenColumn::ExpiresAt => "expires_at",
            TokenColumn::RefreshTokenExpiresAt => "refresh_token_expires_at",
        }
    }

    /// Whether a prefix length is meaningful for this column (string columns).
    pub fn is_text(self) -> bool {
        matches!(
            self,
            TokenColumn::AccessToken | TokenColumn::TokenType | TokenColumn::RefreshToken
        )
    }
}

impl fmt::Display for TokenColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not a column of the token table")]
pub struct UnknownColumn(pub String);

impl FromStr for TokenColumn {
    type Err = UnknownColumn;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenColumn::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownColumn(s.to_string()))
    }
}

/// One row of the token table as produced by the generator. `id` is absent
/// because the store assigns it on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user_id: u32,
    pub client_id: u32,
    pub access_token: String,
    pub token_type: TokenType,
    pub refresh_token: String,
    pub issued_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub expires_at: NaiveDateTime,
    pub refresh_token_expires_at: NaiveDateTime,
}

impl TokenRecord {
    /// `issued_at < expires_at`, `issued_at < refresh_token_expires_at`, and
    /// `revoked_at > expires_at` when present.
    pub fn timestamps_consistent(&self) -> bool {
        self.issued_at < self.expires_at
            && self.issued_at < self.refresh_token_expires_at
            && self.revoked_at.is_none_or(|r| r > self.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn record() -> TokenRecord {
        let issued = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        TokenRecord {
            user_id: 1,
            client_id: 2,
            access_token: "a".repeat(40),
            token_type: TokenType::Bearer,
            refresh_token: "r".repeat(32),
            issued_at: issued,
            revoked_at: None,
            expires_at: issued + Duration::hours(1),
            refresh_token_expires_at: issued + Duration::days(1),
        }
    }

    #[test]
    fn column_names_round_trip_through_from_str() {
        for col in TokenColumn::ALL {
            assert_eq!(col.name().parse::<TokenColumn>().unwrap(), col);
        }
        assert!("password".parse::<TokenColumn>().is_err());
    }

    #[test]
    fn insertable_excludes_surrogate_key() {
        assert!(!TokenColumn::INSERTABLE.contains(&TokenColumn::Id));
        assert_eq!(TokenColumn::INSERTABLE.len() + 1, TokenColumn::ALL.len());
    }

    #[test]
    fn revoked_before_expiry_is_inconsistent() {
        let mut r = record();
        assert!(r.timestamps_consistent());
        r.revoked_at = Some(r.expires_at);
        assert!(!r.timestamps_consistent());
        r.revoked_at = Some(r.expires_at + Duration::seconds(1));
        assert!(r.timestamps_consistent());
    }
}
