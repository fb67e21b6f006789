//! Synthetic token generation.
//!
//! Records are produced lazily: [`TokenGenerator::generate`] returns an
//! iterator that builds one record per `next()` and never more than the caller
//! pulls, so a five-million-row load holds only one batch in memory.

use crate::error::{HarnessError, Result};
use chrono::{Duration, NaiveDateTime, Timelike, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use tokidx_core::{TokenRecord, TokenType};

const HOUR: i64 = 3_600;
const DAY: i64 = 24 * HOUR;

/// Shape of the generated population.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorParams {
    pub users: u32,
    pub clients: u32,
    pub access_token_len: RangeInclusive<usize>,
    pub refresh_token_len: RangeInclusive<usize>,
    /// `expires_at - issued_at`, in seconds.
    pub access_lifetime_secs: RangeInclusive<i64>,
    /// `refresh_token_expires_at - issued_at`, in seconds.
    pub refresh_lifetime_secs: RangeInclusive<i64>,
    /// Probability that a record carries `revoked_at`.
    pub revoked_ratio: f64,
    /// `revoked_at - expires_at`, in seconds.
    pub revoke_delay_secs: i64,
    /// Fixed RNG seed; `None` seeds every `generate` call from entropy.
    pub seed: Option<u64>,
    /// Fixed `issued_at`; `None` stamps each record with the current second.
    pub issued_at: Option<NaiveDateTime>,
}

impl GeneratorParams {
    /// 180 users, 18 clients, tokens of 40..=80 / 32..=64 characters, access
    /// lifetimes of 1 hour to a year, refresh lifetimes of a day to 7 years,
    /// half the tokens revoked 30 days after expiry.
    pub fn standard() -> Self {
        Self {
            users: 180,
            clients: 18,
            access_token_len: 40..=80,
            refresh_token_len: 32..=64,
            access_lifetime_secs: HOUR..=365 * DAY,
            refresh_lifetime_secs: DAY..=7 * 365 * DAY,
            revoked_ratio: 0.5,
            revoke_delay_secs: 30 * DAY,
            seed: None,
            issued_at: None,
        }
    }

    /// Deterministic variant for tests and benches: same seed, same records.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            issued_at: Some(
                chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .unwrap_or_default(),
            ),
            ..Self::standard()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |what: &str| Err(HarnessError::Config(format!("generator: {what}")));
        if self.users == 0 || self.clients == 0 {
            return bad("users and clients must be at least 1");
        }
        for (name, range) in [
            ("access token length", &self.access_token_len),
            ("refresh token length", &self.refresh_token_len),
        ] {
            if range.is_empty() || *range.start() == 0 {
                return bad(&format!("{name} range {range:?} must be non-empty and positive"));
            }
        }
        for (name, range) in [
            ("access lifetime", &self.access_lifetime_secs),
            ("refresh lifetime", &self.refresh_lifetime_secs),
        ] {
            if range.is_empty() || *range.start() <= 0 {
                return bad(&format!(
                    "{name} range {range:?} must be non-empty with a positive lower bound"
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.revoked_ratio) {
            return bad("revoked ratio must be within 0.0..=1.0");
        }
        if self.revoke_delay_secs <= 0 {
            return bad("revoke delay must be positive");
        }
        Ok(())
    }
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone)]
pub struct TokenGenerator {
    params: GeneratorParams,
}

impl TokenGenerator {
    pub fn new(params: GeneratorParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &GeneratorParams {
        &self.params
    }

    /// Exactly `count` records. Each call starts from a fresh RNG.
    pub fn generate(&self, count: usize) -> TokenStream {
        let rng = match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        TokenStream {
            params: self.params.clone(),
            rng,
            remaining: count,
        }
    }
}

/// Lazy, finite record stream returned by [`TokenGenerator::generate`].
pub struct TokenStream {
    params: GeneratorParams,
    rng: StdRng,
    remaining: usize,
}

impl TokenStream {
    fn token(&mut self, len: RangeInclusive<usize>) -> String {
        let len = self.rng.gen_range(len);
        (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn record(&mut self) -> TokenRecord {
        let p = &self.params;
        let issued_at = p.issued_at.unwrap_or_else(now_to_the_second);
        let user_id = self.rng.gen_range(1..=p.users);
        let client_id = self.rng.gen_range(1..=p.clients);
        let token_type = TokenType::ALL[self.rng.gen_range(0..TokenType::ALL.len())];
        let expires_at =
            issued_at + Duration::seconds(self.rng.gen_range(p.access_lifetime_secs.clone()));
        let refresh_token_expires_at =
            issued_at + Duration::seconds(self.rng.gen_range(p.refresh_lifetime_secs.clone()));
        let revoked_at = self
            .rng
            .gen_bool(p.revoked_ratio)
            .then(|| expires_at + Duration::seconds(p.revoke_delay_secs));

        let access_len = p.access_token_len.clone();
        let refresh_len = p.refresh_token_len.clone();
        TokenRecord {
            user_id,
            client_id,
            access_token: self.token(access_len),
            token_type,
            refresh_token: self.token(refresh_len),
            issued_at,
            revoked_at,
            expires_at,
            refresh_token_expires_at,
        }
    }
}

impl Iterator for TokenStream {
    type Item = TokenRecord;

    fn next(&mut self) -> Option<TokenRecord> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.record())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for TokenStream {}

fn now_to_the_second() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> TokenGenerator {
        TokenGenerator::new(GeneratorParams::seeded(7)).unwrap()
    }

    #[test]
    fn yields_exactly_count_records() {
        let tokens = generator();
        assert_eq!(tokens.generate(0).count(), 0);
        assert_eq!(tokens.generate(23).count(), 23);
        assert_eq!(tokens.generate(5).len(), 5);
    }

    #[test]
    fn records_respect_ranges_and_timestamp_order() {
        let tokens = TokenGenerator::new(GeneratorParams::standard()).unwrap();
        for r in tokens.generate(2_000) {
            assert!((1..=180).contains(&r.user_id));
            assert!((1..=18).contains(&r.client_id));
            assert!((40..=80).contains(&r.access_token.len()));
            assert!((32..=64).contains(&r.refresh_token.len()));
            assert!(r.access_token.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(r.timestamps_consistent(), "{r:?}");
            assert_eq!(r.issued_at.nanosecond(), 0);
            if let Some(revoked) = r.revoked_at {
                assert_eq!(revoked - r.expires_at, Duration::days(30));
            }
        }
    }

    #[test]
    fn seeded_runs_repeat_and_calls_do_not_share_state() {
        let tokens = generator();
        let a: Vec<_> = tokens.generate(50).collect();
        let b: Vec<_> = tokens.generate(50).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn revoked_ratio_extremes() {
        let mut params = GeneratorParams::seeded(1);
        params.revoked_ratio = 0.0;
        let tokens = TokenGenerator::new(params.clone()).unwrap();
        assert!(tokens.generate(200).all(|r| r.revoked_at.is_none()));

        params.revoked_ratio = 1.0;
        let tokens = TokenGenerator::new(params).unwrap();
        assert!(tokens.generate(200).all(|r| r.revoked_at.is_some()));
    }

    #[test]
    fn rejects_non_positive_lower_bounds() {
        let mut params = GeneratorParams::standard();
        params.access_lifetime_secs = 0..=HOUR;
        assert!(TokenGenerator::new(params).is_err());

        let mut params = GeneratorParams::standard();
        params.revoke_delay_secs = 0;
        assert!(TokenGenerator::new(params).is_err());

        let mut params = GeneratorParams::standard();
        params.users = 0;
        assert!(TokenGenerator::new(params).is_err());

        let mut params = GeneratorParams::standard();
        params.revoked_ratio = 1.5;
        assert!(TokenGenerator::new(params).is_err());
    }
}
