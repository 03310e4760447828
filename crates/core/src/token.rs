// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registration tokens.
//!
//! Token values are security-sensitive and must never reach logs, events,
//! or serialized status output. [`SecretValue`]'s
//! `Debug`/`Display` both redact; only `Token::expires_at` is meant to be
//! surfaced.

use crate::ids::RepoId;
use chrono::{DateTime, Utc};
use std::fmt;

/// A token value that redacts itself in `Debug` and `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Explicit accessor — the only way to read the raw value back out.
    /// Call sites that hand this to the Provider/ContainerEngine are the
    /// sole intended callers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// A registration token issued by the Provider for one repository.
#[derive(Debug, Clone)]
pub struct Token {
    pub repo_id: RepoId,
    pub value: SecretValue,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// `now < expiresAt − skew`.
    pub fn is_valid(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        now < self.expires_at - skew
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_value_redacts_in_debug_and_display() {
        let v = SecretValue::new("super-secret-token");
        assert_eq!(format!("{v:?}"), "SecretValue(<redacted>)");
        assert_eq!(format!("{v}"), "<redacted>");
        assert_eq!(v.expose(), "super-secret-token");
    }

    #[test]
    fn is_valid_respects_skew_boundary() {
        let now = Utc::now();
        let token = Token {
            repo_id: RepoId::new("acme/widgets"),
            value: SecretValue::new("v"),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        };
        assert!(!token.is_valid(now, chrono::Duration::minutes(5)));
        assert!(token.is_valid(now, chrono::Duration::minutes(4)));
    }
}
