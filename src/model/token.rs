//! Resume tokens — single-use credentials that authorize completing a wait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A resume token record, as persisted in the token index.
///
/// Secret material is never stored: only `secret_hash`, so a leaked index
/// file cannot be replayed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeToken {
    /// Stable token identifier (safe to log and to send to clients).
    pub token_id: String,
    /// Session this token belongs to.
    pub session_id: String,
    /// Run this token authorizes resuming.
    pub run_id: String,
    /// What the token authorizes (e.g. `"tool_result"`).
    pub scope: String,
    /// SHA-256 hash of the token secret.
    pub secret_hash: String,
    /// When the token expires, independent of its state.
    pub expires_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: TokenState,
}

impl ResumeToken {
    /// Mints a new active token for the given scope, returning the token
    /// record and the plaintext secret (shown to the caller exactly once).
    pub fn mint(
        token_id: String,
        session_id: String,
        run_id: String,
        scope: String,
        ttl: chrono::Duration,
    ) -> (Self, String) {
        let secret = uuid::Uuid::new_v4().simple().to_string();
        let token = Self {
            token_id,
            session_id,
            run_id,
            scope,
            secret_hash: hash_secret(&secret),
            expires_at: Utc::now() + ttl,
            state: TokenState::Active,
        };
        (token, secret)
    }

    /// Whether this token can currently be consumed: active, unexpired, and
    /// matching the supplied secret.
    pub fn is_valid(&self, secret: &str) -> bool {
        self.state == TokenState::Active
            && Utc::now() <= self.expires_at
            && self.secret_hash == hash_secret(secret)
    }

    /// Consumes the token if it is valid for the given secret. Returns
    /// `true` if this call performed the consumption (exactly-once).
    pub fn try_consume(&mut self, secret: &str) -> bool {
        if !self.is_valid(secret) {
            return false;
        }
        self.state = TokenState::Consumed;
        true
    }
}

/// Hashes a token secret for at-rest storage.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// A resume token's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Not yet consumed, revoked, or expired; usable.
    Active,
    /// Consumed by a successful `resume` call. Terminal.
    Consumed,
    /// Revoked by the coordinator (e.g. run cancelled while waiting). Terminal.
    Revoked,
    /// Passed `expires_at` without being consumed. Terminal.
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_and_consume_once() {
        let (mut token, secret) = ResumeToken::mint(
            "rt_1".into(),
            "s1".into(),
            "r1".into(),
            "tool_result".into(),
            chrono::Duration::seconds(60),
        );
        assert!(token.try_consume(&secret));
        assert_eq!(token.state, TokenState::Consumed);
    }

    #[test]
    fn double_consume_fails_without_mutating_state() {
        let (mut token, secret) = ResumeToken::mint(
            "rt_1".into(),
            "s1".into(),
            "r1".into(),
            "tool_result".into(),
            chrono::Duration::seconds(60),
        );
        assert!(token.try_consume(&secret));
        assert!(!token.try_consume(&secret));
        assert_eq!(token.state, TokenState::Consumed);
    }

    #[test]
    fn wrong_secret_does_not_consume() {
        let (mut token, _secret) = ResumeToken::mint(
            "rt_1".into(),
            "s1".into(),
            "r1".into(),
            "tool_result".into(),
            chrono::Duration::seconds(60),
        );
        assert!(!token.try_consume("wrong-secret"));
        assert_eq!(token.state, TokenState::Active);
    }

    #[test]
    fn expired_token_is_invalid() {
        let (token, secret) = ResumeToken::mint(
            "rt_1".into(),
            "s1".into(),
            "r1".into(),
            "tool_result".into(),
            chrono::Duration::seconds(-1),
        );
        assert!(!token.is_valid(&secret));
    }
}
