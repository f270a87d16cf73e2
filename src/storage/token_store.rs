//! Token index: `sessions/<id>.tokens.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{OrbitMeshError, Result};
use crate::model::{ResumeToken, TokenState};

use super::atomic_write;

/// Per-session resume-token index, serialized as a single JSON map.
///
/// All mutations happen under a single in-process mutex — there is exactly
/// one `TokenStore` per session, owned by its coordinator.
pub struct TokenStore {
    path: PathBuf,
    tokens: Mutex<HashMap<String, ResumeToken>>,
}

impl TokenStore {
    /// Loads (or creates empty) the token index for `session_id` under `dir`.
    pub fn open(dir: &Path, session_id: &str) -> Result<Self> {
        let path = dir.join(format!("{session_id}.tokens.json"));
        let tokens = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)
                .map_err(|e| OrbitMeshError::Parse(format!("corrupt token index: {e}")))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            tokens: Mutex::new(tokens),
        })
    }

    fn flush(&self, tokens: &HashMap<String, ResumeToken>) -> Result<()> {
        let contents = serde_json::to_vec_pretty(tokens)
            .map_err(|e| OrbitMeshError::Parse(format!("failed to encode token index: {e}")))?;
        atomic_write(&self.path, &contents)?;
        Ok(())
    }

    /// Inserts a newly minted token.
    pub fn insert(&self, token: ResumeToken) -> Result<()> {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        tokens.insert(token.token_id.clone(), token);
        self.flush(&tokens)
    }

    /// Looks up a token by id.
    pub fn get(&self, token_id: &str) -> Option<ResumeToken> {
        self.tokens
            .lock()
            .expect("token store mutex poisoned")
            .get(token_id)
            .cloned()
    }

    /// Attempts to consume `token_id` with the given secret. Returns
    /// `Ok(true)` exactly once per token — subsequent calls (even
    /// concurrent ones, since this runs under the store's mutex) see a
    /// `TokenAlreadyConsumed`/`InvalidToken` error and no state change.
    pub fn consume(&self, token_id: &str, secret: &str) -> Result<ResumeToken> {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| OrbitMeshError::InvalidToken(token_id.to_string()))?;

        if token.state != TokenState::Active {
            return Err(OrbitMeshError::TokenAlreadyConsumed);
        }
        if !token.try_consume(secret) {
            return Err(OrbitMeshError::InvalidToken(token_id.to_string()));
        }
        let consumed = token.clone();
        self.flush(&tokens)?;
        Ok(consumed)
    }

    /// Marks a token revoked (e.g. its run was cancelled while waiting).
    pub fn revoke(&self, token_id: &str) -> Result<()> {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        if let Some(token) = tokens.get_mut(token_id) {
            if token.state == TokenState::Active {
                token.state = TokenState::Revoked;
            }
        }
        self.flush(&tokens)
    }

    /// Marks a token expired (recovery sweep found a stale wait).
    pub fn expire(&self, token_id: &str) -> Result<()> {
        let mut tokens = self.tokens.lock().expect("token store mutex poisoned");
        if let Some(token) = tokens.get_mut(token_id) {
            if token.state == TokenState::Active {
                token.state = TokenState::Expired;
            }
        }
        self.flush(&tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minted(dir: &Path) -> (TokenStore, String, String) {
        let store = TokenStore::open(dir, "s1").unwrap();
        let (token, secret) = ResumeToken::mint(
            "rt_1".into(),
            "s1".into(),
            "r1".into(),
            "tool_result".into(),
            chrono::Duration::seconds(60),
        );
        store.insert(token).unwrap();
        (store, "rt_1".into(), secret)
    }

    #[test]
    fn concurrent_double_consume_only_one_wins() {
        let dir = TempDir::new().unwrap();
        let (store, token_id, secret) = minted(dir.path());

        let first = store.consume(&token_id, &secret);
        let second = store.consume(&token_id, &secret);

        assert!(first.is_ok());
        assert!(matches!(second, Err(OrbitMeshError::TokenAlreadyConsumed)));
    }

    #[test]
    fn reopening_preserves_state() {
        let dir = TempDir::new().unwrap();
        let (store, token_id, secret) = minted(dir.path());
        store.consume(&token_id, &secret).unwrap();
        drop(store);

        let reopened = TokenStore::open(dir.path(), "s1").unwrap();
        let token = reopened.get(&token_id).unwrap();
        assert_eq!(token.state, TokenState::Consumed);
    }

    #[test]
    fn revoke_is_idempotent_once_consumed() {
        let dir = TempDir::new().unwrap();
        let (store, token_id, secret) = minted(dir.path());
        store.consume(&token_id, &secret).unwrap();
        store.revoke(&token_id).unwrap();
        let token = store.get(&token_id).unwrap();
        assert_eq!(token.state, TokenState::Consumed);
    }
}
