//! In-memory session tokens.
//!
//! Tokens live for the lifetime of the process and are never persisted, so
//! a restart logs everyone out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Length in bytes of a token before hex encoding.
const TOKEN_BYTES: usize = 20;

/// Maps issued tokens to the user level they were issued for.
#[derive(Clone, Default)]
pub struct TokenRegistry {
    inner: Arc<RwLock<HashMap<String, u32>>>,
}

impl TokenRegistry {
    /// Issue a fresh 40-character hex token for `user_level`.
    pub async fn issue(&self, user_level: u32) -> Result<String, getrandom::Error> {
        let mut bytes = [0u8; TOKEN_BYTES];
        getrandom::getrandom(&mut bytes)?;
        let token = hex::encode(bytes);
        self.inner.write().await.insert(token.clone(), user_level);
        Ok(token)
    }

    /// Level bound to `token`, or 0 when unknown.
    pub async fn level(&self, token: &str) -> u32 {
        self.inner.read().await.get(token).copied().unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
