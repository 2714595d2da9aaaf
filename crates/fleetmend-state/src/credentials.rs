//! redb-backed user lookup for the status front end.
//!
//! Passwords are stored as hex-encoded SHA-256 digests. A lookup with an
//! unknown user or a wrong password yields level 0, which callers treat as
//! "not authenticated".

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::USERS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct UserRecord {
    password_hash: String,
    user_level: u32,
}

/// Thread-safe credential store backed by redb.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    /// Open (or create) a persistent credential store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "credential store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace a user.
    pub fn put_user(&self, username: &str, password: &str, user_level: u32) -> StateResult<()> {
        if username.trim().is_empty() {
            return Err(StateError::InvalidUser("username must not be empty".into()));
        }
        if user_level == 0 {
            return Err(StateError::InvalidUser("user level must be at least 1".into()));
        }

        let record = UserRecord {
            password_hash: hash_password(password),
            user_level,
        };
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(USERS).map_err(map_err!(Table))?;
            table
                .insert(username, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%username, user_level, "user stored");
        Ok(())
    }

    /// Level of the user if the password matches, otherwise 0.
    pub fn user_level(&self, username: &str, password: &str) -> StateResult<u32> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        let Some(guard) = table.get(username).map_err(map_err!(Read))? else {
            return Ok(0);
        };
        let record: UserRecord =
            serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
        if record.password_hash == hash_password(password) {
            Ok(record.user_level)
        } else {
            Ok(0)
        }
    }

    /// Delete a user. Returns true if it existed.
    pub fn delete_user(&self, username: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(USERS).map_err(map_err!(Table))?;
            existed = table.remove(username).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// All stored usernames, in key order.
    pub fn list_usernames(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
