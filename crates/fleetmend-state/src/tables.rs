//! redb table definitions for the credential store.

use redb::TableDefinition;

/// User records keyed by username.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
