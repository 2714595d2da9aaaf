//! fleetmend-api — HTTP status front end for the fleet checker.
//!
//! Operators log in with a username and password, receive an in-memory
//! session token, and poll the latest fleet snapshot with it.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Liveness text with a `server-version` header |
//! | GET | `/healthcheck` | `server version <v>` |
//! | POST | `/auth` | Form login, returns a session token |
//! | GET | `/check?token=` | Latest fleet snapshot as JSON |

pub mod handlers;
pub mod tokens;

use axum::Router;
use axum::routing::{get, post};

use fleetmend_state::{CredentialStore, SnapshotReader};

pub use tokens::TokenRegistry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub snapshots: SnapshotReader,
    pub credentials: CredentialStore,
    pub tokens: TokenRegistry,
    pub version: String,
}

impl ApiState {
    pub fn new(snapshots: SnapshotReader, credentials: CredentialStore, version: &str) -> Self {
        Self {
            snapshots,
            credentials,
            tokens: TokenRegistry::default(),
            version: version.to_string(),
        }
    }
}

/// Build the complete front-end router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/auth", post(handlers::authenticate))
        .route("/check", get(handlers::check))
        .with_state(state)
}
