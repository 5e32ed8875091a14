//! Implements a struct that holds the state of the REST server.

use std::sync::Arc;

use axum::extract::FromRef;
use time::Duration;

use crate::{
    auth::{DEFAULT_TOKEN_DURATION, PasswordHash, TokenKeys},
    db::DbPool,
    pagination::PaginationConfig,
    session::SessionStore,
};

/// The state of the REST server.
///
/// Built once at start up and cloned into every request. The pools inside
/// are reference counted, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The relational store.
    pub db_pool: DbPool,

    /// Where log in sessions are kept.
    pub sessions: Arc<dyn SessionStore>,

    /// The keys for signing and validating bearer tokens.
    pub token_keys: TokenKeys,

    /// How long tokens and their sessions stay valid.
    pub token_duration: Duration,

    /// The bcrypt cost for new password hashes.
    pub password_hash_cost: u32,

    /// The config that controls how to page lists of data.
    pub pagination_config: PaginationConfig,
}

impl AppState {
    /// Create a new [AppState] with the default token lifetime, hash cost and
    /// page sizes.
    pub fn new(db_pool: DbPool, sessions: Arc<dyn SessionStore>, token_secret: &str) -> Self {
        Self {
            db_pool,
            sessions,
            token_keys: TokenKeys::from_secret(token_secret),
            token_duration: DEFAULT_TOKEN_DURATION,
            password_hash_cost: PasswordHash::DEFAULT_COST,
            pagination_config: PaginationConfig::default(),
        }
    }

    /// Set how long tokens stay valid.
    pub fn with_token_duration(mut self, token_duration: Duration) -> Self {
        self.token_duration = token_duration;
        self
    }

    /// Set the bcrypt cost for new password hashes.
    pub fn with_password_hash_cost(mut self, cost: u32) -> Self {
        self.password_hash_cost = cost;
        self
    }
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.db_pool.clone()
    }
}

/// Build an [AppState] over a fresh in-memory database and session store,
/// with the minimum hash cost so tests stay fast.
#[cfg(test)]
pub async fn create_test_app_state() -> AppState {
    use crate::{auth::TEST_TOKEN_SECRET, session::MemorySessionStore};

    let db_pool = DbPool::open_in_memory()
        .await
        .expect("could not open in-memory database");

    AppState::new(db_pool, Arc::new(MemorySessionStore::new()), TEST_TOKEN_SECRET)
        .with_password_hash_cost(PasswordHash::MIN_COST)
}
