//! Key–value storage for log in sessions.
//!
//! A bearer token names a session. The session must still exist and belong
//! to the token's user for the token to be accepted, which lets log out end a
//! token before it expires.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bb8_redis::{RedisConnectionManager, bb8, redis};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Error, database_id::UserID};

/// What is stored for a session.
///
/// A session that was never created, has expired, or was removed loads as the
/// default, empty state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// The user the session was created for.
    pub user_id: Option<UserID>,
    /// When the session was created.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl SessionState {
    /// A session for `user_id` created now.
    pub fn for_user(user_id: UserID) -> Self {
        Self {
            user_id: Some(user_id),
            created_at: Some(OffsetDateTime::now_utc()),
        }
    }

    /// Whether the session belongs to no one.
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Storage for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session `session_id`, or an empty state if there is none.
    async fn load(&self, session_id: Uuid) -> Result<SessionState, Error>;

    /// Store `state` under `session_id` for `ttl`.
    async fn save(&self, session_id: Uuid, state: &SessionState, ttl: Duration) -> Result<(), Error>;

    /// Remove the session `session_id`. Removing a missing session is not an error.
    async fn remove(&self, session_id: Uuid) -> Result<(), Error>;
}

/// Sessions held in process memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, (SessionState, OffsetDateTime)>>>,
}

impl MemorySessionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: Uuid) -> Result<SessionState, Error> {
        let sessions = self.sessions.read().await;

        Ok(match sessions.get(&session_id) {
            Some((state, expires_at)) if *expires_at > OffsetDateTime::now_utc() => state.clone(),
            _ => SessionState::default(),
        })
    }

    async fn save(&self, session_id: Uuid, state: &SessionState, ttl: Duration) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;

        sessions.retain(|_, (_, expires_at)| *expires_at > now);
        sessions.insert(session_id, (state.clone(), now + ttl));

        Ok(())
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), Error> {
        self.sessions.write().await.remove(&session_id);

        Ok(())
    }
}

/// Sessions held in Redis, as JSON values under `session:<id>` keys.
#[derive(Clone)]
pub struct RedisSessionStore {
    pool: bb8::Pool<RedisConnectionManager>,
}

impl RedisSessionStore {
    /// Connect a pool of `pool_size` connections to the Redis server at `url`.
    ///
    /// # Errors
    /// Returns [Error::SessionStore] if the URL is invalid or the pool cannot
    /// connect.
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, Error> {
        let manager = RedisConnectionManager::new(url).map_err(session_error("open redis"))?;
        let pool = bb8::Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(crate::db::CONNECT_TIMEOUT)
            .build(manager)
            .await
            .map_err(session_error("build redis pool"))?;

        Ok(Self { pool })
    }

    fn key(session_id: Uuid) -> String {
        format!("session:{session_id}")
    }
}

fn session_error<E: std::fmt::Display>(operation: &'static str) -> impl Fn(E) -> Error {
    move |error| {
        tracing::error!("session store operation \"{operation}\" failed: {error}");
        Error::SessionStore(format!("{operation}: {error}"))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: Uuid) -> Result<SessionState, Error> {
        let mut connection = self.pool.get().await.map_err(session_error("get redis connection"))?;

        let value: Option<String> = redis::cmd("GET")
            .arg(Self::key(session_id))
            .query_async(&mut *connection)
            .await
            .map_err(session_error("load session"))?;

        match value {
            Some(json) => serde_json::from_str(&json).map_err(session_error("decode session")),
            None => Ok(SessionState::default()),
        }
    }

    async fn save(&self, session_id: Uuid, state: &SessionState, ttl: Duration) -> Result<(), Error> {
        let json = serde_json::to_string(state).map_err(session_error("encode session"))?;
        let ttl_seconds = ttl.whole_seconds().max(1);
        let mut connection = self.pool.get().await.map_err(session_error("get redis connection"))?;

        let _: () = redis::cmd("SET")
            .arg(Self::key(session_id))
            .arg(json)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut *connection)
            .await
            .map_err(session_error("save session"))?;

        Ok(())
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), Error> {
        let mut connection = self.pool.get().await.map_err(session_error("get redis connection"))?;

        let _: () = redis::cmd("DEL")
            .arg(Self::key(session_id))
            .query_async(&mut *connection)
            .await
            .map_err(session_error("remove session"))?;

        Ok(())
    }
}
