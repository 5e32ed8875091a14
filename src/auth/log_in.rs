//! This file defines the route for handling log-in requests.
//!
//! A successful log in starts a session and returns a bearer token bound to it.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, State},
};
use serde::Deserialize;
use time::Duration;
use uuid::Uuid;

use crate::{
    AppState, Error,
    auth::{
        password::verify_password,
        token::{IssuedToken, TokenKeys, encode_token},
    },
    db::DbPool,
    session::{SessionState, SessionStore},
    user::get_user_by_username,
};

/// The state needed to perform a login.
#[derive(Clone)]
pub struct LogInState {
    pub db_pool: DbPool,
    pub sessions: Arc<dyn SessionStore>,
    /// The keys for signing bearer tokens.
    pub token_keys: TokenKeys,
    /// How long a token and its session stay valid.
    pub token_duration: Duration,
}

impl FromRef<AppState> for LogInState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_pool: state.db_pool.clone(),
            sessions: state.sessions.clone(),
            token_keys: state.token_keys.clone(),
            token_duration: state.token_duration,
        }
    }
}

/// The credentials sent to log in.
#[derive(Deserialize)]
pub struct LogInRequest {
    pub username: String,
    pub password: String,
}

/// Handler for log-in requests.
///
/// # Errors
///
/// This function will return an error in a few situations.
/// - The username does not exist or the password is not correct
///   ([Error::InvalidCredentials] in both cases).
/// - An internal error occurred when verifying the password or saving the
///   session.
pub async fn log_in_endpoint(
    State(state): State<LogInState>,
    Json(request): Json<LogInRequest>,
) -> Result<Json<IssuedToken>, Error> {
    let user = {
        let connection = state.db_pool.get().await?;
        get_user_by_username(request.username.trim(), &connection)
    };

    let user = match user {
        Ok(user) => user,
        Err(Error::NotFound) => return Err(Error::InvalidCredentials),
        Err(error) => return Err(error),
    };

    if !verify_password(user.password_hash.clone(), request.password).await? {
        tracing::info!("failed log in attempt for user {}", user.id);
        return Err(Error::InvalidCredentials);
    }

    let session_id = Uuid::new_v4();
    state
        .sessions
        .save(session_id, &SessionState::for_user(user.id), state.token_duration)
        .await?;

    let token = encode_token(user.id, session_id, state.token_duration, &state.token_keys)?;
    tracing::info!("user {} logged in", user.id);

    Ok(Json(token))
}
