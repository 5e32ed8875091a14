//! Authentication middleware that validates bearer tokens against their sessions.

use std::sync::Arc;

use axum::{
    extract::{FromRef, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use uuid::Uuid;

use crate::{
    AppState, Error,
    auth::token::{TokenKeys, decode_token},
    database_id::UserID,
    session::SessionStore,
};

/// The authenticated user behind a request.
///
/// **Note**: Route handlers behind [auth_guard] can use the function argument
/// `Extension(principal): Extension<Principal>` to receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserID,
    /// The session the request's token belongs to.
    pub session_id: Uuid,
}

/// The state needed for the auth middleware
#[derive(Clone)]
pub struct AuthState {
    /// The keys for validating bearer tokens.
    pub token_keys: TokenKeys,
    /// Where log in sessions are kept.
    pub sessions: Arc<dyn SessionStore>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            token_keys: state.token_keys.clone(),
            sessions: state.sessions.clone(),
        }
    }
}

/// Middleware function that checks for a valid bearer token.
///
/// The [Principal] is placed into the request and the request executed
/// normally if the token is valid and its session is still live, otherwise a
/// 401 response is returned.
pub async fn auth_guard(State(state): State<AuthState>, mut request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return Error::Unauthenticated.into_response();
    };

    match authenticate(&state, &token).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|authorization| authorization.token().to_owned())
}

async fn authenticate(state: &AuthState, token: &str) -> Result<Principal, Error> {
    let claims = decode_token(token, &state.token_keys)?;
    let session = state.sessions.load(claims.sid).await?;

    if session.user_id != Some(claims.sub) {
        tracing::debug!("token for user {} has no live session", claims.sub);
        return Err(Error::Unauthenticated);
    }

    Ok(Principal {
        user_id: claims.sub,
        session_id: claims.sid,
    })
}
