use axum::{Extension, extract::State, http::StatusCode};

use crate::{
    Error,
    auth::middleware::{AuthState, Principal},
};

/// Invalidate the session behind the caller's token.
///
/// The token itself stays well-formed until it expires, but the auth guard
/// rejects it once its session is gone.
pub async fn log_out_endpoint(
    State(state): State<AuthState>,
    Extension(principal): Extension<Principal>,
) -> Result<StatusCode, Error> {
    state.sessions.remove(principal.session_id).await?;
    tracing::info!("user {} logged out", principal.user_id);

    Ok(StatusCode::NO_CONTENT)
}
