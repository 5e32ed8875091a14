//! The route for registering a new user.

use axum::{
    Json,
    extract::{FromRef, State},
};
use serde::Deserialize;

use crate::{
    AppState, Error,
    auth::password::{ValidatedPassword, hash_password},
    db::DbPool,
    user::{
        DEFAULT_CURRENCY, Email, NewUser, User, create_user, ensure_user_is_unique,
        validate_currency, validate_username,
    },
};

/// The state needed to register a user.
#[derive(Clone)]
pub struct RegisterState {
    pub db_pool: DbPool,
    /// The bcrypt cost for new password hashes.
    pub password_hash_cost: u32,
}

impl FromRef<AppState> for RegisterState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_pool: state.db_pool.clone(),
            password_hash_cost: state.password_hash_cost,
        }
    }
}

/// The fields sent to register.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// A route handler for creating a new user.
///
/// The new user gets a personal scope that they own.
///
/// # Errors
/// Returns [Error::InvalidInput] for invalid fields and [Error::Conflict] if
/// the username or email is taken.
pub async fn register_endpoint(
    State(state): State<RegisterState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<User>, Error> {
    let username = validate_username(&request.username)?;
    let email = Email::new(&request.email)?;
    let password = ValidatedPassword::new(&request.password)?;
    let currency = match request.currency.as_deref() {
        Some(currency) => validate_currency(currency)?,
        None => DEFAULT_CURRENCY.to_owned(),
    };
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_owned();

    {
        let connection = state.db_pool.get().await?;
        ensure_user_is_unique(&username, &email, &connection)?;
    }

    let password_hash = hash_password(password, state.password_hash_cost).await?;

    let connection = state.db_pool.get().await?;
    let user = create_user(
        NewUser {
            username,
            email,
            name,
            currency,
            password_hash,
        },
        &connection,
    )?;

    tracing::info!("registered user {}", user.id);

    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use axum::{Router, routing::post};
    use axum_test::TestServer;
    use serde_json::json;

    use crate::{
        AppState,
        app_state::create_test_app_state,
        membership::get_user_scope,
        role::Role,
        user::get_user_by_username,
    };

    use super::register_endpoint;

    async fn get_test_server() -> (TestServer, AppState) {
        let state = create_test_app_state().await;
        let app = Router::new()
            .route("/auth/register", post(register_endpoint))
            .with_state(state.clone());

        (TestServer::new(app).expect("Could not create test server."), state)
    }

    #[tokio::test]
    async fn register_creates_user_with_personal_scope() {
        let (server, state) = get_test_server().await;

        let response = server
            .post("/auth/register")
            .json(&json!({ "username": "alice", "email": "a@x", "password": "p" }))
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["username"], "alice");
        assert_eq!(body["currency"], "USD");
        assert!(body.get("password_hash").is_none());

        let connection = state.db_pool.get().await.unwrap();
        let user = get_user_by_username("alice", &connection).unwrap();
        let scope_id = user.scope_id.unwrap();
        assert_eq!(
            get_user_scope(user.id, scope_id, &connection).unwrap().role,
            Role::Owner
        );
        assert!(user.password_hash.verify("p").unwrap());
    }

    #[tokio::test]
    async fn register_rejects_duplicate_username() {
        let (server, _) = get_test_server().await;
        server
            .post("/auth/register")
            .json(&json!({ "username": "alice", "email": "a@x", "password": "p" }))
            .await
            .assert_status_ok();

        server
            .post("/auth/register")
            .json(&json!({ "username": "alice", "email": "b@x", "password": "p" }))
            .await
            .assert_status(axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn register_rejects_empty_password() {
        let (server, _) = get_test_server().await;

        server
            .post("/auth/register")
            .json(&json!({ "username": "alice", "email": "a@x", "password": "" }))
            .await
            .assert_status_bad_request();
    }
}
