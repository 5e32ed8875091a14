//! Users: the user table, the user lifecycle and the `/users/me` routes.
//!
//! Creating a user also creates their personal scope and makes them its
//! owner. Deleting a user tears down that scope, every group they own, and
//! every membership they hold.

use std::fmt::Display;

use axum::{
    Extension, Json,
    extract::{FromRef, State},
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    auth::{PasswordHash, Principal},
    database_id::{ScopeId, UserID},
    db::{DbPool, with_transaction},
    error::StoreContext,
    group::{delete_group_records, get_groups_owned_by},
    membership::{delete_user_memberships, upsert_user_scope},
    role::Role,
    scope::{ScopeType, create_scope, delete_scope},
    session::SessionStore,
};

/// The currency used when a user does not pick one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// An email address.
///
/// Only the presence of an `@` is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// Create and validate an email address.
    ///
    /// # Errors
    /// Returns [Error::InvalidInput] if `raw_email` does not contain an `@`.
    pub fn new(raw_email: &str) -> Result<Self, Error> {
        let raw_email = raw_email.trim();

        if raw_email.contains('@') {
            Ok(Self(raw_email.to_owned()))
        } else {
            Err(Error::InvalidInput(format!(
                "\"{raw_email}\" is not a valid email address"
            )))
        }
    }

    /// Create an email address without validation, e.g. when reading from the database.
    pub fn new_unchecked(raw_email: &str) -> Self {
        Self(raw_email.to_owned())
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a username: trimmed, non-empty and at most 64 characters.
///
/// # Errors
/// Returns [Error::InvalidInput] if the username is empty or too long.
pub fn validate_username(raw_username: &str) -> Result<String, Error> {
    let username = raw_username.trim();

    if username.is_empty() {
        return Err(Error::InvalidInput("username cannot be empty".to_owned()));
    }

    if username.chars().count() > 64 {
        return Err(Error::InvalidInput(
            "username is longer than 64 characters".to_owned(),
        ));
    }

    Ok(username.to_owned())
}

/// Validate a currency code: three ASCII letters, stored upper case.
///
/// # Errors
/// Returns [Error::InvalidInput] for anything else.
pub fn validate_currency(raw_currency: &str) -> Result<String, Error> {
    let currency = raw_currency.trim();

    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(currency.to_ascii_uppercase())
    } else {
        Err(Error::InvalidInput(format!(
            "\"{currency}\" is not a three letter currency code"
        )))
    }
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    /// The user's ID in the application database.
    pub id: UserID,
    /// The unique name the user logs in with.
    pub username: String,
    /// The user's unique email address.
    pub email: Email,
    /// The name shown to other users.
    pub name: String,
    /// The currency the user prefers amounts shown in.
    pub currency: String,
    /// The user's password hash.
    #[serde(skip)]
    pub password_hash: PasswordHash,
    /// The user's personal scope.
    pub scope_id: Option<ScopeId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The validated fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Email,
    pub name: String,
    pub currency: String,
    pub password_hash: PasswordHash,
}

/// Create the user table.
///
/// # Errors
/// This function will return an error if the SQL query failed.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT '',
            currency TEXT NOT NULL DEFAULT 'USD',
            password_hash TEXT NOT NULL,
            scope_id INTEGER REFERENCES scopes(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )
}

const USER_COLUMNS: &str =
    "id, username, email, name, currency, password_hash, scope_id, created_at, updated_at";

/// Create a user together with their personal scope and owner membership.
///
/// Runs in one transaction, joining the caller's if there is one.
///
/// # Errors
/// Returns [Error::Conflict] if the username or email is already taken, or a
/// store error if any write fails.
pub fn create_user(new_user: NewUser, connection: &Connection) -> Result<User, Error> {
    with_transaction(connection, |tx| {
        ensure_user_is_unique(&new_user.username, &new_user.email, tx)?;

        let now = OffsetDateTime::now_utc();
        tx.execute(
            "INSERT INTO users (username, email, name, currency, password_hash, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            (
                &new_user.username,
                new_user.email.as_ref(),
                &new_user.name,
                &new_user.currency,
                new_user.password_hash.as_ref(),
                now,
            ),
        )
        .store_context("insert user")?;
        let user_id = UserID::new(tx.last_insert_rowid());

        let scope = create_scope(ScopeType::User, tx)?;
        upsert_user_scope(user_id, scope.id, Role::Owner, tx)?;
        tx.execute(
            "UPDATE users SET scope_id = ?1 WHERE id = ?2",
            (scope.id, user_id),
        )
        .store_context("set personal scope")?;

        Ok(User {
            id: user_id,
            username: new_user.username,
            email: new_user.email,
            name: new_user.name,
            currency: new_user.currency,
            password_hash: new_user.password_hash,
            scope_id: Some(scope.id),
            created_at: now,
            updated_at: now,
        })
    })
}

/// Fail with [Error::Conflict] if `username` or `email` belongs to a user.
///
/// # Errors
/// Returns [Error::Conflict] naming the field that is taken.
pub fn ensure_user_is_unique(
    username: &str,
    email: &Email,
    connection: &Connection,
) -> Result<(), Error> {
    let taken: Option<(String, String)> = connection
        .query_row(
            "SELECT username, email FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
            (username, email.as_ref()),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .store_context("check user is unique")?;

    match taken {
        Some((taken_username, _)) if taken_username == username => {
            Err(Error::Conflict("username".to_owned()))
        }
        Some(_) => Err(Error::Conflict("email".to_owned())),
        None => Ok(()),
    }
}

/// Get the user with `user_id`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such user.
pub fn get_user_by_id(user_id: UserID, connection: &Connection) -> Result<User, Error> {
    connection
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [user_id],
            map_row,
        )
        .store_context("get user")
}

/// Get the user with `username`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such user.
pub fn get_user_by_username(username: &str, connection: &Connection) -> Result<User, Error> {
    connection
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            [username],
            map_row,
        )
        .store_context("get user by username")
}

/// Get the personal scope of `user_id`.
///
/// # Errors
/// Returns [Error::NotFound] if the user does not exist or has no personal
/// scope.
pub fn get_personal_scope(user_id: UserID, connection: &Connection) -> Result<ScopeId, Error> {
    connection
        .query_row("SELECT scope_id FROM users WHERE id = ?1", [user_id], |row| {
            row.get::<_, Option<ScopeId>>(0)
        })
        .store_context("get personal scope")?
        .ok_or(Error::NotFound)
}

/// Update the display name and currency of `user_id`, leaving fields that are
/// `None` unchanged.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such user.
pub fn update_user_profile(
    user_id: UserID,
    name: Option<&str>,
    currency: Option<&str>,
    connection: &Connection,
) -> Result<User, Error> {
    let rows_affected = connection
        .execute(
            "UPDATE users
            SET name = COALESCE(?1, name), currency = COALESCE(?2, currency), updated_at = ?3
            WHERE id = ?4",
            (name, currency, OffsetDateTime::now_utc(), user_id),
        )
        .store_context("update user")?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    get_user_by_id(user_id, connection)
}

/// Delete `user_id` along with their personal scope, the groups they own and
/// all their memberships.
///
/// Data rows in the deleted scopes go with them. Rows the user created in
/// other users' scopes stay, with their creator cleared.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such user, or a store error if any
/// write fails.
pub fn delete_user(user_id: UserID, connection: &Connection) -> Result<(), Error> {
    with_transaction(connection, |tx| {
        let user = get_user_by_id(user_id, tx)?;

        for group in get_groups_owned_by(user_id, tx)? {
            delete_group_records(&group, tx)?;
        }

        delete_user_memberships(user_id, tx)?;

        if let Some(scope_id) = user.scope_id {
            delete_scope(scope_id, tx)?;
        }

        tx.execute("DELETE FROM users WHERE id = ?1", [user_id])
            .store_context("delete user")?;

        Ok(())
    })
}

fn map_row(row: &Row) -> Result<User, rusqlite::Error> {
    let raw_email: String = row.get(2)?;
    let raw_password_hash: String = row.get(5)?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: Email::new_unchecked(&raw_email),
        name: row.get(3)?,
        currency: row.get(4)?,
        password_hash: PasswordHash::new_unchecked(&raw_password_hash),
        scope_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// The state needed for deleting the current user.
#[derive(Clone)]
pub struct DeleteUserState {
    pub db_pool: DbPool,
    pub sessions: std::sync::Arc<dyn SessionStore>,
}

impl FromRef<AppState> for DeleteUserState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_pool: state.db_pool.clone(),
            sessions: state.sessions.clone(),
        }
    }
}

/// The fields of the current user that can be changed.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub currency: Option<String>,
}

/// A route handler for getting the current user.
pub async fn get_current_user_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<User>, Error> {
    let connection = db_pool.get().await?;

    get_user_by_id(principal.user_id, &connection).map(Json)
}

/// A route handler for updating the current user's name and currency.
pub async fn update_current_user_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<User>, Error> {
    let name = request.name.as_deref().map(str::trim);
    let currency = request.currency.as_deref().map(validate_currency).transpose()?;

    let connection = db_pool.get().await?;

    update_user_profile(principal.user_id, name, currency.as_deref(), &connection).map(Json)
}

/// A route handler for deleting the current user and ending their session.
pub async fn delete_current_user_endpoint(
    State(state): State<DeleteUserState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, Error> {
    {
        let connection = state.db_pool.get().await?;
        delete_user(principal.user_id, &connection)?;
    }

    state.sessions.remove(principal.session_id).await?;
    tracing::info!("deleted user {}", principal.user_id);

    Ok(Json(json!({ "id": principal.user_id })))
}


#[cfg(test)]
mod tests {
    use crate::{
        Error,
        auth::PasswordHash,
        db::get_test_connection,
        membership::{get_user_scope, get_user_scopes_by_role},
        role::Role,
        scope::{ScopeType, get_scope, scope_exists},
    };

    use super::{
        DEFAULT_CURRENCY, Email, NewUser, create_user, delete_user, get_personal_scope,
        get_user_by_id, get_user_by_username, test_utils::create_test_user, update_user_profile,
        validate_currency, validate_username,
    };

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_owned(),
            email: Email::new_unchecked(email),
            name: String::new(),
            currency: DEFAULT_CURRENCY.to_owned(),
            password_hash: PasswordHash::new_unchecked("hash"),
        }
    }

    #[test]
    fn email_only_needs_an_at_sign() {
        assert!(Email::new("a@x").is_ok());
        assert!(matches!(Email::new("ax"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn username_is_trimmed_and_required() {
        assert_eq!(validate_username("  alice "), Ok("alice".to_owned()));
        assert!(matches!(validate_username("   "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn currency_is_upper_cased() {
        assert_eq!(validate_currency("nzd"), Ok("NZD".to_owned()));
        assert!(validate_currency("dollars").is_err());
    }

    #[test]
    fn create_user_installs_personal_scope_owner() {
        let connection = get_test_connection();

        let user = create_user(new_user("alice", "a@x"), &connection).unwrap();

        let scope_id = user.scope_id.expect("user should have a personal scope");
        assert_eq!(get_personal_scope(user.id, &connection), Ok(scope_id));
        assert_eq!(
            get_scope(scope_id, &connection).unwrap().scope_type,
            ScopeType::User
        );
        assert_eq!(
            get_user_scope(user.id, scope_id, &connection).unwrap().role,
            Role::Owner
        );
        assert_eq!(get_user_scopes_by_role(user.id, Role::View, &connection).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_username_or_email_conflicts() {
        let connection = get_test_connection();
        create_user(new_user("alice", "a@x"), &connection).unwrap();

        assert_eq!(
            create_user(new_user("alice", "other@x"), &connection).map(|_| ()),
            Err(Error::Conflict("username".to_owned()))
        );
        assert_eq!(
            create_user(new_user("bob", "a@x"), &connection).map(|_| ()),
            Err(Error::Conflict("email".to_owned()))
        );
    }

    #[test]
    fn failed_create_leaves_no_scope_behind() {
        let connection = get_test_connection();
        create_user(new_user("alice", "a@x"), &connection).unwrap();

        let _ = create_user(new_user("alice", "a@x"), &connection);

        let scope_count: i64 = connection
            .query_row("SELECT COUNT(*) FROM scopes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(scope_count, 1);
    }

    #[test]
    fn get_user_by_username_finds_user() {
        let connection = get_test_connection();
        let want = create_test_user("alice", &connection);

        assert_eq!(get_user_by_username("alice", &connection).unwrap().id, want.id);
        assert_eq!(get_user_by_username("bob", &connection), Err(Error::NotFound));
    }

    #[test]
    fn update_profile_keeps_unset_fields() {
        let connection = get_test_connection();
        let user = create_test_user("alice", &connection);

        let updated = update_user_profile(user.id, None, Some("EUR"), &connection).unwrap();

        assert_eq!(updated.name, user.name);
        assert_eq!(updated.currency, "EUR");
    }

    #[test]
    fn delete_user_removes_scope_and_memberships() {
        let connection = get_test_connection();
        let user = create_test_user("alice", &connection);
        let scope_id = user.scope_id.unwrap();

        delete_user(user.id, &connection).unwrap();

        assert_eq!(get_user_by_id(user.id, &connection), Err(Error::NotFound));
        assert_eq!(scope_exists(scope_id, &connection), Ok(false));
        let membership_count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM user_scopes WHERE user_id = ?1",
                [user.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(membership_count, 0);
    }

    #[test]
    fn delete_missing_user_is_not_found() {
        let connection = get_test_connection();

        assert_eq!(
            delete_user(crate::database_id::UserID::new(99), &connection),
            Err(Error::NotFound)
        );
    }
}
