//! User–scope memberships: the `(user, scope, role)` triples that decide
//! who may touch which rows.
//!
//! Every function takes a `&Connection`. Passing a `rusqlite::Transaction`
//! makes the call part of that transaction; the caller stays responsible for
//! committing it.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use rusqlite::{Connection, Row, params_from_iter};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    Error,
    auth::Principal,
    database_id::{ScopeId, UserID},
    db::DbPool,
    error::StoreContext,
    role::Role,
    scope::{Scope, ScopeType, get_scope, scope_exists},
};

/// A user's role in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserScope {
    /// The member.
    pub user_id: UserID,
    /// The scope the user is a member of.
    pub scope_id: ScopeId,
    /// The user's role in the scope.
    pub role: Role,
    /// When the membership was first created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the role was last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A membership joined with the type of its scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeMembership {
    /// The scope the user is a member of.
    pub scope_id: ScopeId,
    /// Whether the scope is personal or belongs to a group.
    #[serde(rename = "type")]
    pub scope_type: ScopeType,
    /// The user's role in the scope.
    pub role: Role,
}

/// Insert the membership `(user_id, scope_id, role)`, or change the role if
/// the user is already a member of the scope.
///
/// # Errors
/// Returns [Error::NotFound] if the scope does not exist, or an error if the
/// user does not exist or the write fails.
pub fn upsert_user_scope(
    user_id: UserID,
    scope_id: ScopeId,
    role: Role,
    connection: &Connection,
) -> Result<UserScope, Error> {
    if !scope_exists(scope_id, connection)? {
        return Err(Error::NotFound);
    }

    let now = OffsetDateTime::now_utc();

    connection
        .query_row(
            "INSERT INTO user_scopes (user_id, scope_id, role, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (user_id, scope_id) DO UPDATE
                SET role = excluded.role, updated_at = excluded.updated_at
            RETURNING user_id, scope_id, role, created_at, updated_at",
            (user_id, scope_id, role, now),
            map_row,
        )
        .store_context("upsert membership")
}

/// Get the membership of `user_id` in `scope_id`.
///
/// # Errors
/// Returns [Error::NotFound] if the user is not a member of the scope.
pub fn get_user_scope(
    user_id: UserID,
    scope_id: ScopeId,
    connection: &Connection,
) -> Result<UserScope, Error> {
    connection
        .query_row(
            "SELECT user_id, scope_id, role, created_at, updated_at
            FROM user_scopes WHERE user_id = ?1 AND scope_id = ?2",
            (user_id, scope_id),
            map_row,
        )
        .store_context("get membership")
}

/// Whether `user_id` holds at least `required` in `scope_id`.
///
/// A user with no membership in the scope holds no role, so the result is
/// `false` rather than an error.
///
/// # Errors
/// Returns an error if the lookup fails for a reason other than a missing
/// membership.
pub fn validate_user_scope(
    user_id: UserID,
    scope_id: ScopeId,
    required: Role,
    connection: &Connection,
) -> Result<bool, Error> {
    match get_user_scope(user_id, scope_id, connection) {
        Ok(membership) => Ok(membership.role.satisfies(required)),
        Err(Error::NotFound) => Ok(false),
        Err(error) => Err(error),
    }
}

/// Get every membership of `user_id` whose role satisfies `required`.
///
/// # Errors
/// Returns an error if the query fails.
pub fn get_user_scopes_by_role(
    user_id: UserID,
    required: Role,
    connection: &Connection,
) -> Result<Vec<UserScope>, Error> {
    let roles = Role::satisfying(required);
    let placeholders = sql_placeholders(roles.len(), 2);
    let query = format!(
        "SELECT user_id, scope_id, role, created_at, updated_at
        FROM user_scopes
        WHERE user_id = ?1 AND role IN ({placeholders})
        ORDER BY scope_id ASC"
    );

    let mut params: Vec<rusqlite::types::Value> = vec![user_id.as_i64().into()];
    params.extend(roles.iter().map(|role| role.as_str().to_owned().into()));

    connection
        .prepare(&query)
        .store_context("get memberships by role")?
        .query_map(params_from_iter(params), map_row)
        .store_context("get memberships by role")?
        .map(|row| row.store_context("get memberships by role"))
        .collect()
}

/// List the scopes `user_id` belongs to, with each scope's type.
///
/// # Errors
/// Returns an error if the query fails.
pub fn get_scope_memberships_for_user(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<ScopeMembership>, Error> {
    connection
        .prepare(
            "SELECT us.scope_id, s.type, us.role
            FROM user_scopes us
            INNER JOIN scopes s ON s.id = us.scope_id
            WHERE us.user_id = ?1
            ORDER BY us.scope_id ASC",
        )
        .store_context("list scopes")?
        .query_map([user_id], |row| {
            Ok(ScopeMembership {
                scope_id: row.get(0)?,
                scope_type: row.get(1)?,
                role: row.get(2)?,
            })
        })
        .store_context("list scopes")?
        .map(|row| row.store_context("list scopes"))
        .collect()
}

/// Get every membership in `scope_id`, owner first.
///
/// # Errors
/// Returns an error if the query fails.
pub fn get_scope_members(
    scope_id: ScopeId,
    connection: &Connection,
) -> Result<Vec<UserScope>, Error> {
    connection
        .prepare(
            "SELECT user_id, scope_id, role, created_at, updated_at
            FROM user_scopes
            WHERE scope_id = ?1
            ORDER BY CASE role WHEN 'owner' THEN 0 WHEN 'write' THEN 1 ELSE 2 END, user_id",
        )
        .store_context("get scope members")?
        .query_map([scope_id], map_row)
        .store_context("get scope members")?
        .map(|row| row.store_context("get scope members"))
        .collect()
}

/// Remove `user_id` from `scope_id`.
///
/// # Errors
/// Returns [Error::NotFound] if the user was not a member of the scope.
pub fn delete_user_scope(
    user_id: UserID,
    scope_id: ScopeId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection
        .execute(
            "DELETE FROM user_scopes WHERE user_id = ?1 AND scope_id = ?2",
            (user_id, scope_id),
        )
        .store_context("delete membership")?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Remove every membership in `scope_id`, returning how many were removed.
///
/// # Errors
/// Returns an error if the delete fails.
pub fn delete_scope_memberships(scope_id: ScopeId, connection: &Connection) -> Result<usize, Error> {
    connection
        .execute("DELETE FROM user_scopes WHERE scope_id = ?1", [scope_id])
        .store_context("delete scope memberships")
}

/// Remove every membership held by `user_id`, returning how many were removed.
///
/// # Errors
/// Returns an error if the delete fails.
pub fn delete_user_memberships(user_id: UserID, connection: &Connection) -> Result<usize, Error> {
    connection
        .execute("DELETE FROM user_scopes WHERE user_id = ?1", [user_id])
        .store_context("delete user memberships")
}

/// Create the user_scopes membership table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_user_scope_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_scopes (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            scope_id INTEGER NOT NULL REFERENCES scopes(id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK (role IN ('view', 'write', 'owner')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (user_id, scope_id)
        );

        CREATE INDEX IF NOT EXISTS idx_user_scopes_scope ON user_scopes(scope_id);",
    )
}

/// Build `count` positional placeholders numbered from `first`, e.g.
/// `?2, ?3, ?4`.
pub(crate) fn sql_placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_row(row: &Row) -> Result<UserScope, rusqlite::Error> {
    Ok(UserScope {
        user_id: row.get(0)?,
        scope_id: row.get(1)?,
        role: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// A route handler for listing the scopes the current user belongs to and
/// their role in each.
pub async fn get_scopes_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<ScopeMembership>>, Error> {
    let connection = db_pool.get().await?;

    get_scope_memberships_for_user(principal.user_id, &connection).map(Json)
}

/// A route handler for getting a scope the current user belongs to.
pub async fn get_scope_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(scope_id): Path<ScopeId>,
) -> Result<Json<Scope>, Error> {
    let connection = db_pool.get().await?;

    if !validate_user_scope(principal.user_id, scope_id, Role::View, &connection)? {
        return Err(Error::NotFound);
    }

    get_scope(scope_id, &connection).map(Json)
}
