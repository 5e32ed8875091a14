//! Money sources, e.g. a bank account, a credit card or a wallet.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use rusqlite::{Connection, Row, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    Error,
    auth::Principal,
    database_id::{ScopeId, SourceId, UserID},
    db::{DbPool, with_transaction},
    error::StoreContext,
    resolver::{ScopeResolver, ScopeSet, ScopedTable},
    role::Role,
    transaction::{TransactionReference, check_scope_move},
};

/// The name of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceName(String);

impl SourceName {
    /// Create a source name.
    ///
    /// # Errors
    /// Returns [Error::InvalidInput] if `name` is empty after trimming.
    pub fn new(name: &str) -> Result<Self, Error> {
        let name = name.trim();

        if name.is_empty() {
            Err(Error::InvalidInput("source name cannot be empty".to_owned()))
        } else {
            Ok(Self(name.to_owned()))
        }
    }
}

impl AsRef<str> for SourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where money comes from or goes to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: SourceId,
    /// The scope that owns the source.
    pub scope_id: ScopeId,
    /// The user who created the source, if they still exist.
    pub user_id: Option<UserID>,
    pub name: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Create the sources table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_source_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY,
            scope_id INTEGER NOT NULL REFERENCES scopes(id) ON DELETE CASCADE,
            user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sources_scope ON sources(scope_id);",
    )
}

const SOURCE_COLUMNS: &str = "id, scope_id, user_id, name, description, created_at, updated_at";

/// Create a source in `scope_id`, recording `creator`.
///
/// # Errors
/// Returns an error if the insert fails.
pub fn create_source(
    scope_id: ScopeId,
    creator: UserID,
    name: SourceName,
    description: &str,
    connection: &Connection,
) -> Result<Source, Error> {
    let now = OffsetDateTime::now_utc();

    connection
        .execute(
            "INSERT INTO sources (scope_id, user_id, name, description, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            (scope_id, creator, name.as_ref(), description, now),
        )
        .store_context("create source")?;

    Ok(Source {
        id: connection.last_insert_rowid(),
        scope_id,
        user_id: Some(creator),
        name: name.0,
        description: description.to_owned(),
        created_at: now,
        updated_at: now,
    })
}

/// Get the source with `source_id`. Callers must check access first.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such source.
pub fn get_source(source_id: SourceId, connection: &Connection) -> Result<Source, Error> {
    connection
        .query_row(
            &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
            [source_id],
            map_row,
        )
        .store_context("get source")
}

/// Get every source in `scopes`, by name.
///
/// # Errors
/// Returns an error if the query fails.
pub fn get_sources_in(scopes: &ScopeSet, connection: &Connection) -> Result<Vec<Source>, Error> {
    if scopes.is_empty() {
        return Ok(Vec::new());
    }

    connection
        .prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE scope_id IN ({}) ORDER BY name ASC, id ASC",
            scopes.placeholders(1)
        ))
        .store_context("list sources")?
        .query_map(params_from_iter(scopes.sql_values()), map_row)
        .store_context("list sources")?
        .map(|row| row.store_context("list sources"))
        .collect()
}

/// Update the source, moving it to `scope_id`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such source, or
/// [Error::InvalidInput] if transactions in another scope draw on it.
pub fn update_source(
    source_id: SourceId,
    scope_id: ScopeId,
    name: SourceName,
    description: &str,
    connection: &Connection,
) -> Result<Source, Error> {
    with_transaction(connection, |tx| {
        check_scope_move(TransactionReference::Source, source_id, scope_id, tx)?;

        let rows_affected = tx
            .execute(
                "UPDATE sources SET scope_id = ?1, name = ?2, description = ?3, updated_at = ?4
                WHERE id = ?5",
                (scope_id, name.as_ref(), description, OffsetDateTime::now_utc(), source_id),
            )
            .store_context("update source")?;

        if rows_affected == 0 {
            return Err(Error::NotFound);
        }

        get_source(source_id, tx)
    })
}

/// Delete the source. Transactions drawn from it are deleted with it.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such source.
pub fn delete_source(source_id: SourceId, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection
        .execute("DELETE FROM sources WHERE id = ?1", [source_id])
        .store_context("delete source")?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

fn map_row(row: &Row) -> Result<Source, rusqlite::Error> {
    Ok(Source {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        user_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// The request body for creating or updating a source.
#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to the caller's personal scope on create and to the current
    /// scope on update.
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
}

/// A route handler for listing the sources the current user can view.
pub async fn get_sources_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Source>>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let visible = scopes.resolve(Role::View, &connection)?;

    get_sources_in(visible, &connection).map(Json)
}

/// A route handler for getting a single source.
pub async fn get_source_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(source_id): Path<SourceId>,
) -> Result<Json<Source>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Sources, source_id, Role::View, &connection)?;

    get_source(source_id, &connection).map(Json)
}

/// A route handler for creating a source.
pub async fn create_source_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<SourceRequest>,
) -> Result<(StatusCode, Json<Source>), Error> {
    let name = SourceName::new(&request.name)?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let scope_id = scopes.write_target(request.scope_id, &connection)?;
    let source = create_source(
        scope_id,
        principal.user_id,
        name,
        request.description.as_deref().unwrap_or_default(),
        &connection,
    )?;

    Ok((StatusCode::CREATED, Json(source)))
}

/// A route handler for updating a source.
pub async fn update_source_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(source_id): Path<SourceId>,
    Json(request): Json<SourceRequest>,
) -> Result<Json<Source>, Error> {
    let name = SourceName::new(&request.name)?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let current_scope =
        scopes.authorize_row(ScopedTable::Sources, source_id, Role::Write, &connection)?;
    let scope_id = scopes.write_target(Some(request.scope_id.unwrap_or(current_scope)), &connection)?;

    update_source(
        source_id,
        scope_id,
        name,
        request.description.as_deref().unwrap_or_default(),
        &connection,
    )
    .map(Json)
}

/// A route handler for deleting a source.
pub async fn delete_source_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(source_id): Path<SourceId>,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Sources, source_id, Role::Write, &connection)?;
    delete_source(source_id, &connection)?;

    Ok(Json(json!({ "id": source_id })))
}

#[cfg(test)]
mod tests {
    use crate::{
        Error,
        db::get_test_connection,
        resolver::resolve_scopes,
        role::Role,
        user::test_utils::create_test_user,
    };

    use super::{
        SourceName, create_source, delete_source, get_source, get_sources_in, update_source,
    };

    #[test]
    fn source_name_cannot_be_blank() {
        assert!(matches!(SourceName::new("  "), Err(Error::InvalidInput(_))));
        assert_eq!(SourceName::new(" Wallet ").unwrap().as_ref(), "Wallet");
    }

    #[test]
    fn list_only_returns_sources_in_given_scopes() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let alices = create_source(
            alice.scope_id.unwrap(),
            alice.id,
            SourceName::new("Alice's wallet").unwrap(),
            "",
            &connection,
        )
        .unwrap();
        create_source(
            bob.scope_id.unwrap(),
            bob.id,
            SourceName::new("Bob's wallet").unwrap(),
            "",
            &connection,
        )
        .unwrap();

        let visible = resolve_scopes(alice.id, Role::View, &connection).unwrap();

        let got: Vec<_> = get_sources_in(&visible, &connection)
            .unwrap()
            .into_iter()
            .map(|source| source.id)
            .collect();
        assert_eq!(got, vec![alices.id]);
    }

    #[test]
    fn update_then_get_returns_new_fields() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let scope_id = alice.scope_id.unwrap();
        let source = create_source(
            scope_id,
            alice.id,
            SourceName::new("Wallet").unwrap(),
            "",
            &connection,
        )
        .unwrap();

        update_source(
            source.id,
            scope_id,
            SourceName::new("Bank").unwrap(),
            "Everyday account",
            &connection,
        )
        .unwrap();

        let got = get_source(source.id, &connection).unwrap();
        assert_eq!(got.name, "Bank");
        assert_eq!(got.description, "Everyday account");
    }

    #[test]
    fn delete_missing_source_is_not_found() {
        let connection = get_test_connection();

        assert_eq!(delete_source(1, &connection), Err(Error::NotFound));
    }
}
