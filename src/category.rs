//! This file defines the `Category` type and the API routes for it.
//! A category acts like a tag for a transaction, however a transaction may only have one category.

use std::fmt::Display;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use rusqlite::{Connection, Row, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::{
    Error,
    auth::Principal,
    database_id::{CategoryId, ScopeId, UserID},
    db::{DbPool, with_transaction},
    error::StoreContext,
    resolver::{ScopeResolver, ScopeSet, ScopedTable},
    role::Role,
    transaction::{TransactionReference, check_scope_move},
};

/// The name of a category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Hash)]
pub struct CategoryName(String);

impl CategoryName {
    /// Create a category name.
    ///
    /// # Errors
    ///
    /// This function will return an error if `name` is an empty string.
    pub fn new(name: &str) -> Result<Self, Error> {
        let name = name.trim();

        if name.is_empty() {
            Err(Error::InvalidInput("category name cannot be empty".to_owned()))
        } else {
            Ok(Self(name.to_string()))
        }
    }
}

impl AsRef<str> for CategoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for CategoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A category for expenses and income, e.g., 'Groceries', 'Eating Out', 'Wages'.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    /// The id of the category.
    pub id: CategoryId,
    /// The scope that owns the category.
    pub scope_id: ScopeId,
    /// Who created the category.
    pub user_id: Option<UserID>,
    /// The name of the category.
    pub name: String,
    pub icon: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Create the categories table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            scope_id INTEGER NOT NULL REFERENCES scopes(id) ON DELETE CASCADE,
            user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            icon TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_categories_scope ON categories(scope_id);",
    )
}

const CATEGORY_COLUMNS: &str = "id, scope_id, user_id, name, icon, created_at, updated_at";

/// Create a category in `scope_id`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_category(
    scope_id: ScopeId,
    creator: UserID,
    name: CategoryName,
    icon: &str,
    connection: &Connection,
) -> Result<Category, Error> {
    let now = OffsetDateTime::now_utc();

    connection
        .execute(
            "INSERT INTO categories (scope_id, user_id, name, icon, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            (scope_id, creator, name.as_ref(), icon, now),
        )
        .store_context("create category")?;

    Ok(Category {
        id: connection.last_insert_rowid(),
        scope_id,
        user_id: Some(creator),
        name: name.0,
        icon: icon.to_owned(),
        created_at: now,
        updated_at: now,
    })
}

/// Retrieve the category with `category_id`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such category.
pub fn get_category(category_id: CategoryId, connection: &Connection) -> Result<Category, Error> {
    connection
        .query_row(
            &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1"),
            [category_id],
            map_row,
        )
        .store_context("get category")
}

/// Retrieve the categories in `scopes`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_categories_in(
    scopes: &ScopeSet,
    connection: &Connection,
) -> Result<Vec<Category>, Error> {
    if scopes.is_empty() {
        return Ok(Vec::new());
    }

    connection
        .prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE scope_id IN ({}) ORDER BY name ASC, id ASC",
            scopes.placeholders(1)
        ))
        .store_context("list categories")?
        .query_map(params_from_iter(scopes.sql_values()), map_row)
        .store_context("list categories")?
        .map(|row| row.store_context("list categories"))
        .collect()
}

/// Update a category's name, icon and scope.
///
/// # Errors
/// Returns [Error::NotFound] if the category doesn't exist, or
/// [Error::InvalidInput] if transactions in another scope are filed under it.
pub fn update_category(
    category_id: CategoryId,
    scope_id: ScopeId,
    name: CategoryName,
    icon: &str,
    connection: &Connection,
) -> Result<Category, Error> {
    with_transaction(connection, |tx| {
        check_scope_move(TransactionReference::Category, category_id, scope_id, tx)?;

        let rows_affected = tx
            .execute(
                "UPDATE categories SET scope_id = ?1, name = ?2, icon = ?3, updated_at = ?4 WHERE id = ?5",
                (scope_id, name.as_ref(), icon, OffsetDateTime::now_utc(), category_id),
            )
            .store_context("update category")?;

        if rows_affected == 0 {
            return Err(Error::NotFound);
        }

        get_category(category_id, tx)
    })
}

/// Delete a category. Transactions in the category go with it.
///
/// # Errors
/// Returns [Error::NotFound] if the category doesn't exist.
pub fn delete_category(category_id: CategoryId, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection
        .execute("DELETE FROM categories WHERE id = ?1", [category_id])
        .store_context("delete category")?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

fn map_row(row: &Row) -> Result<Category, rusqlite::Error> {
    Ok(Category {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        user_id: row.get(2)?,
        name: row.get(3)?,
        icon: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
}

/// A route handler for listing categories.
pub async fn get_categories_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Category>>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let visible = scopes.resolve(Role::View, &connection)?;

    get_categories_in(visible, &connection).map(Json)
}

/// A route handler for getting a category.
pub async fn get_category_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(category_id): Path<CategoryId>,
) -> Result<Json<Category>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Categories, category_id, Role::View, &connection)?;

    get_category(category_id, &connection).map(Json)
}

/// A route handler for creating a new category.
pub async fn create_category_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>), Error> {
    let name = CategoryName::new(&request.name)?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let scope_id = scopes.write_target(request.scope_id, &connection)?;
    let category = create_category(
        scope_id,
        principal.user_id,
        name,
        request.icon.as_deref().unwrap_or_default(),
        &connection,
    )?;

    Ok((StatusCode::CREATED, Json(category)))
}

/// A route handler for updating a category.
pub async fn update_category_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(category_id): Path<CategoryId>,
    Json(request): Json<CategoryRequest>,
) -> Result<Json<Category>, Error> {
    let name = CategoryName::new(&request.name)?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let current_scope =
        scopes.authorize_row(ScopedTable::Categories, category_id, Role::Write, &connection)?;
    let scope_id = scopes.write_target(Some(request.scope_id.unwrap_or(current_scope)), &connection)?;

    update_category(
        category_id,
        scope_id,
        name,
        request.icon.as_deref().unwrap_or_default(),
        &connection,
    )
    .map(Json)
}

/// A route handler for deleting a category.
pub async fn delete_category_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(category_id): Path<CategoryId>,
) -> Result<Json<Value>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Categories, category_id, Role::Write, &connection)?;
    delete_category(category_id, &connection)?;

    Ok(Json(json!({ "id": category_id })))
}
