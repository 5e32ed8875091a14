//! This file defines the `Tag` type, the types needed to create a tag and the API routes for the tag type.
//! A tag is used for categorising and grouping transactions.
//!
//! Tag names are unique within a scope, so two groups may both have a "food" tag.

use std::{fmt::Display, str::FromStr};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use rusqlite::{Connection, OptionalExtension, Row, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    Error,
    auth::Principal,
    database_id::{ScopeId, TagId, UserID},
    db::{DbPool, with_transaction},
    error::StoreContext,
    resolver::{ScopeResolver, ScopeSet, ScopedTable},
    role::Role,
    transaction::{TransactionReference, check_scope_move},
};

/// The longest tag name allowed, in characters.
pub const MAX_TAG_NAME_LENGTH: usize = 255;

/// The name of a tag.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
pub struct TagName(String);

impl TagName {
    /// Create a tag name from `name` with surrounding whitespace removed.
    ///
    /// # Errors
    ///
    /// This function will return an [Error::EmptyTagName] if `name` is blank,
    /// or [Error::TagNameTooLong] if it has more than [MAX_TAG_NAME_LENGTH]
    /// characters.
    pub fn new(name: &str) -> Result<Self, Error> {
        let name = name.trim();

        if name.is_empty() {
            Err(Error::EmptyTagName)
        } else if name.chars().count() > MAX_TAG_NAME_LENGTH {
            Err(Error::TagNameTooLong)
        } else {
            Ok(Self(name.to_string()))
        }
    }

    /// Create a tag name without validation.
    ///
    /// The caller should ensure that the string is trimmed and not empty.
    pub fn new_unchecked(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl AsRef<str> for TagName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TagName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagName::new(s)
    }
}

impl Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalise the tag names submitted with a transaction.
///
/// Names are trimmed, blank names are dropped and duplicates are collapsed.
/// The result is sorted so that the same input always yields the same tags.
///
/// # Errors
///
/// Returns [Error::TagNameTooLong] if any name is too long.
pub fn normalize_tag_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<TagName>, Error> {
    let mut tag_names = Vec::with_capacity(names.len());

    for name in names {
        match TagName::new(name.as_ref()) {
            Ok(tag_name) => tag_names.push(tag_name),
            Err(Error::EmptyTagName) => continue,
            Err(error) => return Err(error),
        }
    }

    tag_names.sort();
    tag_names.dedup();

    Ok(tag_names)
}

/// A tag for grouping expenses and income, e.g., 'Groceries', 'Eating Out', 'Wages'.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    /// The ID of the tag.
    pub id: TagId,
    /// The scope the tag belongs to.
    pub scope_id: ScopeId,
    /// The user who created the tag, if they still exist.
    pub user_id: Option<UserID>,
    /// The name of the tag.
    pub name: TagName,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Create the tags table. Tag names are unique within a scope.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_tag_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY,
            scope_id INTEGER NOT NULL REFERENCES scopes(id) ON DELETE CASCADE,
            user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(scope_id, name)
        );",
    )
}

const TAG_COLUMNS: &str = "id, scope_id, user_id, name, created_at, updated_at";

/// Create a tag named `name` in `scope_id`.
///
/// # Errors
/// Returns [Error::Conflict] if the scope already has a tag with that name.
pub fn create_tag(
    scope_id: ScopeId,
    creator: UserID,
    name: TagName,
    connection: &Connection,
) -> Result<Tag, Error> {
    let now = OffsetDateTime::now_utc();

    connection
        .execute(
            "INSERT INTO tags (scope_id, user_id, name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)",
            (scope_id, creator, name.as_ref(), now),
        )
        .map_err(|error| match Error::from(error) {
            Error::Conflict(_) => Error::Conflict(format!("the tag \"{name}\"")),
            error => error,
        })?;

    Ok(Tag {
        id: connection.last_insert_rowid(),
        scope_id,
        user_id: Some(creator),
        name,
        created_at: now,
        updated_at: now,
    })
}

/// Retrieve a tag by its ID.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such tag.
pub fn get_tag(tag_id: TagId, connection: &Connection) -> Result<Tag, Error> {
    connection
        .query_row(
            &format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1"),
            [tag_id],
            map_row,
        )
        .store_context("get tag")
}

/// Find the tag called `name` in `scope_id`, if there is one.
///
/// # Errors
/// Returns an error if the query fails.
pub fn find_tag_by_name(
    scope_id: ScopeId,
    name: &TagName,
    connection: &Connection,
) -> Result<Option<Tag>, Error> {
    connection
        .query_row(
            &format!("SELECT {TAG_COLUMNS} FROM tags WHERE scope_id = ?1 AND name = ?2"),
            (scope_id, name.as_ref()),
            map_row,
        )
        .optional()
        .store_context("find tag by name")
}

/// Get the tag called `name` in `scope_id`, creating it if it does not exist.
///
/// # Errors
/// Returns an error if the lookup or insert fails.
pub fn get_or_create_tag(
    scope_id: ScopeId,
    name: TagName,
    creator: UserID,
    connection: &Connection,
) -> Result<Tag, Error> {
    match find_tag_by_name(scope_id, &name, connection)? {
        Some(tag) => Ok(tag),
        None => create_tag(scope_id, creator, name, connection),
    }
}

/// Retrieve the tags in `scopes`, ordered by name.
///
/// # Errors
/// Returns an error if the query fails.
pub fn get_tags_in(scopes: &ScopeSet, connection: &Connection) -> Result<Vec<Tag>, Error> {
    if scopes.is_empty() {
        return Ok(Vec::new());
    }

    connection
        .prepare(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE scope_id IN ({}) ORDER BY name ASC, id ASC",
            scopes.placeholders(1)
        ))
        .store_context("list tags")?
        .query_map(params_from_iter(scopes.sql_values()), map_row)
        .store_context("list tags")?
        .map(|row| row.store_context("list tags"))
        .collect()
}

/// Rename a tag and move it to `scope_id`.
///
/// A tag stays in the scope of the transactions it is attached to, so only
/// tags without transactions in another scope can move.
///
/// # Errors
/// Returns [Error::NotFound] if the tag does not exist, [Error::Conflict]
/// if the target scope already has a tag with the new name, or
/// [Error::InvalidInput] if the tag is attached to transactions outside
/// `scope_id`.
pub fn update_tag(
    tag_id: TagId,
    scope_id: ScopeId,
    name: TagName,
    connection: &Connection,
) -> Result<Tag, Error> {
    with_transaction(connection, |tx| {
        check_scope_move(TransactionReference::Tag, tag_id, scope_id, tx)?;

        let rows_affected = tx
            .execute(
                "UPDATE tags SET scope_id = ?1, name = ?2, updated_at = ?3 WHERE id = ?4",
                (scope_id, name.as_ref(), OffsetDateTime::now_utc(), tag_id),
            )
            .map_err(|error| match Error::from(error) {
                Error::Conflict(_) => Error::Conflict(format!("the tag \"{name}\"")),
                error => error,
            })?;

        if rows_affected == 0 {
            return Err(Error::NotFound);
        }

        get_tag(tag_id, tx)
    })
}

/// Delete a tag. Its links to transactions are removed with it.
///
/// # Errors
/// Returns [Error::NotFound] if the tag does not exist.
pub fn delete_tag(tag_id: TagId, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection
        .execute("DELETE FROM tags WHERE id = ?1", [tag_id])
        .store_context("delete tag")?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

pub(crate) fn map_row(row: &Row) -> Result<Tag, rusqlite::Error> {
    let name: String = row.get(3)?;

    Ok(Tag {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        user_id: row.get(2)?,
        name: TagName::new_unchecked(&name),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub name: String,
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
}

/// A route handler for listing the tags the current user can view.
pub async fn get_tags_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Tag>>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let visible = scopes.resolve(Role::View, &connection)?;

    get_tags_in(visible, &connection).map(Json)
}

pub async fn get_tag_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(tag_id): Path<TagId>,
) -> Result<Json<Tag>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Tags, tag_id, Role::View, &connection)?;

    get_tag(tag_id, &connection).map(Json)
}

/// A route handler for creating a new tag.
pub async fn create_tag_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<TagRequest>,
) -> Result<(StatusCode, Json<Tag>), Error> {
    let name = TagName::new(&request.name)?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let scope_id = scopes.write_target(request.scope_id, &connection)?;
    let tag = create_tag(scope_id, principal.user_id, name, &connection)?;

    Ok((StatusCode::CREATED, Json(tag)))
}

/// A route handler for renaming a tag.
pub async fn update_tag_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(tag_id): Path<TagId>,
    Json(request): Json<TagRequest>,
) -> Result<Json<Tag>, Error> {
    let name = TagName::new(&request.name)?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let current_scope = scopes.authorize_row(ScopedTable::Tags, tag_id, Role::Write, &connection)?;
    let scope_id = scopes.write_target(Some(request.scope_id.unwrap_or(current_scope)), &connection)?;

    update_tag(tag_id, scope_id, name, &connection).map(Json)
}

/// A route handler for deleting a tag.
pub async fn delete_tag_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(tag_id): Path<TagId>,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Tags, tag_id, Role::Write, &connection)?;
    delete_tag(tag_id, &connection)?;

    Ok(Json(json!({ "id": tag_id })))
}


#[cfg(test)]
mod tag_query_tests {
    use crate::{
        Error, db::get_test_connection, resolver::resolve_scopes, role::Role,
        user::test_utils::create_test_user,
    };

    use super::{
        TagName, create_tag, delete_tag, find_tag_by_name, get_or_create_tag, get_tag, get_tags_in,
        update_tag,
    };

    #[test]
    fn create_tag_succeeds() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let name = TagName::new("Terrifically a tag").unwrap();

        let tag = create_tag(alice.scope_id.unwrap(), alice.id, name.clone(), &connection).unwrap();

        assert_eq!(tag.name, name);
        assert_eq!(get_tag(tag.id, &connection).unwrap().name, name);
    }

    #[test]
    fn tag_names_are_unique_per_scope() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let name = TagName::new("food").unwrap();

        create_tag(alice.scope_id.unwrap(), alice.id, name.clone(), &connection).unwrap();
        let duplicate = create_tag(alice.scope_id.unwrap(), alice.id, name.clone(), &connection);
        let other_scope = create_tag(bob.scope_id.unwrap(), bob.id, name, &connection);

        assert!(matches!(duplicate, Err(Error::Conflict(_))));
        assert!(other_scope.is_ok());
    }

    #[test]
    fn get_or_create_reuses_existing_tag() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let scope_id = alice.scope_id.unwrap();

        let first = get_or_create_tag(scope_id, TagName::new("food").unwrap(), alice.id, &connection)
            .unwrap();
        let second =
            get_or_create_tag(scope_id, TagName::new("food").unwrap(), alice.id, &connection)
                .unwrap();

        assert_eq!(first.id, second.id);
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn find_by_name_is_scoped() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let name = TagName::new("food").unwrap();
        create_tag(alice.scope_id.unwrap(), alice.id, name.clone(), &connection).unwrap();

        let found = find_tag_by_name(bob.scope_id.unwrap(), &name, &connection).unwrap();

        assert_eq!(found, None);
    }

    #[test]
    fn list_only_returns_visible_tags() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        create_tag(
            alice.scope_id.unwrap(),
            alice.id,
            TagName::new("b").unwrap(),
            &connection,
        )
        .unwrap();
        create_tag(
            alice.scope_id.unwrap(),
            alice.id,
            TagName::new("a").unwrap(),
            &connection,
        )
        .unwrap();
        create_tag(
            bob.scope_id.unwrap(),
            bob.id,
            TagName::new("c").unwrap(),
            &connection,
        )
        .unwrap();

        let visible = resolve_scopes(alice.id, Role::View, &connection).unwrap();
        let names: Vec<String> = get_tags_in(&visible, &connection)
            .unwrap()
            .into_iter()
            .map(|tag| tag.name.to_string())
            .collect();

        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn update_and_delete_tag() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let scope_id = alice.scope_id.unwrap();
        let tag = create_tag(scope_id, alice.id, TagName::new("old").unwrap(), &connection).unwrap();

        let updated = update_tag(tag.id, scope_id, TagName::new("new").unwrap(), &connection)
            .unwrap();
        assert_eq!(updated.name.as_ref(), "new");

        delete_tag(tag.id, &connection).unwrap();
        assert_eq!(get_tag(tag.id, &connection), Err(Error::NotFound));
        assert_eq!(delete_tag(tag.id, &connection), Err(Error::NotFound));
    }
}
