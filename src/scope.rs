//! The scope registry.
//!
//! A scope is the unit of ownership for every data row. Scopes are minted
//! here, tagged as belonging to a single user or to a group, and deleted
//! when their owner goes away. The registry knows nothing about roles or
//! users; see [crate::membership] for that.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, OptionalExtension, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{Error, database_id::ScopeId, error::StoreContext};

/// Whether a scope belongs to one user or is shared by a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// A personal scope, created with its user.
    User,
    /// A shared scope, created with its group.
    Group,
}

impl ScopeType {
    fn as_str(self) -> &'static str {
        match self {
            ScopeType::User => "user",
            ScopeType::Group => "group",
        }
    }
}

impl Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ScopeType::User),
            "group" => Ok(ScopeType::Group),
            other => Err(Error::InvalidInput(format!("unknown scope type \"{other}\""))),
        }
    }
}

impl ToSql for ScopeType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ScopeType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

/// A scope row. Scopes are never modified after they are created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    /// The ID of the scope.
    pub id: ScopeId,
    /// Whether the scope is personal or shared.
    #[serde(rename = "type")]
    pub scope_type: ScopeType,
    /// When the scope was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Mint a new scope of the given type.
///
/// Scope IDs come from an `AUTOINCREMENT` key, so they are never reused even
/// after the scope is deleted.
///
/// # Errors
/// Returns an error if the row cannot be inserted.
pub fn create_scope(scope_type: ScopeType, connection: &Connection) -> Result<Scope, Error> {
    let created_at = OffsetDateTime::now_utc();

    connection
        .execute(
            "INSERT INTO scopes (type, created_at) VALUES (?1, ?2)",
            (scope_type, created_at),
        )
        .store_context("create scope")?;

    Ok(Scope {
        id: ScopeId::new(connection.last_insert_rowid()),
        scope_type,
        created_at,
    })
}

/// Retrieve the scope with `scope_id`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such scope.
pub fn get_scope(scope_id: ScopeId, connection: &Connection) -> Result<Scope, Error> {
    connection
        .query_row(
            "SELECT id, type, created_at FROM scopes WHERE id = ?1",
            [scope_id],
            map_row,
        )
        .store_context("get scope")
}

/// Whether a scope with `scope_id` exists.
///
/// # Errors
/// Returns an error if the query fails.
pub fn scope_exists(scope_id: ScopeId, connection: &Connection) -> Result<bool, Error> {
    connection
        .query_row("SELECT 1 FROM scopes WHERE id = ?1", [scope_id], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
        .store_context("check scope exists")
}

/// Delete the scope with `scope_id`.
///
/// Deleting a scope that does not exist is not an error. Memberships and
/// data rows carrying the scope are removed by the schema's cascades.
///
/// # Errors
/// Returns an error if the delete fails.
pub fn delete_scope(scope_id: ScopeId, connection: &Connection) -> Result<(), Error> {
    connection
        .execute("DELETE FROM scopes WHERE id = ?1", [scope_id])
        .store_context("delete scope")?;

    Ok(())
}

/// Create the scopes table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_scope_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS scopes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL CHECK (type IN ('user', 'group')),
            created_at TEXT NOT NULL
        );",
    )
}

fn map_row(row: &Row) -> Result<Scope, rusqlite::Error> {
    Ok(Scope {
        id: row.get(0)?,
        scope_type: row.get(1)?,
        created_at: row.get(2)?,
    })
}
