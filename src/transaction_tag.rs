//! Transaction-Tag Junction Table Operations
//!
//! This module handles the many-to-many relationship between transactions and tags.
//! Callers are responsible for checking that the tag and the transaction are
//! in scopes the principal may use.

use std::collections::HashMap;

use rusqlite::{Connection, params_from_iter, types::Value};
use time::OffsetDateTime;

use crate::{
    Error,
    database_id::{TagId, TransactionId},
    error::StoreContext,
    membership::sql_placeholders,
    tag::{self, Tag},
};

/// Create the transaction_tags junction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_tag_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS transaction_tags (
            id INTEGER PRIMARY KEY,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(transaction_id, tag_id)
        );

        CREATE INDEX IF NOT EXISTS idx_transaction_tags_tag_id ON transaction_tags(tag_id);",
    )
}

/// Get all tags for a transaction, ordered by name.
///
/// Only tags in the transaction's own scope are returned.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_transaction_tags(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Vec<Tag>, Error> {
    connection
        .prepare(
            "SELECT t.id, t.scope_id, t.user_id, t.name, t.created_at, t.updated_at
             FROM tags t
             INNER JOIN transaction_tags tt ON t.id = tt.tag_id
             INNER JOIN transactions tr ON tr.id = tt.transaction_id AND tr.scope_id = t.scope_id
             WHERE tt.transaction_id = ?1
             ORDER BY t.name",
        )
        .store_context("get transaction tags")?
        .query_map([transaction_id], tag::map_row)
        .store_context("get transaction tags")?
        .map(|maybe_tag| maybe_tag.store_context("get transaction tags"))
        .collect()
}

/// Get the tag names for each of `transaction_ids`.
///
/// Transactions without tags are absent from the returned map.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_tag_names_for_transactions(
    transaction_ids: &[TransactionId],
    connection: &Connection,
) -> Result<HashMap<TransactionId, Vec<String>>, Error> {
    let mut tag_names: HashMap<TransactionId, Vec<String>> = HashMap::new();

    if transaction_ids.is_empty() {
        return Ok(tag_names);
    }

    let mut statement = connection
        .prepare(&format!(
            "SELECT tt.transaction_id, t.name
             FROM transaction_tags tt
             INNER JOIN tags t ON t.id = tt.tag_id
             INNER JOIN transactions tr ON tr.id = tt.transaction_id AND tr.scope_id = t.scope_id
             WHERE tt.transaction_id IN ({})
             ORDER BY t.name",
            sql_placeholders(transaction_ids.len(), 1)
        ))
        .store_context("get tag names")?;

    let rows = statement
        .query_map(
            params_from_iter(transaction_ids.iter().map(|id| Value::Integer(*id))),
            |row| Ok((row.get::<_, TransactionId>(0)?, row.get::<_, String>(1)?)),
        )
        .store_context("get tag names")?;

    for row in rows {
        let (transaction_id, name) = row.store_context("get tag names")?;
        tag_names.entry(transaction_id).or_default().push(name);
    }

    Ok(tag_names)
}

/// Replace the tags of a transaction with `tag_ids`.
///
/// Running this twice with the same tags leaves the same rows behind.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn set_transaction_tags(
    transaction_id: TransactionId,
    tag_ids: &[TagId],
    connection: &Connection,
) -> Result<(), Error> {
    connection
        .execute(
            "DELETE FROM transaction_tags WHERE transaction_id = ?1",
            [transaction_id],
        )
        .store_context("clear transaction tags")?;

    for &tag_id in tag_ids {
        add_tag_to_transaction(transaction_id, tag_id, connection)?;
    }

    Ok(())
}

/// Add a tag to a transaction. Adding a tag twice has no further effect.
///
/// # Errors
/// This function will return an error if either ID does not refer to an
/// existing row, or if there is some other SQL error.
pub fn add_tag_to_transaction(
    transaction_id: TransactionId,
    tag_id: TagId,
    connection: &Connection,
) -> Result<(), Error> {
    connection
        .execute(
            "INSERT INTO transaction_tags (transaction_id, tag_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(transaction_id, tag_id) DO NOTHING",
            (transaction_id, tag_id, OffsetDateTime::now_utc()),
        )
        .store_context("add tag to transaction")?;

    Ok(())
}

/// Remove a tag from a transaction.
///
/// # Errors
/// Returns [Error::NotFound] if the tag was not on the transaction.
pub fn remove_tag_from_transaction(
    transaction_id: TransactionId,
    tag_id: TagId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection
        .execute(
            "DELETE FROM transaction_tags WHERE transaction_id = ?1 AND tag_id = ?2",
            (transaction_id, tag_id),
        )
        .store_context("remove tag from transaction")?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}
