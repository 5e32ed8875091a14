//! Database connection pooling, schema creation and transaction handling.
//!
//! Store functions throughout the crate take a `&Connection`. Because a
//! `rusqlite::Transaction` dereferences to a `Connection`, callers that are
//! already inside a transaction simply pass it down and the store function
//! joins it. [with_transaction] is the single place that decides whether an
//! operation owns its transaction or joins an ambient one.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use bb8::{ManageConnection, Pool, PooledConnection};
use rusqlite::{Connection, Transaction as SqlTransaction, TransactionBehavior};

use crate::{
    Error, category::create_category_table, group::create_group_table,
    membership::create_user_scope_table, scope::create_scope_table, source::create_source_table,
    tag::create_tag_table, transaction::create_transaction_table,
    transaction_tag::create_transaction_tag_table, user::create_user_table,
};

/// How long to wait when opening or checking out a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The DSN that selects a private in-memory database.
pub const IN_MEMORY_DSN: &str = ":memory:";

static IN_MEMORY_DATABASE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Settings for the database connection pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// A file path, or `:memory:` for an in-memory database.
    pub dsn: String,
    /// The maximum number of open connections.
    pub max_open: u32,
    /// The number of connections kept open while idle.
    pub max_idle: u32,
    /// Connections older than this are closed and replaced.
    pub max_lifetime: Option<Duration>,
}

impl PoolConfig {
    /// A single-connection in-memory database, used by tests.
    pub fn in_memory() -> Self {
        Self {
            dsn: IN_MEMORY_DSN.to_owned(),
            max_open: 1,
            max_idle: 1,
            max_lifetime: None,
        }
    }
}

/// Opens `rusqlite` connections for the pool.
#[derive(Debug)]
pub struct SqliteConnectionManager {
    path: String,
    in_memory: bool,
}

impl SqliteConnectionManager {
    /// Create a manager for `dsn`.
    ///
    /// `:memory:` is mapped to a uniquely named shared-cache database so that
    /// every connection in the pool sees the same data.
    pub fn new(dsn: &str) -> Self {
        if dsn == IN_MEMORY_DSN {
            let count = IN_MEMORY_DATABASE_COUNT.fetch_add(1, Ordering::Relaxed);
            Self {
                path: format!(
                    "file:spendshare-{}-{count}?mode=memory&cache=shared",
                    std::process::id()
                ),
                in_memory: true,
            }
        } else {
            Self {
                path: dsn.to_owned(),
                in_memory: false,
            }
        }
    }
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let connection = Connection::open(&self.path)?;
        configure_connection(&connection)?;

        Ok(connection)
    }

    async fn is_valid(&self, connection: &mut Self::Connection) -> Result<(), Self::Error> {
        connection.execute_batch("SELECT 1;")
    }

    fn has_broken(&self, _connection: &mut Self::Connection) -> bool {
        false
    }
}

/// A pooled database connection.
pub type DbConnection<'a> = PooledConnection<'a, SqliteConnectionManager>;

/// A bounded pool of SQLite connections.
#[derive(Clone)]
pub struct DbPool {
    pool: Pool<SqliteConnectionManager>,
}

impl DbPool {
    /// Build the pool and create the schema.
    ///
    /// # Errors
    /// Returns an [Error::Pool] if the pool cannot open its initial
    /// connections, or a store error if the schema cannot be created.
    pub async fn connect(config: &PoolConfig) -> Result<Self, Error> {
        let manager = SqliteConnectionManager::new(&config.dsn);
        let max_size = config.max_open.max(1);

        let builder = Pool::builder()
            .max_size(max_size)
            .connection_timeout(CONNECT_TIMEOUT);

        // An in-memory database lives only as long as one of its connections,
        // so the pool must never let every connection go.
        let builder = if manager.in_memory {
            builder
                .min_idle(Some(max_size))
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            builder
                .min_idle(Some(config.max_idle.min(max_size)))
                .max_lifetime(config.max_lifetime)
        };

        let pool = builder.build(manager).await.map_err(|error| {
            tracing::error!("could not build database pool: {error}");
            Error::Pool(error.to_string())
        })?;

        let db_pool = Self { pool };
        {
            let connection = db_pool.get().await?;
            initialize(&connection)?;
        }

        Ok(db_pool)
    }

    /// Build a pool over a fresh in-memory database.
    ///
    /// # Errors
    /// See [DbPool::connect].
    pub async fn open_in_memory() -> Result<Self, Error> {
        Self::connect(&PoolConfig::in_memory()).await
    }

    /// Check out a connection, waiting at most [CONNECT_TIMEOUT].
    ///
    /// # Errors
    /// Returns an [Error::Pool] if no connection became available in time.
    pub async fn get(&self) -> Result<DbConnection<'_>, Error> {
        self.pool.get().await.map_err(|error| {
            tracing::error!("could not check out a database connection: {error}");
            Error::Pool(error.to_string())
        })
    }
}

/// Apply the per-connection settings every connection needs.
///
/// # Errors
/// Returns an error if a pragma cannot be set.
pub fn configure_connection(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.busy_timeout(CONNECT_TIMEOUT)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")
}

/// Create all tables, in dependency order, if they do not already exist.
///
/// # Errors
/// Returns an error if a table cannot be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction = SqlTransaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_user_table(&transaction)?;
    create_scope_table(&transaction)?;
    create_user_scope_table(&transaction)?;
    create_group_table(&transaction)?;
    create_source_table(&transaction)?;
    create_category_table(&transaction)?;
    create_tag_table(&transaction)?;
    create_transaction_table(&transaction)?;
    create_transaction_tag_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

/// Run `operation` inside a database transaction.
///
/// If `connection` is already inside a transaction, `operation` joins it and
/// the outer owner remains responsible for committing or rolling back.
/// Otherwise a new transaction is opened, committed when `operation`
/// succeeds, and rolled back when it fails.
///
/// # Errors
/// Returns the error from `operation`, or a store error if the transaction
/// could not be started or committed.
pub fn with_transaction<T>(
    connection: &Connection,
    operation: impl FnOnce(&Connection) -> Result<T, Error>,
) -> Result<T, Error> {
    if !connection.is_autocommit() {
        return operation(connection);
    }

    let transaction = connection.unchecked_transaction()?;
    // Dropping the transaction on the error path rolls it back.
    let result = operation(&transaction)?;
    transaction.commit()?;

    Ok(result)
}

/// Open an in-memory database with the full schema.
#[cfg(test)]
pub fn get_test_connection() -> Connection {
    let connection = Connection::open_in_memory().expect("could not open in-memory database");
    configure_connection(&connection).expect("could not configure test connection");
    initialize(&connection).expect("could not initialize test database");

    connection
}

#[cfg(test)]
mod tests {
    use crate::Error;

    use super::{DbPool, get_test_connection, with_transaction};

    #[test]
    fn initialize_is_idempotent() {
        let connection = get_test_connection();

        assert_eq!(super::initialize(&connection), Ok(()));
    }

    #[test]
    fn owned_transaction_commits_on_success() {
        let connection = get_test_connection();

        with_transaction(&connection, |tx| {
            tx.execute("INSERT INTO scopes (type, created_at) VALUES ('user', '')", ())?;
            Ok(())
        })
        .unwrap();

        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM scopes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn owned_transaction_rolls_back_on_error() {
        let connection = get_test_connection();

        let result: Result<(), Error> = with_transaction(&connection, |tx| {
            tx.execute("INSERT INTO scopes (type, created_at) VALUES ('user', '')", ())?;
            Err(Error::Forbidden)
        });

        assert_eq!(result, Err(Error::Forbidden));
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM scopes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn joined_transaction_is_left_to_the_owner() {
        let connection = get_test_connection();
        let outer = connection.unchecked_transaction().unwrap();

        with_transaction(&outer, |tx| {
            tx.execute("INSERT INTO scopes (type, created_at) VALUES ('user', '')", ())?;
            Ok(())
        })
        .unwrap();
        assert!(!outer.is_autocommit(), "inner call must not commit");
        outer.rollback().unwrap();

        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM scopes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn in_memory_pool_shares_one_database() {
        let pool = DbPool::open_in_memory().await.unwrap();

        {
            let connection = pool.get().await.unwrap();
            connection
                .execute("INSERT INTO scopes (type, created_at) VALUES ('group', '')", ())
                .unwrap();
        }

        let connection = pool.get().await.unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM scopes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
