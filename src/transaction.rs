//! Income and expense records, and their tags.
//!
//! Creating or updating a transaction also reconciles its tags: the tag
//! names sent by the client are looked up in the transaction's scope,
//! missing tags are created, and the transaction's links are replaced, all
//! in one database transaction.

use std::{fmt::Display, str::FromStr};

use axum::{
    Extension, Json,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use rusqlite::{
    Connection, Row, ToSql, params_from_iter,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Date, OffsetDateTime};

use crate::{
    AppState, Error,
    auth::Principal,
    database_id::{CategoryId, ScopeId, SourceId, TagId, TransactionId, UserID},
    db::{DbPool, with_transaction},
    error::StoreContext,
    membership::sql_placeholders,
    pagination::{Page, PaginationConfig},
    resolver::{ScopeResolver, ScopeSet, ScopedTable},
    role::Role,
    tag::{Tag, TagName, get_or_create_tag, normalize_tag_names},
    transaction_tag::{
        add_tag_to_transaction, get_tag_names_for_transactions, get_transaction_tags,
        remove_tag_from_transaction, set_transaction_tags,
    },
};

/// The response header carrying the number of transactions matching a list
/// query before paging.
pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// Whether money came in or went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    #[serde(alias = "income")]
    Income,
    #[serde(alias = "expense")]
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INCOME" => Ok(TransactionType::Income),
            "EXPENSE" => Ok(TransactionType::Expense),
            _ => Err(Error::InvalidInput(format!(
                "\"{s}\" is not a transaction type, expected INCOME or EXPENSE"
            ))),
        }
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

/// An expense or income, i.e. an event where money was either spent or earned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// The scope that owns the transaction.
    pub scope_id: ScopeId,
    /// The user who recorded the transaction, if they still exist.
    pub user_id: Option<UserID>,
    pub source_id: SourceId,
    pub category_id: CategoryId,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub date: Date,
    pub description: String,
    /// The names of the transaction's tags, sorted.
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The validated fields of a transaction to create or update.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFields {
    pub source_id: SourceId,
    pub category_id: CategoryId,
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub date: Date,
    pub description: String,
    /// Trimmed, non-empty and without duplicates.
    pub tags: Vec<TagName>,
}

/// The request body for creating or updating a transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRequest {
    pub source_id: SourceId,
    pub category_id: CategoryId,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub date: Date,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Defaults to the caller's personal scope on create and to the current
    /// scope on update.
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
}

impl TransactionRequest {
    /// Validate the request, splitting off the requested scope.
    ///
    /// # Errors
    /// Returns [Error::InvalidInput] if the amount is negative or not a
    /// number, or [Error::TagNameTooLong] for an over-long tag name.
    pub fn into_fields(self) -> Result<(Option<ScopeId>, TransactionFields), Error> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(Error::InvalidInput(
                "amount must be a non-negative number".to_owned(),
            ));
        }

        let tags = normalize_tag_names(&self.tags)?;

        Ok((
            self.scope_id,
            TransactionFields {
                source_id: self.source_id,
                category_id: self.category_id,
                transaction_type: self.transaction_type,
                amount: self.amount,
                date: self.date,
                description: self.description.unwrap_or_default(),
                tags,
            },
        ))
    }
}

/// Create the transactions table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY,
            scope_id INTEGER NOT NULL REFERENCES scopes(id) ON DELETE CASCADE,
            user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            type TEXT NOT NULL CHECK (type IN ('INCOME', 'EXPENSE')),
            amount REAL NOT NULL,
            date TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_scope_date ON transactions(scope_id, date);",
    )
}

const TRANSACTION_COLUMNS: &str = "t.id, t.scope_id, t.user_id, t.source_id, t.category_id, \
    t.type, t.amount, t.date, t.description, t.created_at, t.updated_at";

/// Create a transaction in `scope_id` along with its tags.
///
/// The principal behind `scopes` must be able to write to `scope_id`, and
/// the source and category must belong to `scope_id`. Tags that do not exist
/// in `scope_id` yet are created there.
///
/// # Errors
/// Returns [Error::Forbidden] if the principal cannot write to one of the
/// scopes involved, [Error::InvalidInput] if the source or category cannot
/// be found or belongs to another scope, or an error if a query fails.
/// Nothing is written on error.
pub fn create_transaction(
    scope_id: ScopeId,
    fields: TransactionFields,
    scopes: &mut ScopeResolver,
    connection: &Connection,
) -> Result<Transaction, Error> {
    with_transaction(connection, |tx| {
        scopes.require(scope_id, Role::Write, tx)?;
        check_references(scope_id, &fields, scopes, tx)?;
        let tag_ids = resolve_tag_ids(scope_id, &fields.tags, scopes.user_id(), tx)?;

        tx.execute(
            "INSERT INTO transactions
            (scope_id, user_id, source_id, category_id, type, amount, date, description, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            (
                scope_id,
                scopes.user_id(),
                fields.source_id,
                fields.category_id,
                fields.transaction_type,
                fields.amount,
                fields.date,
                &fields.description,
                OffsetDateTime::now_utc(),
            ),
        )
        .store_context("create transaction")?;

        let transaction_id = tx.last_insert_rowid();
        set_transaction_tags(transaction_id, &tag_ids, tx)?;

        get_transaction(transaction_id, tx)
    })
}

/// Overwrite a transaction's fields and tags, moving it to `scope_id`.
///
/// Callers must have checked that the principal may write to the
/// transaction's current scope.
///
/// # Errors
/// See [create_transaction]. Returns [Error::NotFound] if the transaction
/// does not exist.
pub fn update_transaction(
    transaction_id: TransactionId,
    scope_id: ScopeId,
    fields: TransactionFields,
    scopes: &mut ScopeResolver,
    connection: &Connection,
) -> Result<Transaction, Error> {
    with_transaction(connection, |tx| {
        scopes.require(scope_id, Role::Write, tx)?;
        check_references(scope_id, &fields, scopes, tx)?;
        let tag_ids = resolve_tag_ids(scope_id, &fields.tags, scopes.user_id(), tx)?;

        let rows_affected = tx
            .execute(
                "UPDATE transactions
                SET scope_id = ?1, source_id = ?2, category_id = ?3, type = ?4, amount = ?5,
                    date = ?6, description = ?7, updated_at = ?8
                WHERE id = ?9",
                (
                    scope_id,
                    fields.source_id,
                    fields.category_id,
                    fields.transaction_type,
                    fields.amount,
                    fields.date,
                    &fields.description,
                    OffsetDateTime::now_utc(),
                    transaction_id,
                ),
            )
            .store_context("update transaction")?;

        if rows_affected == 0 {
            return Err(Error::NotFound);
        }

        set_transaction_tags(transaction_id, &tag_ids, tx)?;

        get_transaction(transaction_id, tx)
    })
}

/// The source and category must be writable by the principal and live in
/// the transaction's scope.
fn check_references(
    scope_id: ScopeId,
    fields: &TransactionFields,
    scopes: &mut ScopeResolver,
    connection: &Connection,
) -> Result<(), Error> {
    let references = [
        (TransactionReference::Source, ScopedTable::Sources, fields.source_id),
        (TransactionReference::Category, ScopedTable::Categories, fields.category_id),
    ];

    for (reference, table, id) in references {
        let reference_scope = scopes
            .authorize_row(table, id, Role::Write, connection)
            .map_err(|error| match error {
                Error::NotFound => Error::InvalidInput(format!("{reference} {id} does not exist")),
                error => error,
            })?;

        if reference_scope != scope_id {
            return Err(Error::InvalidInput(format!(
                "{reference} {id} belongs to another scope"
            )));
        }
    }

    Ok(())
}

/// The rows a transaction points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionReference {
    /// The source a transaction draws on.
    Source,
    /// The category a transaction is filed under.
    Category,
    /// A tag attached to a transaction.
    Tag,
}

impl Display for TransactionReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionReference::Source => "source",
            TransactionReference::Category => "category",
            TransactionReference::Tag => "tag",
        };

        write!(f, "{name}")
    }
}

/// Check that the source, category or tag `id` can move to `scope_id`.
///
/// A row that transactions in another scope point at has to stay where it
/// is, otherwise deleting it or its new scope would reach those
/// transactions.
///
/// # Errors
/// Returns [Error::InvalidInput] if a transaction outside `scope_id` uses
/// the row, or an error if the query fails.
pub fn check_scope_move(
    reference: TransactionReference,
    id: i64,
    scope_id: ScopeId,
    connection: &Connection,
) -> Result<(), Error> {
    let query = match reference {
        TransactionReference::Source => {
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE source_id = ?1 AND scope_id != ?2)"
        }
        TransactionReference::Category => {
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE category_id = ?1 AND scope_id != ?2)"
        }
        TransactionReference::Tag => {
            "SELECT EXISTS(
                SELECT 1 FROM transaction_tags tt
                INNER JOIN transactions t ON t.id = tt.transaction_id
                WHERE tt.tag_id = ?1 AND t.scope_id != ?2
            )"
        }
    };

    let used_elsewhere: bool = connection
        .query_row(query, (id, scope_id), |row| row.get(0))
        .store_context("check scope move")?;

    if used_elsewhere {
        return Err(Error::InvalidInput(format!(
            "{reference} {id} is used by transactions in another scope"
        )));
    }

    Ok(())
}

fn resolve_tag_ids(
    scope_id: ScopeId,
    tag_names: &[TagName],
    creator: UserID,
    connection: &Connection,
) -> Result<Vec<TagId>, Error> {
    tag_names
        .iter()
        .map(|name| get_or_create_tag(scope_id, name.clone(), creator, connection).map(|tag| tag.id))
        .collect()
}

/// Retrieve a transaction and its tag names. Callers must check access first.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such transaction.
pub fn get_transaction(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let mut transaction = connection
        .query_row(
            &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.id = ?1"),
            [transaction_id],
            map_transaction_row,
        )
        .store_context("get transaction")?;

    transaction.tags = get_transaction_tags(transaction_id, connection)?
        .into_iter()
        .map(|tag| tag.name.to_string())
        .collect();

    Ok(transaction)
}

/// Delete a transaction. Its tag links go with it.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such transaction.
pub fn delete_transaction(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection
        .execute("DELETE FROM transactions WHERE id = ?1", [transaction_id])
        .store_context("delete transaction")?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        user_id: row.get(2)?,
        source_id: row.get(3)?,
        category_id: row.get(4)?,
        transaction_type: row.get(5)?,
        amount: row.get(6)?,
        date: row.get(7)?,
        description: row.get(8)?,
        tags: Vec::new(),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// The fields transactions can be sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Date,
    Amount,
    CreatedAt,
    Description,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::Date => "t.date",
            SortField::Amount => "t.amount",
            SortField::CreatedAt => "t.created_at",
            SortField::Description => "t.description",
        }
    }
}

/// The order to sort transactions in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SortOrder {
    /// Sort in order of increasing value.
    #[serde(rename = "ASC", alias = "asc")]
    Ascending,
    /// Sort in order of decreasing value.
    #[default]
    #[serde(rename = "DESC", alias = "desc")]
    Descending,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// The query string accepted when listing transactions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionQuery {
    /// Include transactions on or after this date.
    pub from: Option<Date>,
    /// Include transactions on or before this date.
    pub to: Option<Date>,
    pub source_id: Option<SourceId>,
    pub category_id: Option<CategoryId>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// Comma separated tag names. A transaction matches if it has any of them.
    pub tags: Option<String>,
    /// Match transactions whose description contains this text.
    pub description: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl TransactionQuery {
    /// Split the `tags` parameter into tag names.
    ///
    /// # Errors
    /// Returns [Error::TagNameTooLong] for an over-long tag name.
    pub fn tag_names(&self) -> Result<Vec<TagName>, Error> {
        match &self.tags {
            Some(tags) => normalize_tag_names(&tags.split(',').collect::<Vec<_>>()),
            None => Ok(Vec::new()),
        }
    }
}

/// One page of transactions and the number of matches across all pages.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total_count: u64,
}

/// Builds a `WHERE` clause with numbered parameters.
struct Filter {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    fn new() -> Self {
        Self {
            conditions: Vec::new(),
            params: Vec::new(),
        }
    }

    /// The placeholder for the next parameter.
    fn push(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    /// Placeholders for a list of parameters, for use in an `IN (...)` list.
    fn push_all(&mut self, values: Vec<Value>) -> String {
        let first = self.params.len() + 1;
        let placeholders = sql_placeholders(values.len(), first);
        self.params.extend(values);
        placeholders
    }

    fn and(&mut self, condition: String) {
        self.conditions.push(condition);
    }

    fn where_clause(&self) -> String {
        format!("WHERE {}", self.conditions.join(" AND "))
    }
}

/// Query the transactions in `scopes` that match `query`.
///
/// Tag filters only match tags in `scopes`.
///
/// # Errors
/// Returns an error if a tag name is invalid or the query fails.
pub fn query_transactions(
    scopes: &ScopeSet,
    query: &TransactionQuery,
    page: Page,
    connection: &Connection,
) -> Result<TransactionPage, Error> {
    if scopes.is_empty() {
        return Ok(TransactionPage {
            transactions: Vec::new(),
            total_count: 0,
        });
    }

    let tag_names = query.tag_names()?;
    let mut filter = Filter::new();

    let scope_placeholders = filter.push_all(scopes.sql_values());
    filter.and(format!("t.scope_id IN ({scope_placeholders})"));

    if let Some(from) = query.from {
        let placeholder = filter.push(Value::Text(from.to_string()));
        filter.and(format!("t.date >= {placeholder}"));
    }

    if let Some(to) = query.to {
        let placeholder = filter.push(Value::Text(to.to_string()));
        filter.and(format!("t.date <= {placeholder}"));
    }

    if let Some(source_id) = query.source_id {
        let placeholder = filter.push(Value::Integer(source_id));
        filter.and(format!("t.source_id = {placeholder}"));
    }

    if let Some(category_id) = query.category_id {
        let placeholder = filter.push(Value::Integer(category_id));
        filter.and(format!("t.category_id = {placeholder}"));
    }

    if let Some(transaction_type) = query.transaction_type {
        let placeholder = filter.push(Value::Text(transaction_type.as_str().to_owned()));
        filter.and(format!("t.type = {placeholder}"));
    }

    if !tag_names.is_empty() {
        let name_placeholders = filter.push_all(
            tag_names
                .iter()
                .map(|name| Value::Text(name.to_string()))
                .collect(),
        );
        let tag_scope_placeholders = filter.push_all(scopes.sql_values());
        filter.and(format!(
            "t.id IN (
                SELECT tt.transaction_id FROM transaction_tags tt
                INNER JOIN tags g ON g.id = tt.tag_id
                WHERE g.name IN ({name_placeholders}) AND g.scope_id IN ({tag_scope_placeholders})
            )"
        ));
    }

    if let Some(description) = query
        .description
        .as_deref()
        .map(str::trim)
        .filter(|description| !description.is_empty())
    {
        let placeholder = filter.push(Value::Text(format!("%{}%", escape_like(description))));
        filter.and(format!("t.description LIKE {placeholder} ESCAPE '\\'"));
    }

    if let Some(min_amount) = query.min_amount {
        let placeholder = filter.push(Value::Real(min_amount));
        filter.and(format!("t.amount >= {placeholder}"));
    }

    if let Some(max_amount) = query.max_amount {
        let placeholder = filter.push(Value::Real(max_amount));
        filter.and(format!("t.amount <= {placeholder}"));
    }

    let where_clause = filter.where_clause();

    let total_count: i64 = connection
        .query_row(
            &format!("SELECT COUNT(*) FROM transactions t {where_clause}"),
            params_from_iter(filter.params.iter()),
            |row| row.get(0),
        )
        .store_context("count transactions")?;

    let order = query.order.unwrap_or_default().keyword();
    let sort_column = query.sort.unwrap_or_default().column();
    let limit = filter.push(Value::Integer(i64::try_from(page.size).unwrap_or(i64::MAX)));
    let offset = filter.push(Value::Integer(i64::try_from(page.offset()).unwrap_or(i64::MAX)));

    let mut transactions = connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t {where_clause}
            ORDER BY {sort_column} {order}, t.id {order}
            LIMIT {limit} OFFSET {offset}"
        ))
        .store_context("query transactions")?
        .query_map(params_from_iter(filter.params.iter()), map_transaction_row)
        .store_context("query transactions")?
        .map(|row| row.store_context("query transactions"))
        .collect::<Result<Vec<_>, Error>>()?;

    let ids: Vec<TransactionId> = transactions.iter().map(|transaction| transaction.id).collect();
    let mut tag_names_by_transaction = get_tag_names_for_transactions(&ids, connection)?;

    for transaction in &mut transactions {
        transaction.tags = tag_names_by_transaction
            .remove(&transaction.id)
            .unwrap_or_default();
    }

    Ok(TransactionPage {
        transactions,
        total_count: total_count as u64,
    })
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// The state needed for listing transactions.
#[derive(Clone)]
pub struct TransactionsState {
    pub db_pool: DbPool,
    pub pagination_config: PaginationConfig,
}

impl FromRef<AppState> for TransactionsState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_pool: state.db_pool.clone(),
            pagination_config: state.pagination_config.clone(),
        }
    }
}

/// A route handler for listing transactions the current user can view.
///
/// The total number of matches is sent in the `X-Total-Count` header.
pub async fn get_transactions_endpoint(
    State(state): State<TransactionsState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<TransactionQuery>,
) -> Result<impl IntoResponse, Error> {
    let page = state.pagination_config.page(query.page, query.per_page);
    let connection = state.db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let visible = scopes.resolve(Role::View, &connection)?;
    let result = query_transactions(visible, &query, page, &connection)?;

    Ok((
        [(TOTAL_COUNT_HEADER, result.total_count.to_string())],
        Json(result.transactions),
    ))
}

/// A route handler for getting a transaction by its database ID.
pub async fn get_transaction_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<Transaction>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Transactions, transaction_id, Role::View, &connection)?;

    get_transaction(transaction_id, &connection).map(Json)
}

/// A route handler for creating a new transaction.
pub async fn create_transaction_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<TransactionRequest>,
) -> Result<(StatusCode, Json<Transaction>), Error> {
    let (requested_scope, fields) = request.into_fields()?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let scope_id = scopes.write_target(requested_scope, &connection)?;
    let transaction = create_transaction(scope_id, fields, &mut scopes, &connection)?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// A route handler for replacing a transaction's fields and tags.
pub async fn update_transaction_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<TransactionId>,
    Json(request): Json<TransactionRequest>,
) -> Result<Json<Transaction>, Error> {
    let (requested_scope, fields) = request.into_fields()?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let current_scope = scopes.authorize_row(
        ScopedTable::Transactions,
        transaction_id,
        Role::Write,
        &connection,
    )?;
    let scope_id = scopes.write_target(Some(requested_scope.unwrap_or(current_scope)), &connection)?;

    update_transaction(transaction_id, scope_id, fields, &mut scopes, &connection).map(Json)
}

/// A route handler for deleting a transaction.
pub async fn delete_transaction_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Transactions, transaction_id, Role::Write, &connection)?;
    delete_transaction(transaction_id, &connection)?;

    Ok(Json(json!({ "id": transaction_id })))
}

/// A route handler for listing a transaction's tags.
pub async fn get_transaction_tags_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<Vec<Tag>>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Transactions, transaction_id, Role::View, &connection)?;

    get_transaction_tags(transaction_id, &connection).map(Json)
}

#[derive(Debug, Deserialize)]
pub struct AddTagRequest {
    pub name: String,
}

/// A route handler for tagging a transaction by tag name.
///
/// The tag is created in the transaction's scope if it does not exist.
pub async fn add_transaction_tag_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<TransactionId>,
    Json(request): Json<AddTagRequest>,
) -> Result<(StatusCode, Json<Tag>), Error> {
    let name = TagName::new(&request.name)?;
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    let scope_id = scopes.authorize_row(
        ScopedTable::Transactions,
        transaction_id,
        Role::Write,
        &connection,
    )?;

    let tag = with_transaction(&connection, |tx| {
        let tag = get_or_create_tag(scope_id, name, principal.user_id, tx)?;
        add_tag_to_transaction(transaction_id, tag.id, tx)?;
        Ok(tag)
    })?;

    Ok((StatusCode::CREATED, Json(tag)))
}

/// A route handler for removing a tag from a transaction.
pub async fn remove_transaction_tag_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path((transaction_id, tag_id)): Path<(TransactionId, TagId)>,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = db_pool.get().await?;
    let mut scopes = ScopeResolver::new(principal.user_id);

    scopes.authorize_row(ScopedTable::Transactions, transaction_id, Role::Write, &connection)?;
    remove_tag_from_transaction(transaction_id, tag_id, &connection)?;

    Ok(Json(json!({ "id": tag_id })))
}

#[cfg(test)]
mod transaction_type_tests {
    use super::TransactionType;

    #[test]
    fn parses_either_case() {
        assert_eq!("income".parse(), Ok(TransactionType::Income));
        assert_eq!("EXPENSE".parse(), Ok(TransactionType::Expense));
        assert!("refund".parse::<TransactionType>().is_err());
    }

    #[test]
    fn serializes_as_upper_case() {
        assert_eq!(
            serde_json::to_string(&TransactionType::Income).unwrap(),
            "\"INCOME\""
        );
    }
}

#[cfg(test)]
mod coordinator_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        Error,
        category::{CategoryName, create_category, update_category},
        database_id::ScopeId,
        db::get_test_connection,
        group::{NewGroup, create_group},
        resolver::ScopeResolver,
        role::Role,
        source::{SourceName, create_source, update_source},
        tag::{TagName, update_tag},
        transaction_tag::get_transaction_tags,
        user::{User, test_utils::create_test_user},
    };

    use super::{
        TransactionFields, TransactionRequest, TransactionType, create_transaction,
        delete_transaction, get_transaction, update_transaction,
    };

    fn home_group(owner: &User, members: &[(&User, Role)], connection: &Connection) -> ScopeId {
        let member_roles: Vec<_> = members.iter().map(|(user, role)| (user.id, *role)).collect();

        create_group(
            owner.id,
            NewGroup {
                name: "Home".to_owned(),
                description: String::new(),
                icon: String::new(),
            },
            &member_roles,
            connection,
        )
        .unwrap()
        .scope_id
    }

    fn fields_for(user: &User, tags: &[&str], connection: &Connection) -> TransactionFields {
        let scope_id = user.scope_id.unwrap();
        let source = create_source(
            scope_id,
            user.id,
            SourceName::new("Wallet").unwrap(),
            "",
            connection,
        )
        .unwrap();
        let category = create_category(
            scope_id,
            user.id,
            CategoryName::new("Food").unwrap(),
            "",
            connection,
        )
        .unwrap();

        TransactionFields {
            source_id: source.id,
            category_id: category.id,
            transaction_type: TransactionType::Expense,
            amount: 12.3,
            date: date!(2025 - 03 - 14),
            description: "Lunch".to_owned(),
            tags: tags.iter().map(|tag| TagName::new(tag).unwrap()).collect(),
        }
    }

    fn count(table: &str, connection: &Connection) -> i64 {
        connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn request_validation_normalizes_tags() {
        let request: TransactionRequest = serde_json::from_value(serde_json::json!({
            "source_id": 1,
            "category_id": 2,
            "type": "EXPENSE",
            "amount": 4.5,
            "date": "2025-01-31",
            "tags": ["food", "food", " "]
        }))
        .unwrap();

        let (scope_id, fields) = request.into_fields().unwrap();

        assert_eq!(scope_id, None);
        assert_eq!(fields.tags, vec![TagName::new_unchecked("food")]);
        assert_eq!(fields.description, "");
    }

    #[test]
    fn request_validation_rejects_negative_amount() {
        let request: TransactionRequest = serde_json::from_value(serde_json::json!({
            "source_id": 1,
            "category_id": 2,
            "type": "INCOME",
            "amount": -1.0,
            "date": "2025-01-31"
        }))
        .unwrap();

        assert!(matches!(request.into_fields(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn create_creates_missing_tags_in_scope() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let fields = fields_for(&alice, &["food", "work"], &connection);
        let mut scopes = ScopeResolver::new(alice.id);

        let transaction =
            create_transaction(alice.scope_id.unwrap(), fields, &mut scopes, &connection).unwrap();

        assert_eq!(transaction.tags, vec!["food".to_owned(), "work".to_owned()]);
        assert_eq!(transaction.user_id, Some(alice.id));
        assert_eq!(transaction.date, date!(2025 - 03 - 14));
        assert_eq!(count("tags", &connection), 2);
    }

    #[test]
    fn update_replaces_tags_and_reuses_existing_ones() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let scope_id = alice.scope_id.unwrap();
        let fields = fields_for(&alice, &["food"], &connection);
        let mut scopes = ScopeResolver::new(alice.id);
        let transaction =
            create_transaction(scope_id, fields.clone(), &mut scopes, &connection).unwrap();

        let updated = update_transaction(
            transaction.id,
            scope_id,
            TransactionFields {
                amount: 20.0,
                description: "Dinner".to_owned(),
                tags: vec![TagName::new_unchecked("food"), TagName::new_unchecked("treat")],
                ..fields
            },
            &mut scopes,
            &connection,
        )
        .unwrap();

        let got = get_transaction(transaction.id, &connection).unwrap();
        assert_eq!(got, updated);
        assert_eq!(got.amount, 20.0);
        assert_eq!(got.description, "Dinner");
        assert_eq!(got.tags, vec!["food".to_owned(), "treat".to_owned()]);
        assert_eq!(count("tags", &connection), 2);
    }

    #[test]
    fn create_rolls_back_when_reference_is_not_writable() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let mut fields = fields_for(&alice, &["food"], &connection);
        // Bob's source is in a scope Alice cannot see.
        fields.source_id = fields_for(&bob, &[], &connection).source_id;
        let mut scopes = ScopeResolver::new(alice.id);

        let result = create_transaction(alice.scope_id.unwrap(), fields, &mut scopes, &connection);

        assert!(matches!(result, Err(Error::InvalidInput(_))), "got {result:?}");
        assert_eq!(count("transactions", &connection), 0);
        assert_eq!(count("tags", &connection), 0);
    }

    #[test]
    fn viewer_cannot_create_in_group() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let carol = create_test_user("carol", &connection);
        let group_scope = home_group(&alice, &[(&carol, Role::View)], &connection);
        let fields = fields_for(&carol, &[], &connection);
        let mut scopes = ScopeResolver::new(carol.id);

        let result = create_transaction(group_scope, fields, &mut scopes, &connection);

        assert_eq!(result, Err(Error::Forbidden));
    }

    #[test]
    fn references_must_share_the_transaction_scope() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let group_scope = home_group(&alice, &[(&bob, Role::Write)], &connection);
        let mut fields = fields_for(&bob, &["food"], &connection);
        fields.source_id = create_source(
            group_scope,
            bob.id,
            SourceName::new("Joint account").unwrap(),
            "",
            &connection,
        )
        .unwrap()
        .id;
        let mut scopes = ScopeResolver::new(bob.id);

        let result = create_transaction(bob.scope_id.unwrap(), fields, &mut scopes, &connection);

        assert!(matches!(result, Err(Error::InvalidInput(_))), "got {result:?}");
        assert_eq!(count("transactions", &connection), 0);
    }

    #[test]
    fn rows_used_by_transactions_cannot_leave_their_scope() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let scope_id = alice.scope_id.unwrap();
        let group_scope = home_group(&alice, &[], &connection);
        let fields = fields_for(&alice, &["food"], &connection);
        let mut scopes = ScopeResolver::new(alice.id);
        let transaction =
            create_transaction(scope_id, fields.clone(), &mut scopes, &connection).unwrap();
        let tag = get_transaction_tags(transaction.id, &connection).unwrap().remove(0);

        assert!(matches!(
            update_source(fields.source_id, group_scope, SourceName::new("Wallet").unwrap(), "", &connection),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            update_category(fields.category_id, group_scope, CategoryName::new("Food").unwrap(), "", &connection),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            update_tag(tag.id, group_scope, TagName::new("food").unwrap(), &connection),
            Err(Error::InvalidInput(_))
        ));

        let renamed =
            update_tag(tag.id, scope_id, TagName::new("groceries").unwrap(), &connection).unwrap();
        assert_eq!(renamed.scope_id, scope_id);
        assert_eq!(
            get_transaction(transaction.id, &connection).unwrap().tags,
            vec!["groceries".to_owned()]
        );

        delete_transaction(transaction.id, &connection).unwrap();
        let moved = update_source(
            fields.source_id,
            group_scope,
            SourceName::new("Wallet").unwrap(),
            "",
            &connection,
        )
        .unwrap();
        assert_eq!(moved.scope_id, group_scope);
    }

    #[test]
    fn delete_cascades_tag_links() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let fields = fields_for(&alice, &["food"], &connection);
        let mut scopes = ScopeResolver::new(alice.id);
        let transaction =
            create_transaction(alice.scope_id.unwrap(), fields, &mut scopes, &connection).unwrap();

        delete_transaction(transaction.id, &connection).unwrap();

        assert_eq!(get_transaction(transaction.id, &connection), Err(Error::NotFound));
        assert_eq!(count("transaction_tags", &connection), 0);
        assert_eq!(count("tags", &connection), 1, "tags outlive their transactions");
    }
}
