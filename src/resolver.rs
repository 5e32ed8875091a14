//! Resolves the set of scopes a user may act on at a given role.
//!
//! Data queries never filter by user ID. They ask a [ScopeResolver] for the
//! scopes the principal holds a sufficient role in and restrict their
//! `WHERE` clause to those scope IDs.

use std::collections::{BTreeSet, HashMap};

use rusqlite::{Connection, OptionalExtension, types::Value};

use crate::{
    Error,
    database_id::{DatabaseId, ScopeId, UserID},
    error::StoreContext,
    membership::{get_user_scopes_by_role, sql_placeholders},
    role::Role,
    user::get_personal_scope,
};

/// The scope IDs a user holds at least some role in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<ScopeId>);

impl ScopeSet {
    /// Whether `scope_id` is in the set.
    pub fn contains(&self, scope_id: ScopeId) -> bool {
        self.0.contains(&scope_id)
    }

    /// Whether the set has no scopes, in which case no rows are visible.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Positional placeholders for an `IN (...)` list, numbered from `first`.
    pub fn placeholders(&self, first: usize) -> String {
        sql_placeholders(self.0.len(), first)
    }

    /// The scope IDs as SQL parameter values, matching [ScopeSet::placeholders].
    pub fn sql_values(&self) -> Vec<Value> {
        self.0.iter().map(|id| Value::Integer(id.as_i64())).collect()
    }

    /// Fail with [Error::Forbidden] unless `scope_id` is in the set.
    pub fn require(&self, scope_id: ScopeId) -> Result<(), Error> {
        if self.contains(scope_id) {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }
}

impl FromIterator<ScopeId> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = ScopeId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Compute the scopes in which `user_id` holds at least `required`.
///
/// # Errors
/// Returns an error if the membership query fails.
pub fn resolve_scopes(
    user_id: UserID,
    required: Role,
    connection: &Connection,
) -> Result<ScopeSet, Error> {
    Ok(get_user_scopes_by_role(user_id, required, connection)?
        .into_iter()
        .map(|membership| membership.scope_id)
        .collect())
}

/// The scoped tables that rows can be addressed in by ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopedTable {
    /// The `sources` table.
    Sources,
    /// The `categories` table.
    Categories,
    /// The `tags` table.
    Tags,
    /// The `transactions` table.
    Transactions,
}

impl ScopedTable {
    fn name(self) -> &'static str {
        match self {
            ScopedTable::Sources => "sources",
            ScopedTable::Categories => "categories",
            ScopedTable::Tags => "tags",
            ScopedTable::Transactions => "transactions",
        }
    }
}

/// Caches scope resolutions for a single request.
///
/// Call [ScopeResolver::invalidate] after changing memberships so that later
/// resolutions see the change.
#[derive(Debug)]
pub struct ScopeResolver {
    user_id: UserID,
    cache: HashMap<Role, ScopeSet>,
}

impl ScopeResolver {
    /// Create a resolver for the principal `user_id`.
    pub fn new(user_id: UserID) -> Self {
        Self {
            user_id,
            cache: HashMap::new(),
        }
    }

    /// The principal the scopes are resolved for.
    pub fn user_id(&self) -> UserID {
        self.user_id
    }

    /// The scopes in which the principal holds at least `required`.
    ///
    /// # Errors
    /// Returns an error if the membership query fails.
    pub fn resolve(&mut self, required: Role, connection: &Connection) -> Result<&ScopeSet, Error> {
        if !self.cache.contains_key(&required) {
            let scopes = resolve_scopes(self.user_id, required, connection)?;
            self.cache.insert(required, scopes);
        }

        self.cache
            .get(&required)
            .ok_or_else(|| Error::Internal("scope resolution cache miss".to_owned()))
    }

    /// Fail with [Error::Forbidden] unless the principal holds at least
    /// `required` in `scope_id`.
    ///
    /// # Errors
    /// Returns [Error::Forbidden], or an error if the membership query fails.
    pub fn require(
        &mut self,
        scope_id: ScopeId,
        required: Role,
        connection: &Connection,
    ) -> Result<(), Error> {
        self.resolve(required, connection)?.require(scope_id)
    }

    /// Pick the scope a new row is written to: `requested`, or the principal's
    /// personal scope when none is given. The principal must hold `write` in it.
    ///
    /// # Errors
    /// Returns [Error::Forbidden] if the principal cannot write to the scope.
    pub fn write_target(
        &mut self,
        requested: Option<ScopeId>,
        connection: &Connection,
    ) -> Result<ScopeId, Error> {
        let scope_id = match requested {
            Some(scope_id) => scope_id,
            None => get_personal_scope(self.user_id, connection)?,
        };

        self.require(scope_id, Role::Write, connection)?;

        Ok(scope_id)
    }

    /// Find the scope of the row `id` in `table` and check the principal may
    /// act on it with `required`.
    ///
    /// The row is first looked up among the scopes the principal can view, so
    /// a row in a scope they cannot see is reported as missing rather than
    /// forbidden.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the row is not visible to the principal,
    /// or [Error::Forbidden] if it is visible but `required` is not held.
    pub fn authorize_row(
        &mut self,
        table: ScopedTable,
        id: DatabaseId,
        required: Role,
        connection: &Connection,
    ) -> Result<ScopeId, Error> {
        let visible = self.resolve(Role::View, connection)?;
        if visible.is_empty() {
            return Err(Error::NotFound);
        }

        let query = format!(
            "SELECT scope_id FROM {} WHERE id = ?1 AND scope_id IN ({})",
            table.name(),
            visible.placeholders(2)
        );
        let mut params = vec![Value::Integer(id)];
        params.extend(visible.sql_values());

        let scope_id: ScopeId = connection
            .query_row(&query, rusqlite::params_from_iter(params), |row| row.get(0))
            .optional()
            .store_context("authorize row")?
            .ok_or(Error::NotFound)?;

        self.require(scope_id, required, connection)?;

        Ok(scope_id)
    }

    /// Drop cached resolutions.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use crate::{
        Error,
        db::get_test_connection,
        membership::{delete_user_scope, test_utils::insert_bare_user, upsert_user_scope},
        role::Role,
        scope::{ScopeType, create_scope},
    };

    use super::{ScopeResolver, ScopedTable, resolve_scopes};

    #[test]
    fn resolves_scopes_at_or_above_role() {
        let connection = get_test_connection();
        let user = insert_bare_user("alice", &connection);
        let personal = create_scope(ScopeType::User, &connection).unwrap();
        let shared = create_scope(ScopeType::Group, &connection).unwrap();
        upsert_user_scope(user, personal.id, Role::Owner, &connection).unwrap();
        upsert_user_scope(user, shared.id, Role::View, &connection).unwrap();

        let viewable = resolve_scopes(user, Role::View, &connection).unwrap();
        let writable = resolve_scopes(user, Role::Write, &connection).unwrap();

        assert!(viewable.contains(personal.id) && viewable.contains(shared.id));
        assert!(writable.contains(personal.id));
        assert!(!writable.contains(shared.id));
        assert_eq!(writable.require(shared.id), Err(Error::Forbidden));
    }

    #[test]
    fn invalidate_picks_up_membership_changes() {
        let connection = get_test_connection();
        let user = insert_bare_user("alice", &connection);
        let shared = create_scope(ScopeType::Group, &connection).unwrap();
        upsert_user_scope(user, shared.id, Role::Write, &connection).unwrap();
        let mut resolver = ScopeResolver::new(user);
        assert!(resolver.resolve(Role::Write, &connection).unwrap().contains(shared.id));

        delete_user_scope(user, shared.id, &connection).unwrap();
        assert!(
            resolver.resolve(Role::Write, &connection).unwrap().contains(shared.id),
            "cached until invalidated"
        );

        resolver.invalidate();
        assert!(!resolver.resolve(Role::Write, &connection).unwrap().contains(shared.id));
    }

    #[test]
    fn authorize_row_hides_rows_in_other_scopes() {
        let connection = get_test_connection();
        let alice = insert_bare_user("alice", &connection);
        let bob = insert_bare_user("bob", &connection);
        let alices_scope = create_scope(ScopeType::User, &connection).unwrap();
        let bobs_scope = create_scope(ScopeType::User, &connection).unwrap();
        upsert_user_scope(alice, alices_scope.id, Role::Owner, &connection).unwrap();
        upsert_user_scope(bob, bobs_scope.id, Role::Owner, &connection).unwrap();
        connection
            .execute(
                "INSERT INTO sources (scope_id, user_id, name, created_at, updated_at)
                VALUES (?1, ?2, 'Wallet', ?3, ?3)",
                (alices_scope.id, alice, OffsetDateTime::now_utc()),
            )
            .unwrap();
        let source_id = connection.last_insert_rowid();

        let mut alices = ScopeResolver::new(alice);
        let mut bobs = ScopeResolver::new(bob);

        assert_eq!(
            alices.authorize_row(ScopedTable::Sources, source_id, Role::Write, &connection),
            Ok(alices_scope.id)
        );
        assert_eq!(
            bobs.authorize_row(ScopedTable::Sources, source_id, Role::View, &connection),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn authorize_row_forbids_viewers_from_writing() {
        let connection = get_test_connection();
        let alice = insert_bare_user("alice", &connection);
        let carol = insert_bare_user("carol", &connection);
        let shared = create_scope(ScopeType::Group, &connection).unwrap();
        upsert_user_scope(alice, shared.id, Role::Owner, &connection).unwrap();
        upsert_user_scope(carol, shared.id, Role::View, &connection).unwrap();
        connection
            .execute(
                "INSERT INTO categories (scope_id, user_id, name, created_at, updated_at)
                VALUES (?1, ?2, 'Food', ?3, ?3)",
                (shared.id, alice, OffsetDateTime::now_utc()),
            )
            .unwrap();
        let category_id = connection.last_insert_rowid();

        let mut carols = ScopeResolver::new(carol);

        assert_eq!(
            carols.authorize_row(ScopedTable::Categories, category_id, Role::View, &connection),
            Ok(shared.id)
        );
        assert_eq!(
            carols.authorize_row(ScopedTable::Categories, category_id, Role::Write, &connection),
            Err(Error::Forbidden)
        );
    }
}
