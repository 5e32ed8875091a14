//! Groups: shared scopes with a human readable name.
//!
//! A group is created with its own `group` scope. The creator owns the scope,
//! invited users hold `view` or `write`, and only the owner may change who is
//! in the group or delete it.

use std::collections::BTreeMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::{
    Error,
    auth::Principal,
    database_id::{GroupId, ScopeId, UserID},
    db::{DbPool, with_transaction},
    error::StoreContext,
    membership::{
        UserScope, delete_scope_memberships, delete_user_scope, get_scope_members,
        get_user_scope, upsert_user_scope,
    },
    role::Role,
    scope::{ScopeType, create_scope, delete_scope},
    user::{get_user_by_id, get_user_by_username},
};

/// The status every group is created with.
pub const GROUP_STATUS_ACTIVE: &str = "active";

/// A group of users sharing a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    /// The group's ID in the application database.
    pub id: GroupId,
    /// The user who created the group and owns its scope.
    pub owner_id: UserID,
    /// The scope the group's data lives in.
    pub scope_id: ScopeId,
    /// The name shown to members.
    pub name: String,
    /// Free text describing the group.
    pub description: String,
    /// An icon name or emoji for the group.
    pub icon: String,
    /// Always "active" for groups that still exist.
    pub status: String,
    /// When the group was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the group was last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The descriptive fields of a new group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub icon: String,
}

/// Create the groups table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_group_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS \"groups\" (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            scope_id INTEGER NOT NULL UNIQUE REFERENCES scopes(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            icon TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_groups_owner ON \"groups\"(owner_id);",
    )
}

const GROUP_COLUMNS: &str =
    "g.id, g.owner_id, g.scope_id, g.name, g.description, g.icon, g.status, g.created_at, g.updated_at";

/// Create a group owned by `creator` and add the proposed members.
///
/// A role proposed for the creator is ignored; the creator is always the
/// owner. All writes happen in one transaction.
///
/// # Errors
/// Returns [Error::InvalidRole] if any proposed role is not `view` or
/// `write`, [Error::NotFound] if a proposed member does not exist, or a store
/// error if a write fails. Nothing is written on error.
pub fn create_group(
    creator: UserID,
    new_group: NewGroup,
    member_roles: &[(UserID, Role)],
    connection: &Connection,
) -> Result<Group, Error> {
    if let Some((_, role)) = member_roles
        .iter()
        .find(|(user_id, role)| *user_id != creator && !role.is_member_role())
    {
        return Err(Error::InvalidRole(role.to_string()));
    }

    with_transaction(connection, |tx| {
        let scope = create_scope(ScopeType::Group, tx)?;
        let now = OffsetDateTime::now_utc();

        tx.execute(
            "INSERT INTO \"groups\" (owner_id, scope_id, name, description, icon, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            (
                creator,
                scope.id,
                &new_group.name,
                &new_group.description,
                &new_group.icon,
                GROUP_STATUS_ACTIVE,
                now,
            ),
        )
        .store_context("insert group")?;
        let group_id = tx.last_insert_rowid();

        upsert_user_scope(creator, scope.id, Role::Owner, tx)?;

        for &(user_id, role) in member_roles {
            if user_id == creator {
                tracing::info!(
                    "ignoring role \"{role}\" proposed for the creator of group {group_id}"
                );
                continue;
            }

            get_user_by_id(user_id, tx)?;
            upsert_user_scope(user_id, scope.id, role, tx)?;
        }

        Ok(Group {
            id: group_id,
            owner_id: creator,
            scope_id: scope.id,
            name: new_group.name,
            description: new_group.description,
            icon: new_group.icon,
            status: GROUP_STATUS_ACTIVE.to_owned(),
            created_at: now,
            updated_at: now,
        })
    })
}

/// Get the group with `group_id`, regardless of who is asking.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such group.
pub fn get_group(group_id: GroupId, connection: &Connection) -> Result<Group, Error> {
    connection
        .query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM \"groups\" g WHERE g.id = ?1"),
            [group_id],
            map_row,
        )
        .store_context("get group")
}

/// Get the group with `group_id` if `user_id` is a member of it.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such group or the user is not a
/// member, so non-members cannot tell the two apart.
pub fn get_group_for_member(
    group_id: GroupId,
    user_id: UserID,
    connection: &Connection,
) -> Result<(Group, UserScope), Error> {
    let group = get_group(group_id, connection)?;
    let membership = get_user_scope(user_id, group.scope_id, connection)?;

    Ok((group, membership))
}

/// Get the group with `group_id` if `actor` owns it.
///
/// # Errors
/// Returns [Error::NotFound] if the actor cannot see the group, or
/// [Error::Forbidden] if they can but do not own it.
fn get_group_for_owner(
    group_id: GroupId,
    actor: UserID,
    connection: &Connection,
) -> Result<Group, Error> {
    let (group, membership) = get_group_for_member(group_id, actor, connection)?;

    if group.owner_id != actor || membership.role != Role::Owner {
        return Err(Error::Forbidden);
    }

    Ok(group)
}

/// Get every group `user_id` is a member of.
///
/// # Errors
/// Returns an error if the query fails.
pub fn get_groups_for_user(user_id: UserID, connection: &Connection) -> Result<Vec<Group>, Error> {
    connection
        .prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM \"groups\" g
            INNER JOIN user_scopes us ON us.scope_id = g.scope_id
            WHERE us.user_id = ?1
            ORDER BY g.id ASC"
        ))
        .store_context("list groups")?
        .query_map([user_id], map_row)
        .store_context("list groups")?
        .map(|row| row.store_context("list groups"))
        .collect()
}

/// Get every group owned by `user_id`.
///
/// # Errors
/// Returns an error if the query fails.
pub fn get_groups_owned_by(user_id: UserID, connection: &Connection) -> Result<Vec<Group>, Error> {
    connection
        .prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM \"groups\" g WHERE g.owner_id = ?1 ORDER BY g.id ASC"
        ))
        .store_context("list owned groups")?
        .query_map([user_id], map_row)
        .store_context("list owned groups")?
        .map(|row| row.store_context("list owned groups"))
        .collect()
}

/// Give `user_id` the role `role` in the group, or change their role if they
/// are already a member.
///
/// # Errors
/// Returns [Error::NotFound] if the actor cannot see the group or the target
/// user does not exist, [Error::Forbidden] if the actor is not the owner,
/// [Error::InvalidRole] if `role` is `owner`, or [Error::InvalidInput] if the
/// target is the owner.
pub fn add_group_member(
    actor: UserID,
    group_id: GroupId,
    user_id: UserID,
    role: Role,
    connection: &Connection,
) -> Result<UserScope, Error> {
    if !role.is_member_role() {
        return Err(Error::InvalidRole(role.to_string()));
    }

    with_transaction(connection, |tx| {
        let group = get_group_for_owner(group_id, actor, tx)?;

        if user_id == group.owner_id {
            return Err(Error::InvalidInput(
                "the owner's role cannot be changed".to_owned(),
            ));
        }

        get_user_by_id(user_id, tx)?;

        upsert_user_scope(user_id, group.scope_id, role, tx)
    })
}

/// Remove `user_id` from the group.
///
/// # Errors
/// Returns [Error::NotFound] if the actor cannot see the group or the target
/// is not a member, [Error::Forbidden] if the actor is not the owner, or
/// [Error::InvalidInput] if the owner tries to remove themselves.
pub fn remove_group_member(
    actor: UserID,
    group_id: GroupId,
    user_id: UserID,
    connection: &Connection,
) -> Result<(), Error> {
    with_transaction(connection, |tx| {
        let group = get_group_for_owner(group_id, actor, tx)?;

        if user_id == group.owner_id {
            return Err(Error::InvalidInput(
                "the owner cannot leave their own group".to_owned(),
            ));
        }

        delete_user_scope(user_id, group.scope_id, tx)
    })
}

/// Delete the group along with its scope, memberships and data.
///
/// # Errors
/// Returns [Error::NotFound] if the actor cannot see the group, or
/// [Error::Forbidden] if they do not own it.
pub fn delete_group(actor: UserID, group_id: GroupId, connection: &Connection) -> Result<(), Error> {
    with_transaction(connection, |tx| {
        let group = get_group_for_owner(group_id, actor, tx)?;

        delete_group_records(&group, tx)
    })
}

/// Delete the memberships, row and scope of `group` without any access
/// checks. Data rows in the scope are removed by the schema's cascades.
///
/// # Errors
/// Returns an error if any delete fails.
pub(crate) fn delete_group_records(group: &Group, connection: &Connection) -> Result<(), Error> {
    with_transaction(connection, |tx| {
        delete_scope_memberships(group.scope_id, tx)?;
        tx.execute("DELETE FROM \"groups\" WHERE id = ?1", [group.id])
            .store_context("delete group")?;
        delete_scope(group.scope_id, tx)?;

        tracing::info!("deleted group {} and scope {}", group.id, group.scope_id);

        Ok(())
    })
}

fn map_row(row: &Row) -> Result<Group, rusqlite::Error> {
    Ok(Group {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        scope_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        icon: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// The request body for creating a group.
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(alias = "name")]
    pub group_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Proposed members, keyed by username.
    #[serde(default)]
    pub user_roles: BTreeMap<String, String>,
}

/// The request body for adding a member or changing their role.
#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    #[serde(default, alias = "userID", alias = "userId")]
    pub user_id: Option<UserID>,
    #[serde(default)]
    pub username: Option<String>,
    pub role: String,
}

/// A route handler for creating a group.
pub async fn create_group_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), Error> {
    let name = request.group_name.trim().to_owned();
    if name.is_empty() {
        return Err(Error::InvalidInput("group name cannot be empty".to_owned()));
    }

    let new_group = NewGroup {
        name,
        description: request.description.unwrap_or_default(),
        icon: request.icon.unwrap_or_default(),
    };

    let connection = db_pool.get().await?;

    let mut member_roles = Vec::with_capacity(request.user_roles.len());
    for (username, role) in &request.user_roles {
        let user = get_user_by_username(username, &connection).map_err(|error| match error {
            Error::NotFound => Error::InvalidInput(format!("user \"{username}\" does not exist")),
            error => error,
        })?;

        // The creator is always the owner, whatever role was proposed.
        if user.id == principal.user_id {
            continue;
        }

        member_roles.push((user.id, role.parse::<Role>()?));
    }

    let group = create_group(principal.user_id, new_group, &member_roles, &connection)?;

    Ok((StatusCode::CREATED, Json(group)))
}

/// A route handler for listing the groups the current user belongs to.
pub async fn get_groups_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Group>>, Error> {
    let connection = db_pool.get().await?;

    get_groups_for_user(principal.user_id, &connection).map(Json)
}

/// A route handler for getting a group the current user belongs to.
pub async fn get_group_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Group>, Error> {
    let connection = db_pool.get().await?;

    get_group_for_member(group_id, principal.user_id, &connection).map(|(group, _)| Json(group))
}

/// A route handler for deleting a group.
pub async fn delete_group_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Value>, Error> {
    let connection = db_pool.get().await?;

    delete_group(principal.user_id, group_id, &connection)?;

    Ok(Json(json!({ "id": group_id })))
}

/// A route handler for listing the members of a group.
pub async fn get_group_members_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Vec<UserScope>>, Error> {
    let connection = db_pool.get().await?;

    let (group, _) = get_group_for_member(group_id, principal.user_id, &connection)?;

    get_scope_members(group.scope_id, &connection).map(Json)
}

/// A route handler for adding a member to a group or changing their role.
pub async fn add_group_member_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path(group_id): Path<GroupId>,
    Json(request): Json<AddMemberRequest>,
) -> Result<Json<UserScope>, Error> {
    let role: Role = request.role.parse()?;

    let connection = db_pool.get().await?;

    let user_id = match (request.user_id, request.username.as_deref()) {
        (Some(user_id), _) => user_id,
        (None, Some(username)) => get_user_by_username(username.trim(), &connection)?.id,
        (None, None) => {
            return Err(Error::InvalidInput(
                "either user_id or username is required".to_owned(),
            ));
        }
    };

    add_group_member(principal.user_id, group_id, user_id, role, &connection).map(Json)
}

/// A route handler for removing a member from a group.
pub async fn remove_group_member_endpoint(
    State(db_pool): State<DbPool>,
    Extension(principal): Extension<Principal>,
    Path((group_id, user_id)): Path<(GroupId, UserID)>,
) -> Result<Json<Value>, Error> {
    let connection = db_pool.get().await?;

    remove_group_member(principal.user_id, group_id, user_id, &connection)?;

    Ok(Json(json!({ "group_id": group_id, "user_id": user_id })))
}

#[cfg(test)]
mod tests {
    use crate::{
        Error,
        db::get_test_connection,
        membership::{get_scope_members, get_user_scope},
        role::Role,
        scope::{ScopeType, get_scope, scope_exists},
        user::{delete_user, test_utils::create_test_user},
    };

    use super::{
        NewGroup, add_group_member, create_group, delete_group, get_group, get_groups_for_user,
        remove_group_member,
    };

    fn new_group(name: &str) -> NewGroup {
        NewGroup {
            name: name.to_owned(),
            description: String::new(),
            icon: String::new(),
        }
    }

    #[test]
    fn create_group_seeds_owner_and_members() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let carol = create_test_user("carol", &connection);

        let group = create_group(
            alice.id,
            new_group("Home"),
            &[(bob.id, Role::Write), (carol.id, Role::View)],
            &connection,
        )
        .unwrap();

        assert_eq!(get_scope(group.scope_id, &connection).unwrap().scope_type, ScopeType::Group);
        assert_eq!(group.owner_id, alice.id);
        let role_of = |user| get_user_scope(user, group.scope_id, &connection).unwrap().role;
        assert_eq!(role_of(alice.id), Role::Owner);
        assert_eq!(role_of(bob.id), Role::Write);
        assert_eq!(role_of(carol.id), Role::View);
    }

    #[test]
    fn role_proposed_for_creator_is_ignored() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);

        let group =
            create_group(alice.id, new_group("Solo"), &[(alice.id, Role::View)], &connection)
                .unwrap();

        assert_eq!(
            get_user_scope(alice.id, group.scope_id, &connection).unwrap().role,
            Role::Owner
        );
        assert_eq!(get_scope_members(group.scope_id, &connection).unwrap().len(), 1);
    }

    #[test]
    fn owner_role_for_member_is_rejected_without_writes() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);

        let result = create_group(alice.id, new_group("Home"), &[(bob.id, Role::Owner)], &connection);

        assert_eq!(result, Err(Error::InvalidRole("owner".to_owned())));
        assert!(get_groups_for_user(alice.id, &connection).unwrap().is_empty());
    }

    #[test]
    fn only_owner_can_add_members() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let carol = create_test_user("carol", &connection);
        let dave = create_test_user("dave", &connection);
        let group =
            create_group(alice.id, new_group("Home"), &[(bob.id, Role::Write)], &connection)
                .unwrap();

        assert_eq!(
            add_group_member(bob.id, group.id, carol.id, Role::View, &connection).map(|_| ()),
            Err(Error::Forbidden)
        );
        assert_eq!(
            add_group_member(dave.id, group.id, carol.id, Role::View, &connection).map(|_| ()),
            Err(Error::NotFound),
            "non-members must not learn the group exists"
        );

        add_group_member(alice.id, group.id, carol.id, Role::View, &connection).unwrap();
        add_group_member(alice.id, group.id, carol.id, Role::Write, &connection).unwrap();
        assert_eq!(
            get_user_scope(carol.id, group.scope_id, &connection).unwrap().role,
            Role::Write
        );
    }

    #[test]
    fn owner_cannot_be_demoted_or_removed() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let group = create_group(alice.id, new_group("Home"), &[], &connection).unwrap();

        assert!(matches!(
            add_group_member(alice.id, group.id, alice.id, Role::View, &connection),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            remove_group_member(alice.id, group.id, alice.id, &connection),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            add_group_member(alice.id, group.id, alice.id, Role::Owner, &connection),
            Err(Error::InvalidRole(_))
        ));
    }

    #[test]
    fn removing_non_member_is_not_found() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let group = create_group(alice.id, new_group("Home"), &[], &connection).unwrap();

        assert_eq!(
            remove_group_member(alice.id, group.id, bob.id, &connection),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn delete_group_removes_scope_and_memberships() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let group =
            create_group(alice.id, new_group("Home"), &[(bob.id, Role::Write)], &connection)
                .unwrap();

        assert_eq!(delete_group(bob.id, group.id, &connection), Err(Error::Forbidden));
        delete_group(alice.id, group.id, &connection).unwrap();

        assert_eq!(get_group(group.id, &connection), Err(Error::NotFound));
        assert_eq!(scope_exists(group.scope_id, &connection), Ok(false));
        assert!(get_scope_members(group.scope_id, &connection).unwrap().is_empty());
    }

    #[test]
    fn deleting_owner_deletes_their_groups() {
        let connection = get_test_connection();
        let alice = create_test_user("alice", &connection);
        let bob = create_test_user("bob", &connection);
        let group =
            create_group(alice.id, new_group("Home"), &[(bob.id, Role::View)], &connection)
                .unwrap();

        delete_user(alice.id, &connection).unwrap();

        assert_eq!(get_group(group.id, &connection), Err(Error::NotFound));
        assert!(get_groups_for_user(bob.id, &connection).unwrap().is_empty());
    }
}
