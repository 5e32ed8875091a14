//! The fixed capability ladder `view < write < owner`.

use std::{fmt::Display, str::FromStr};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::Error;

/// A position a user holds in a scope.
///
/// Variants are declared in rank order so the derived ordering matches the
/// hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May read rows in the scope.
    View,
    /// May read, create, update and delete rows in the scope.
    Write,
    /// Full control of the scope, including its membership.
    Owner,
}

impl Role {
    /// Every role, lowest rank first.
    pub const ALL: [Role; 3] = [Role::View, Role::Write, Role::Owner];

    /// The numeric rank of the role: `view` = 1, `write` = 2, `owner` = 3.
    pub fn rank(self) -> u8 {
        match self {
            Role::View => 1,
            Role::Write => 2,
            Role::Owner => 3,
        }
    }

    /// Whether holding `self` is enough for an operation that requires `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    /// The roles that satisfy `required`, used to build `IN` predicates.
    pub fn satisfying(required: Role) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| role.satisfies(required))
            .collect()
    }

    /// Whether the role can be granted to a group member other than the owner.
    pub fn is_member_role(self) -> bool {
        matches!(self, Role::View | Role::Write)
    }

    /// The lowercase name stored in the database and used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::View => "view",
            Role::Write => "write",
            Role::Owner => "owner",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Role::View),
            "write" => Ok(Role::Write),
            "owner" => Ok(Role::Owner),
            _ => Err(Error::InvalidRole(s.to_owned())),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

#[cfg(test)]
mod tests {
    use crate::Error;

    use super::Role;

    #[test]
    fn ranks_are_ordered() {
        assert!(Role::Owner > Role::Write);
        assert!(Role::Write > Role::View);
        assert_eq!(Role::Owner.rank(), 3);
        assert_eq!(Role::Write.rank(), 2);
        assert_eq!(Role::View.rank(), 1);
    }

    #[test]
    fn satisfies_is_rank_comparison() {
        for held in Role::ALL {
            for required in Role::ALL {
                assert_eq!(
                    held.satisfies(required),
                    held.rank() >= required.rank(),
                    "{held} satisfies {required}"
                );
            }
        }
    }

    #[test]
    fn satisfying_lists_roles_at_or_above() {
        assert_eq!(
            Role::satisfying(Role::View),
            vec![Role::View, Role::Write, Role::Owner]
        );
        assert_eq!(Role::satisfying(Role::Write), vec![Role::Write, Role::Owner]);
        assert_eq!(Role::satisfying(Role::Owner), vec![Role::Owner]);
    }

    #[test]
    fn parse_rejects_unknown_role() {
        assert_eq!("admin".parse::<Role>(), Err(Error::InvalidRole("admin".to_owned())));
        assert_eq!(" Write ".parse::<Role>(), Ok(Role::Write));
    }

    #[test]
    fn only_view_and_write_are_member_roles() {
        assert!(Role::View.is_member_role());
        assert!(Role::Write.is_member_role());
        assert!(!Role::Owner.is_member_role());
    }
}
