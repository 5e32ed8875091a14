//! The API endpoint URIs.
//!
//! For endpoints that take a parameter, e.g., '/sources/{source_id}', use [format_endpoint].

/// The route for creating a new user.
pub const REGISTER: &str = "/auth/register";
/// The route for logging in a user.
pub const LOG_IN: &str = "/auth/login";
/// The route for ending the current session.
pub const LOG_OUT: &str = "/auth/logout";
/// The route for the current user's profile.
pub const CURRENT_USER: &str = "/users/me";
/// The route for listing the scopes the current user belongs to.
pub const SCOPES: &str = "/scopes";
/// The route to access a single scope.
pub const SCOPE: &str = "/scopes/{scope_id}";
/// The route to access groups.
pub const GROUPS: &str = "/groups";
/// The route to access a single group.
pub const GROUP: &str = "/groups/{group_id}";
/// The route to access a group's members.
pub const GROUP_MEMBERS: &str = "/groups/{group_id}/members";
/// The route to remove a member from a group.
pub const GROUP_MEMBER: &str = "/groups/{group_id}/members/{user_id}";
/// The route to access sources.
pub const SOURCES: &str = "/sources";
/// The route to access a single source.
pub const SOURCE: &str = "/sources/{source_id}";
/// The route to access categories.
pub const CATEGORIES: &str = "/categories";
/// The route to access a single category.
pub const CATEGORY: &str = "/categories/{category_id}";
/// The route to access tags.
pub const TAGS: &str = "/tags";
/// The route to access a single tag.
pub const TAG: &str = "/tags/{tag_id}";
/// The route to access transactions.
pub const TRANSACTIONS: &str = "/transactions";
/// The route to access a single transaction.
pub const TRANSACTION: &str = "/transactions/{transaction_id}";
/// The route to access the tags on a transaction.
pub const TRANSACTION_TAGS: &str = "/transactions/{transaction_id}/tags";
/// The route to remove a tag from a transaction.
pub const TRANSACTION_TAG: &str = "/transactions/{transaction_id}/tags/{tag_id}";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/users/{user_id}', '{user_id}' is the parameter.
///
/// This function assumes that an endpoint path only contains ASCII characters
/// and replaces only the first parameter.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// the original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let mut param_start = None;
    let mut param_end = None;

    for (i, c) in endpoint_path.chars().enumerate() {
        if c == '{' {
            param_start = Some(i);
        } else if param_start.is_some() && c == '}' {
            param_end = Some(i + 1);
            break;
        }
    }

    let param_start = match param_start {
        Some(start) => start,
        None => return endpoint_path.to_string(),
    };

    let param_end = param_end.unwrap_or(endpoint_path.len());

    format!(
        "{}{}{}",
        &endpoint_path[..param_start],
        id,
        &endpoint_path[param_end..]
    )
}

// These tests are here so that we know when we call `Uri::from_shared` it will not panic.
#[cfg(test)]
mod endpoints_tests {
    use axum::http::Uri;

    use crate::endpoints;

    use super::format_endpoint;

    fn assert_endpoint_is_valid_uri(uri: &str) {
        assert!(uri.parse::<Uri>().is_ok());
    }

    #[test]
    fn endpoints_are_valid_uris() {
        assert_endpoint_is_valid_uri(endpoints::REGISTER);
        assert_endpoint_is_valid_uri(endpoints::LOG_IN);
        assert_endpoint_is_valid_uri(endpoints::LOG_OUT);
        assert_endpoint_is_valid_uri(endpoints::CURRENT_USER);
        assert_endpoint_is_valid_uri(endpoints::SCOPES);
        assert_endpoint_is_valid_uri(endpoints::SCOPE);
        assert_endpoint_is_valid_uri(endpoints::GROUPS);
        assert_endpoint_is_valid_uri(endpoints::GROUP);
        assert_endpoint_is_valid_uri(endpoints::GROUP_MEMBERS);
        assert_endpoint_is_valid_uri(endpoints::GROUP_MEMBER);
        assert_endpoint_is_valid_uri(endpoints::SOURCES);
        assert_endpoint_is_valid_uri(endpoints::SOURCE);
        assert_endpoint_is_valid_uri(endpoints::CATEGORIES);
        assert_endpoint_is_valid_uri(endpoints::CATEGORY);
        assert_endpoint_is_valid_uri(endpoints::TAGS);
        assert_endpoint_is_valid_uri(endpoints::TAG);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTIONS);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTION);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTION_TAGS);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTION_TAG);
    }

    #[test]
    fn formats_two_parameters_one_at_a_time() {
        let formatted_path = format_endpoint(&format_endpoint(endpoints::GROUP_MEMBER, 3), 5);

        assert_eq!(formatted_path, "/groups/3/members/5");
    }

    #[test]
    fn produces_valid_uri() {
        let formatted_path = format_endpoint("/hello/{world_id}", 1);

        assert_eq!(formatted_path, "/hello/1");
        assert!(formatted_path.parse::<Uri>().is_ok());

        // Parameter with single word should also work.
        let formatted_path = format_endpoint("/hello/{world}", 1);

        assert_eq!(formatted_path, "/hello/1");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }

    #[test]
    fn returns_original_path_with_no_parameter() {
        let formatted_path = format_endpoint("/hello/world", 1);

        assert_eq!(formatted_path, "/hello/world");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }

    #[test]
    fn parameter_in_middle() {
        let formatted_path = format_endpoint("/hello/{world}/bye", 1);

        assert_eq!(formatted_path, "/hello/1/bye");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }
}
