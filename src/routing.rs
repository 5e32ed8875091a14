//! Application router configuration with protected and unprotected route definitions.

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::{
    AppState,
    auth::{auth_guard, log_in_endpoint, log_out_endpoint, register_endpoint},
    category::{
        create_category_endpoint, delete_category_endpoint, get_categories_endpoint,
        get_category_endpoint, update_category_endpoint,
    },
    endpoints,
    group::{
        add_group_member_endpoint, create_group_endpoint, delete_group_endpoint,
        get_group_endpoint, get_group_members_endpoint, get_groups_endpoint,
        remove_group_member_endpoint,
    },
    membership::{get_scope_endpoint, get_scopes_endpoint},
    source::{
        create_source_endpoint, delete_source_endpoint, get_source_endpoint,
        get_sources_endpoint, update_source_endpoint,
    },
    tag::{
        create_tag_endpoint, delete_tag_endpoint, get_tag_endpoint, get_tags_endpoint,
        update_tag_endpoint,
    },
    transaction::{
        add_transaction_tag_endpoint, create_transaction_endpoint, delete_transaction_endpoint,
        get_transaction_endpoint, get_transaction_tags_endpoint, get_transactions_endpoint,
        remove_transaction_tag_endpoint, update_transaction_endpoint,
    },
    user::{
        delete_current_user_endpoint, get_current_user_endpoint, update_current_user_endpoint,
    },
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    let unprotected_routes = Router::new()
        .route(endpoints::REGISTER, post(register_endpoint))
        .route(endpoints::LOG_IN, post(log_in_endpoint));

    let protected_routes = Router::new()
        .route(endpoints::LOG_OUT, post(log_out_endpoint))
        .route(
            endpoints::CURRENT_USER,
            get(get_current_user_endpoint)
                .put(update_current_user_endpoint)
                .delete(delete_current_user_endpoint),
        )
        .route(endpoints::SCOPES, get(get_scopes_endpoint))
        .route(endpoints::SCOPE, get(get_scope_endpoint))
        .route(
            endpoints::GROUPS,
            get(get_groups_endpoint).post(create_group_endpoint),
        )
        .route(
            endpoints::GROUP,
            get(get_group_endpoint).delete(delete_group_endpoint),
        )
        .route(
            endpoints::GROUP_MEMBERS,
            get(get_group_members_endpoint).post(add_group_member_endpoint),
        )
        .route(
            endpoints::GROUP_MEMBER,
            delete(remove_group_member_endpoint),
        )
        .route(
            endpoints::SOURCES,
            get(get_sources_endpoint).post(create_source_endpoint),
        )
        .route(
            endpoints::SOURCE,
            get(get_source_endpoint)
                .put(update_source_endpoint)
                .delete(delete_source_endpoint),
        )
        .route(
            endpoints::CATEGORIES,
            get(get_categories_endpoint).post(create_category_endpoint),
        )
        .route(
            endpoints::CATEGORY,
            get(get_category_endpoint)
                .put(update_category_endpoint)
                .delete(delete_category_endpoint),
        )
        .route(
            endpoints::TAGS,
            get(get_tags_endpoint).post(create_tag_endpoint),
        )
        .route(
            endpoints::TAG,
            get(get_tag_endpoint)
                .put(update_tag_endpoint)
                .delete(delete_tag_endpoint),
        )
        .route(
            endpoints::TRANSACTIONS,
            get(get_transactions_endpoint).post(create_transaction_endpoint),
        )
        .route(
            endpoints::TRANSACTION,
            get(get_transaction_endpoint)
                .put(update_transaction_endpoint)
                .delete(delete_transaction_endpoint),
        )
        .route(
            endpoints::TRANSACTION_TAGS,
            get(get_transaction_tags_endpoint).post(add_transaction_tag_endpoint),
        )
        .route(
            endpoints::TRANSACTION_TAG,
            delete(remove_transaction_tag_endpoint),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_guard));

    protected_routes
        .merge(unprotected_routes)
        .with_state(state)
}
