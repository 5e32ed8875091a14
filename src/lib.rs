//! Spendshare is a backend for tracking personal and shared expenses.
//!
//! Every source, category, tag and transaction belongs to a scope. Each user
//! gets a personal scope when they register, and groups add shared scopes
//! whose members hold a `view`, `write` or `owner` role. Requests
//! can only read rows in scopes the caller can view, and only change rows in
//! scopes the caller can write to.
//!
//! This library provides the JSON REST API. The `server` binary configures
//! and serves it.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;

mod app_state;
mod auth;
mod category;
mod config;
mod database_id;
mod db;
mod endpoints;
mod error;
mod group;
mod logging;
mod membership;
mod pagination;
mod resolver;
mod role;
mod routing;
mod scope;
mod session;
mod source;
mod tag;
mod transaction;
mod transaction_tag;
mod user;

pub use app_state::AppState;
pub use config::Config;
pub use db::{DbPool, PoolConfig};
pub use error::Error;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;
pub use session::{MemorySessionStore, RedisSessionStore, SessionStore};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}
