use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
};
use axum_server::Handle;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use spendshare::{
    AppState, Config, DbPool, Error, MemorySessionStore, RedisSessionStore, SessionStore,
    build_router, graceful_shutdown, logging_middleware,
};

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let config = Config::parse();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("server stopped: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Error> {
    let db_pool = DbPool::connect(&config.pool_config()).await?;

    let sessions: Arc<dyn SessionStore> = match &config.kv_url {
        Some(url) => Arc::new(RedisSessionStore::connect(url, config.kv_pool_size).await?),
        None => {
            tracing::warn!("KV_URL is not set, sessions will be kept in memory");
            Arc::new(MemorySessionStore::new())
        }
    };

    let state = AppState::new(db_pool, sessions, &config.token_secret)
        .with_token_duration(config.token_lifetime())
        .with_password_hash_cost(config.password_hash_cost);

    let addr = SocketAddr::new(config.address, config.port);

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(build_router(state));

    tracing::info!("HTTP server listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .map_err(|error| Error::Internal(format!("could not serve on {addr}: {error}")))
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // By default, `TraceLayer` will log 5xx responses but we're doing our specific
        // logging of errors so disable that
        .on_failure(());

    router
        .layer(middleware::from_fn(logging_middleware))
        .layer(tracing_layer)
}
