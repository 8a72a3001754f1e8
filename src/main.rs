#![deny(clippy::all, clippy::pedantic)]

mod config;
mod error;
mod id;
mod models;
mod shortener;
mod store;
mod validator;

use std::{path::Path as FsPath, sync::Arc};

use anyhow::Context;
use axum::{
    Extension, Form, Json, Router,
    body::Body,
    extract::Path,
    http::{StatusCode, header::LOCATION},
    response::Response,
    routing::{get, post},
};
use config::{Config, StoreBackend};
use error::{ResolveError, ShortenError};
use id::RandomIdGenerator;
use models::{ShortenForm, ShortenResponse};
use shortener::ShortenerService;
use store::{CachedStore, InMemoryStore, MappingStore, MongoStore, RedisCache};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use validator::{DnsResolver, Validator};

async fn shorten_url_route(
    service: Extension<Arc<ShortenerService>>,
    form: Form<ShortenForm>,
) -> Result<Json<ShortenResponse>, ShortenError> {
    let mapping = service.shorten(&form.url).await?;

    Ok(Json(mapping.into()))
}

async fn redirect_route(
    service: Extension<Arc<ShortenerService>>,
    path: Path<String>,
) -> Result<Response, ResolveError> {
    let target = service.resolve(&path.0).await?;

    Ok(redirect_to(&target))
}

fn redirect_to(target: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    match target.parse() {
        Ok(location) => {
            response.headers_mut().insert(LOCATION, location);
        }
        Err(err) => {
            tracing::error!(err = ?err, %target, "stored url is not a valid header value");
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }
    response
}

/// Builds the HTTP surface around an already constructed service.
pub fn router(service: Arc<ShortenerService>, static_dir: &str, views_dir: &str) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(FsPath::new(views_dir).join("index.html")))
        .nest_service("/public", ServeDir::new(static_dir))
        .route("/api/shorturl", post(shorten_url_route))
        .route("/api/shorturl/{shortened}", get(redirect_route))
        .layer(Extension(service))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn MappingStore>> {
    let store: Arc<dyn MappingStore> = match &config.store {
        StoreBackend::Mongo { uri, database } => {
            let mongo = MongoStore::new(uri, database, config.store_timeout)
                .await
                .context("failed to configure MongoDB client")?;
            mongo
                .ensure_indexes()
                .await
                .context("failed to create MongoDB indexes")?;
            tracing::info!(%database, "connected to MongoDB");
            Arc::new(mongo)
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; mappings are lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    let Some(redis_url) = &config.redis_url else {
        return Ok(store);
    };
    let client = redis::Client::open(redis_url.as_str()).context("invalid REDIS_URL")?;
    let connection = redis::aio::ConnectionManager::new(client)
        .await
        .context("failed to connect to redis")?;
    tracing::info!("redis lookup cache enabled");

    let cache = RedisCache::new(connection, config.cache_ttl_secs);

    Ok(Arc::new(CachedStore::new(store, Arc::new(cache), config.cache_timeout)))
}

/// Wires the store, validator and generator into a router.
pub async fn setup(config: &Config) -> anyhow::Result<Router> {
    let store = build_store(config).await?;
    let validator = Validator::new(Arc::new(DnsResolver), config.lookup_timeout);
    let service = ShortenerService::new(
        validator,
        Arc::new(RandomIdGenerator),
        store,
        config.store_timeout,
        config.max_insert_attempts,
    );

    Ok(router(Arc::new(service), &config.static_dir, &config.views_dir))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env_files(FsPath::new("."));
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let app = setup(&config).await?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    tracing::info!("Listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
