use axum::{debug_handler, extract::Query, routing::get, Json, Router};
use lunchplanner::{auth::Identities, config::Config, db, groups, realtime::SessionRegistry, restaurants, votes, AppState};
use serde::Deserialize;
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
        .unwrap();
    db::init(&db_pool).await.unwrap();

    let app_state = AppState {
        db_pool,
        identities: Identities::new(&config.identity_url),
        registry: SessionRegistry::new(),
    };

    let api = Router::new()
        .route("/health", get(health))
        .merge(restaurants::router())
        .merge(groups::router())
        .nest("/votes", votes::router());

    let app = Router::new()
        .nest("/api/v1", api)
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

#[derive(Deserialize)]
struct HealthQuery {
    ping: Option<String>,
}

#[debug_handler]
async fn health(Query(HealthQuery { ping }): Query<HealthQuery>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "pong": ping }))
}
