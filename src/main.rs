mod app;
mod auth;
mod config;
mod db;
mod error;
mod state;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "authgate=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    tracing::info!(
        production = config.production,
        cookie_secure = config.cookie.secure,
        same_site = ?config.cookie.same_site,
        google = config.google.client_id.is_some(),
        "configuration loaded"
    );
    if config.google.client_id.is_none() {
        tracing::warn!("GOOGLE_CLIENT_ID not set; /api/auth/google will fail");
    }

    let db = db::connect(&config).await?;
    db::migrate(&db).await?;

    let state = AppState::init(db, config)?;
    let app = app::build_app(state.clone());
    app::serve(app, &state.config).await
}
