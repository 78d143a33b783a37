use std::net::SocketAddr;

use axum::{
    http::{header, request::Parts, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use regex::Regex;
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth;
use crate::config::{AppConfig, CorsConfig};
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);
    Router::new()
        .route("/", get(liveness))
        .nest("/api/auth", auth::router().layer(cors))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

async fn liveness() -> Json<Value> {
    Json(json!({"status": "Backend running", "message": "API works"}))
}

/// Credentialed CORS restricted to the configured origins.
pub fn cors_layer(cfg: &CorsConfig) -> CorsLayer {
    let exact = cfg.origins.clone();
    let patterns: Vec<Regex> = cfg
        .origin_patterns
        .iter()
        .filter_map(|p| {
            Regex::new(&format!("^(?:{p})$"))
                .map_err(|e| warn!(pattern = %p, error = %e, "skipping CORS pattern"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _req: &Parts| {
                origin
                    .to_str()
                    .map(|o| origin_allowed(o, &exact, &patterns))
                    .unwrap_or(false)
            },
        ))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn origin_allowed(origin: &str, exact: &[String], patterns: &[Regex]) -> bool {
    exact.iter().any(|o| o == origin) || patterns.iter().any(|re| re.is_match(origin))
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
