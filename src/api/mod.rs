use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::core::{SimulationRequest, StaticFxProvider, project};

#[derive(Clone)]
struct AppState {
    fx: Arc<StaticFxProvider>,
    report_currency: Arc<str>,
}

impl AppState {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            fx: Arc::new(config.fx_provider()),
            report_currency: Arc::from(config.report_currency.as_str()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    report_currency: String,
}

/// Parses a projection request body, reporting serde's message on failure.
pub fn parse_request(json: &str) -> Result<SimulationRequest, String> {
    serde_json::from_str::<SimulationRequest>(json)
        .map_err(|e| format!("Invalid projection request: {e}"))
}

pub fn router(config: &AppConfig) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/project", post(project_handler))
        .fallback(not_found_handler)
        .with_state(AppState::from_config(config))
}

pub async fn run_http_server(config: &AppConfig) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid listen address {}:{}: {e}", config.host, config.port),
            )
        })?;
    let app = router(config);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, report_currency = %config.report_currency, "bond growth API listening");
    tracing::info!("Local access: http://127.0.0.1:{}/api/health", config.port);

    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> Response {
    health_response(&state)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_handler(
    State(state): State<AppState>,
    payload: Result<Json<SimulationRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => project_response(&state, &request),
        Err(rejection) => error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid projection request: {}", rejection.body_text()),
        ),
    }
}

fn health_response(state: &AppState) -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            report_currency: state.report_currency.to_string(),
        },
    )
}

fn project_response(state: &AppState, request: &SimulationRequest) -> Response {
    match project(request, state.fx.as_ref(), &state.report_currency) {
        Ok(projection) => json_response(StatusCode::OK, projection),
        Err(err) => {
            tracing::debug!(error = %err, "rejected projection request");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
