use crate::{error::ApiError, events};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, MethodFilter, MethodRouter},
    Json, Router,
};
use relay_core::{
    aggregation::AggregationService,
    metrics::MetricsCollector,
    types::{ApiResponse, Envelope},
    upstream::{Operation, OperationKind, HEALTH_MAX_AGE},
};
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::debug;

/// Largest accepted request body. Validator registrations for big operators run to megabytes.
pub const MAX_BODY_BYTES: usize = 30 * 1024 * 1024;

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AggregationService>,
    pub metrics: Arc<MetricsCollector>,
    /// Closes open event streams on shutdown.
    pub shutdown: broadcast::Sender<()>,
}

/// Builds the full router: operational routes, the event stream, genesis and one route per
/// proxied operation.
pub fn create_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/robots.txt", get(handle_robots))
        .route("/eth/v1/events", get(events::handle_events))
        .route("/eth/v1/beacon/genesis", get(handle_genesis));

    for (path, method_router) in operation_routes() {
        router = router.route(&path, method_router);
    }

    router
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// One method router per distinct path template; GET and POST on the same path share it.
fn operation_routes() -> BTreeMap<String, MethodRouter<AppState>> {
    let mut routes: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    for kind in OperationKind::ALL {
        let filter =
            if kind.method() == Method::GET { MethodFilter::GET } else { MethodFilter::POST };
        let handler = move |State(state): State<AppState>,
                            uri: Uri,
                            headers: HeaderMap,
                            body: Bytes| async move {
            handle_operation(state, kind, uri, headers, body).await
        };

        let path = route_path(kind.path_template());
        let method_router = routes.remove(&path).unwrap_or_else(MethodRouter::new);
        routes.insert(path, method_router.on(filter, handler));
    }
    routes
}

/// Converts `{name}` placeholders to axum's `:name` captures.
#[must_use]
pub fn route_path(template: &str) -> String {
    template
        .split('/')
        .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => format!(":{name}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn handle_operation(
    state: AppState,
    kind: OperationKind,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut operation = Operation::from_path(kind, uri.path()).with_body(body);
    if let Some(query) = uri.query() {
        operation = operation.with_query(query);
    }
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            operation = operation.with_header(name.as_str(), value);
        }
    }

    match state.service.execute(&operation).await {
        Ok(answer) => answer_response(answer),
        Err(e) => {
            debug!(operation = %kind, error = %e, "operation failed");
            ApiError::from(e).into_response()
        }
    }
}

/// Turns the agreed upstream answer back into an HTTP response.
fn answer_response(answer: ApiResponse) -> Response {
    let status = StatusCode::from_u16(answer.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = if answer.is_empty() {
        status.into_response()
    } else {
        (status, Json(answer.body.into_value())).into_response()
    };

    for (name, value) in answer.headers {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value))
        {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// Liveness check. Always answers 200 and reports what each node looks like.
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let nodes: Vec<_> = state
        .service
        .connections()
        .iter()
        .map(|conn| {
            let status = conn.chain_status();
            json!({
                "endpoint": conn.endpoint(),
                "healthy": conn.is_healthy(HEALTH_MAX_AGE),
                "excluded": state.service.is_excluded(conn.id()),
                "head_slot": status.syncing.map(|s| s.head_slot),
                "subscribed_topics": conn.subscribed_topics(),
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "subscribers": state.service.subscriber_count(),
            "nodes": nodes,
        })),
    )
}

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

pub async fn handle_robots() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "text/plain")], ROBOTS_TXT)
}

/// Genesis of the trusted majority, answered from health samples.
///
/// # Errors
///
/// Returns 503 if no node is trusted.
pub async fn handle_genesis(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let genesis = state.service.genesis()?;
    Ok(Json(Envelope { data: genesis }))
}
