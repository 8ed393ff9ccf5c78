//! REST API for the warehouse service.
//!
//! Thin HTTP adapter over the shared `Warehouse`. Engine calls hold a
//! blocking mutex and may run the exponential load search, so every handler
//! hands its work to `spawn_blocking`.

use std::convert::Infallible;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::config::ApiConfig;
use crate::engine::{SharedWarehouse, ShipmentOutcome, ShipmentReport, Warehouse, WarehouseStatus};
use crate::error::CoreError;
use crate::model::{Carrier, CarrierId, CarrierStatus, Item, StorageUnit, UnitId, ValidationError};
use crate::optimizer::{OptimizerEvent, SearchStats};
use crate::persistence::{InMemoryStore, ItemRecord};
use crate::pipeline::ProcessOutcome;
use crate::types::validation;

#[derive(Clone)]
struct ApiState {
    warehouse: SharedWarehouse<InMemoryStore>,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>stow-it-now API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                window.ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                });
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Request structure for the ingest endpoint.
#[derive(Deserialize, Clone, ToSchema)]
#[schema(
    example = json!({
        "tracking_id": "P001",
        "size": 11.0,
        "destination": "10001",
        "is_fragile": false
    })
)]
pub struct IngestRequest {
    pub tracking_id: String,
    pub size: f64,
    pub destination: String,
    #[serde(default)]
    pub is_fragile: bool,
}

impl IngestRequest {
    fn into_item(self) -> Result<Item, ValidationError> {
        Item::new(self.tracking_id, self.size, self.destination, self.is_fragile)
    }
}

/// Location of the item that was processed.
#[derive(Serialize, ToSchema)]
pub struct IngestResponse {
    pub tracking_id: String,
    pub unit_id: UnitId,
    /// Items still waiting after this one was placed.
    pub queue_length: usize,
}

/// Request structure for the shipment endpoints.
#[derive(Deserialize, Clone, ToSchema)]
#[schema(example = json!({ "carrier_id": 1, "destination": "40004" }))]
pub struct ShipmentRequest {
    pub carrier_id: CarrierId,
    pub destination: String,
}

impl ShipmentRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_non_empty(&self.destination, "Destination")
            .map_err(ValidationError::MissingField)
    }
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

/// Status code and title for an engine error.
fn classify(err: &CoreError) -> (StatusCode, &'static str) {
    match err {
        CoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid input data"),
        CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not found"),
        CoreError::NoFitFound { .. } => (StatusCode::BAD_REQUEST, "No suitable storage unit"),
        CoreError::Persistence(_) => (StatusCode::SERVICE_UNAVAILABLE, "Persistence failure"),
        CoreError::CapacityInvariant(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Capacity invariant violated",
        ),
    }
}

fn core_error_response(err: &CoreError) -> Response {
    let (status, title) = classify(err);
    error_response(status, title, err.to_string())
}

fn parse_payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload.map(|Json(value)| value).map_err(json_deserialize_error)
}

/// Runs `task` against the locked warehouse on the blocking pool.
async fn with_warehouse<T, F>(state: &ApiState, task: F) -> Result<T, Response>
where
    F: FnOnce(&mut Warehouse<InMemoryStore>) -> T + Send + 'static,
    T: Send + 'static,
{
    let warehouse = Arc::clone(&state.warehouse);
    let joined = tokio::task::spawn_blocking(move || {
        warehouse
            .lock()
            .map(|mut guard| task(&mut guard))
            .map_err(|_| "warehouse lock poisoned by an earlier panic")
    })
    .await;

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(details)) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Warehouse unavailable",
            details,
        )),
        Err(err) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Background task failed",
            err.to_string(),
        )),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_status,
        handle_ingest,
        handle_item_status,
        handle_prepare_shipment,
        handle_prepare_shipment_stream
    ),
    components(
        schemas(
            IngestRequest,
            IngestResponse,
            ShipmentRequest,
            ShipmentOutcome,
            ShipmentReport,
            SearchStats,
            OptimizerEvent,
            WarehouseStatus,
            StorageUnit,
            Carrier,
            CarrierStatus,
            ItemRecord,
            ErrorResponse
        )
    ),
    tags(
        (name = "ingestion", description = "Item intake and storage assignment"),
        (name = "shipments", description = "Carrier load optimization")
    )
)]
struct ApiDoc;

fn router(warehouse: SharedWarehouse<InMemoryStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/ingest", post(handle_ingest))
        .route("/api/items/{tracking_id}", get(handle_item_status))
        .route("/api/shipment/prepare", post(handle_prepare_shipment))
        .route(
            "/api/shipment/prepare_stream",
            post(handle_prepare_shipment_stream),
        )
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ApiState { warehouse })
}

/// Starts the API server.
///
/// Configures CORS for cross-origin requests.
/// Runs until the server is terminated; fails if the listener cannot be bound.
pub async fn start_api_server(
    config: ApiConfig,
    warehouse: SharedWarehouse<InMemoryStore>,
) -> std::io::Result<()> {
    let app = router(warehouse);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        "Server running on http://{}:{}",
        config.display_host(),
        config.port()
    );
    if config.binds_to_all_interfaces() && config.uses_default_host() {
        tracing::info!("Local access: http://localhost:{}", config.port());
    }
    tracing::info!("Documentation: GET /docs, GET /docs/openapi.json");

    axum::serve(listener, app).await
}

/// Handler for GET /api/status.
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Current warehouse state", body = WarehouseStatus)
    ),
    tag = "ingestion"
)]
async fn handle_status(State(state): State<ApiState>) -> Response {
    match with_warehouse(&state, |wh| wh.status()).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(response) => response,
    }
}

/// Handler for POST /api/ingest.
///
/// Queues the item and immediately processes the head of the queue.
#[utoipa::path(
    post,
    path = "/api/ingest",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Item assigned to a storage unit", body = IngestResponse),
        (status = BAD_REQUEST, description = "No storage unit can hold the item", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "Store rejected the assignment, item requeued", body = ErrorResponse)
    ),
    tag = "ingestion"
)]
async fn handle_ingest(
    State(state): State<ApiState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Response {
    let item = match parse_payload(payload).and_then(|req| {
        req.into_item()
            .map_err(|err| validation_error(err.to_string()))
    }) {
        Ok(item) => item,
        Err(response) => return response,
    };

    let result = with_warehouse(&state, move |wh| {
        let outcome = wh.ingest_and_process(item);
        (outcome, wh.pipeline().len())
    })
    .await;

    let (outcome, queue_length) = match result {
        Ok(value) => value,
        Err(response) => return response,
    };

    match outcome {
        Ok(ProcessOutcome::Assigned { unit_id, item }) => (
            StatusCode::OK,
            Json(IngestResponse {
                tracking_id: item.tracking_id,
                unit_id,
                queue_length,
            }),
        )
            .into_response(),
        Ok(ProcessOutcome::NoFit { item }) => error_response(
            StatusCode::BAD_REQUEST,
            "No suitable storage unit",
            format!(
                "No storage unit can hold item {} (size {})",
                item.tracking_id, item.size
            ),
        ),
        Ok(ProcessOutcome::Requeued { tracking_id, cause }) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Persistence failure",
            format!("Item {} was requeued: {}", tracking_id, cause),
        ),
        Ok(ProcessOutcome::Empty) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Ingestion queue empty",
            "The queue was drained before the item could be processed",
        ),
        Err(err) => core_error_response(&err),
    }
}

/// Handler for GET /api/items/{tracking_id}.
#[utoipa::path(
    get,
    path = "/api/items/{tracking_id}",
    params(("tracking_id" = String, Path, description = "Tracking id of the item")),
    responses(
        (status = 200, description = "Stored state of the item", body = ItemRecord),
        (status = NOT_FOUND, description = "Unknown item", body = ErrorResponse)
    ),
    tag = "ingestion"
)]
async fn handle_item_status(
    State(state): State<ApiState>,
    Path(tracking_id): Path<String>,
) -> Response {
    match with_warehouse(&state, move |wh| wh.item_status(&tracking_id)).await {
        Ok(Ok(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(Err(err)) => core_error_response(&err),
        Err(response) => response,
    }
}

/// Handler for POST /api/shipment/prepare.
///
/// Loads the best subset of stored items for the destination onto the carrier.
#[utoipa::path(
    post,
    path = "/api/shipment/prepare",
    request_body = ShipmentRequest,
    responses(
        (status = 200, description = "Shipment outcome", body = ShipmentOutcome),
        (status = NOT_FOUND, description = "Unknown carrier", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "Store rejected the shipment, nothing was loaded", body = ErrorResponse)
    ),
    tag = "shipments"
)]
async fn handle_prepare_shipment(
    State(state): State<ApiState>,
    payload: Result<Json<ShipmentRequest>, JsonRejection>,
) -> Response {
    let request = match parse_payload(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = with_warehouse(&state, move |wh| {
        wh.prepare_shipment(request.carrier_id, &request.destination)
    })
    .await;

    match result {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(err)) => core_error_response(&err),
        Err(response) => response,
    }
}

/// Handler for POST /api/shipment/prepare_stream (SSE).
///
/// Streams optimizer events as Server-Sent Events, followed by one final
/// `Outcome` or `Error` message.
#[utoipa::path(
    post,
    path = "/api/shipment/prepare_stream",
    request_body = ShipmentRequest,
    responses(
        (
            status = 200,
            description = "Streams optimizer events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "shipments"
)]
async fn handle_prepare_shipment_stream(
    State(state): State<ApiState>,
    payload: Result<Json<ShipmentRequest>, JsonRejection>,
) -> Response {
    let request = match parse_payload(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(err) = request.validate() {
        return validation_error(err.to_string());
    }

    let (tx, rx) = mpsc::channel::<String>(32);
    let warehouse = Arc::clone(&state.warehouse);

    tokio::task::spawn_blocking(move || {
        let Ok(mut wh) = warehouse.lock() else {
            let _ = tx.blocking_send(
                json!({
                    "type": "Error",
                    "error": "Warehouse unavailable",
                    "details": "warehouse lock poisoned by an earlier panic",
                })
                .to_string(),
            );
            return;
        };

        let result =
            wh.prepare_shipment_with_progress(request.carrier_id, &request.destination, |evt| {
                if let Ok(json) = serde_json::to_string(evt) {
                    // A closed receiver only means the client went away.
                    let _ = tx.blocking_send(json);
                }
            });

        let last = match result {
            Ok(outcome) => json!({ "type": "Outcome", "outcome": outcome }),
            Err(err) => {
                let (status, title) = classify(&err);
                json!({
                    "type": "Error",
                    "status": status.as_u16(),
                    "error": title,
                    "details": err.to_string(),
                })
            }
        };
        let _ = tx.blocking_send(last.to_string());
    });

    let stream = ReceiverStream::new(rx).map(|msg| Ok::<_, Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
