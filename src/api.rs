//! REST API for the shipping service.
//!
//! Exposes packing, unit normalization, rate shopping and deviation checks over
//! HTTP. Uses Axum as the web framework and supports CORS.

use std::sync::{Arc, OnceLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::catalog::{BoxCatalog, BoxDefinition, BoxSource, CatalogError, CatalogSet};
use crate::config::AppConfig;
use crate::deviation::{DeviationReport, SnapshotBox, detect_deviation};
use crate::geometry::ValidationError;
use crate::model::{Address, ItemToShip, OrderLine, validate_unit_total};
use crate::packer::{PackError, PackedBox, PackingResult, pack_all_sources, pack_all_sources_with_progress};
use crate::provider::HttpRateProvider;
use crate::rates::{RateProvider, RateShopConfig};
use crate::shipment::{ShipmentCandidate, assemble_shipments};
use crate::units::{Measurement, normalize};

/// Shared state of all handlers.
#[derive(Clone)]
pub struct ApiState {
    catalogs: Arc<CatalogSet>,
    rate_shop: RateShopConfig,
    provider: Option<Arc<dyn RateProvider>>,
}

impl ApiState {
    pub fn new(
        catalogs: CatalogSet,
        rate_shop: RateShopConfig,
        provider: Option<Arc<dyn RateProvider>>,
    ) -> Self {
        Self {
            catalogs: Arc::new(catalogs),
            rate_shop,
            provider,
        }
    }

    /// Builds the state from the application configuration.
    ///
    /// Rate shopping stays disabled when no provider endpoint is configured or
    /// the client cannot be created.
    pub fn from_config(config: &AppConfig) -> Self {
        let provider = config.rates.endpoint().and_then(|endpoint| {
            match HttpRateProvider::new(
                endpoint,
                config.rates.token().map(str::to_string),
                config.rates.timeout(),
            ) {
                Ok(provider) => Some(Arc::new(provider) as Arc<dyn RateProvider>),
                Err(err) => {
                    tracing::error!(endpoint, error = %err, "could not create rate provider client");
                    None
                }
            }
        });

        Self::new(config.catalog.load(), config.rate_shop_config(), provider)
    }
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>ship-it-now API Docs</title>
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

/// Request structure for the packing endpoints.
///
/// Without `sources` every configured box source is tried. `custom_boxes`
/// adds (or replaces) the `custom` source for this request.
#[derive(Deserialize, ToSchema)]
pub struct PackRequest {
    pub items: Vec<ItemToShip>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub sources: Option<Vec<BoxSource>>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub custom_boxes: Option<Vec<BoxDefinition>>,
}

#[derive(Debug)]
struct ValidatedPackRequest {
    items: Vec<ItemToShip>,
    catalogs: CatalogSet,
}

#[derive(Debug)]
enum PackRequestValidationError {
    MissingItems,
    InvalidItem(ValidationError),
    InvalidCatalog(CatalogError),
    NoSources,
}

impl PackRequest {
    fn into_validated(
        self,
        available: &CatalogSet,
    ) -> Result<ValidatedPackRequest, PackRequestValidationError> {
        if self.items.is_empty() {
            return Err(PackRequestValidationError::MissingItems);
        }
        for item in &self.items {
            item.validate()
                .map_err(PackRequestValidationError::InvalidItem)?;
        }
        validate_unit_total(&self.items).map_err(PackRequestValidationError::InvalidItem)?;

        let has_custom = self.custom_boxes.is_some();
        let mut selected: Vec<BoxCatalog> = available
            .iter()
            .filter(|catalog| {
                self.sources
                    .as_ref()
                    .is_none_or(|sources| sources.contains(&catalog.source))
            })
            .filter(|catalog| !(has_custom && catalog.source == BoxSource::Custom))
            .cloned()
            .collect();

        if let Some(boxes) = self.custom_boxes {
            let custom = BoxCatalog::new(BoxSource::Custom, boxes)
                .map_err(PackRequestValidationError::InvalidCatalog)?;
            selected.push(custom);
        }
        if selected.is_empty() {
            return Err(PackRequestValidationError::NoSources);
        }

        let catalogs =
            CatalogSet::new(selected).map_err(PackRequestValidationError::InvalidCatalog)?;
        Ok(ValidatedPackRequest {
            items: self.items,
            catalogs,
        })
    }
}

/// Packing outcome of every box source that was tried.
#[derive(Serialize, ToSchema)]
pub struct PackResponse {
    pub sources: Vec<SourcePacking>,
    /// True when every source packed all items.
    pub is_complete: bool,
}

/// Boxes of one source, or the item that made the source fail.
#[derive(Serialize, ToSchema)]
pub struct SourcePacking {
    pub source: BoxSource,
    pub boxes: Vec<PackedBox>,
    pub unfit: Option<UnfitItem>,
}

#[derive(Serialize, ToSchema)]
pub struct UnfitItem {
    pub sku: String,
    pub order_line_id: String,
    pub reason_code: String,
    pub reason: String,
}

impl From<&PackError> for UnfitItem {
    fn from(err: &PackError) -> Self {
        match err {
            PackError::NoFittingBox {
                sku,
                order_line_id,
                reason,
                ..
            } => Self {
                sku: sku.clone(),
                order_line_id: order_line_id.clone(),
                reason_code: reason.code().to_string(),
                reason: reason.to_string(),
            },
        }
    }
}

impl PackResponse {
    pub fn from_packing_result(result: PackingResult) -> Self {
        let is_complete = result.failures().next().is_none();
        let sources = result
            .outcomes
            .into_iter()
            .map(|(source, outcome)| match outcome {
                Ok(boxes) => SourcePacking {
                    source,
                    boxes,
                    unfit: None,
                },
                Err(err) => SourcePacking {
                    source,
                    boxes: Vec::new(),
                    unfit: Some(UnfitItem::from(&err)),
                },
            })
            .collect();

        Self {
            sources,
            is_complete,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[schema(example = json!({ "amount": 0.2, "unit": "kg", "country": "US", "kind": "weight" }))]
pub struct NormalizeRequest {
    pub amount: f64,
    pub unit: String,
    pub country: String,
    /// `distance` or `weight`
    pub kind: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ShipmentRequest {
    pub order_lines: Vec<OrderLine>,
    pub destination: Address,
}

#[derive(Serialize, ToSchema)]
pub struct ShipmentsResponse {
    pub shipments: Vec<ShipmentCandidate>,
    /// Number of shipments for which no rate is available.
    pub without_rates: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct DeviationRequest {
    #[serde(default)]
    pub actual: Option<Vec<SnapshotBox>>,
    #[serde(default)]
    pub suggested: Option<Vec<SnapshotBox>>,
}

#[derive(Serialize, ToSchema)]
pub struct CatalogEntry {
    pub source: BoxSource,
    pub name: String,
    pub boxes: Vec<BoxDefinition>,
}

#[derive(Serialize, ToSchema)]
pub struct CatalogsResponse {
    pub catalogs: Vec<CatalogEntry>,
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

fn catalog_config_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid box configuration",
        details,
    )
}

fn parse_pack_request(
    payload: Result<Json<PackRequest>, JsonRejection>,
    available: &CatalogSet,
) -> Result<ValidatedPackRequest, Response> {
    let Json(payload) = payload.map_err(json_deserialize_error)?;

    match payload.into_validated(available) {
        Ok(validated) => Ok(validated),
        Err(PackRequestValidationError::MissingItems) => {
            Err(validation_error("At least one item must be specified"))
        }
        Err(PackRequestValidationError::InvalidItem(err)) => Err(validation_error(err.to_string())),
        Err(PackRequestValidationError::InvalidCatalog(err)) => {
            Err(catalog_config_error(err.to_string()))
        }
        Err(PackRequestValidationError::NoSources) => Err(catalog_config_error(
            "None of the requested box sources is available",
        )),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_pack,
        handle_pack_stream,
        handle_normalize,
        handle_shipments,
        handle_deviation,
        handle_catalogs
    ),
    components(
        schemas(
            PackRequest,
            PackResponse,
            SourcePacking,
            UnfitItem,
            NormalizeRequest,
            Measurement,
            ShipmentRequest,
            ShipmentsResponse,
            ShipmentCandidate,
            DeviationRequest,
            DeviationReport,
            CatalogsResponse,
            CatalogEntry,
            ErrorResponse
        )
    ),
    tags(
        (name = "packing", description = "Packing items into carrier boxes"),
        (name = "shipping", description = "Unit normalization and rate shopping"),
        (name = "finalization", description = "Checks after a label was bought")
    )
)]
struct ApiDoc;

/// Builds the application router.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/pack", post(handle_pack))
        .route("/pack_stream", post(handle_pack_stream))
        .route("/normalize", post(handle_normalize))
        .route("/shipments", post(handle_shipments))
        .route("/deviation", post(handle_deviation))
        .route("/catalogs", get(handle_catalogs))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server and blocks until it terminates.
pub async fn start_api_server(config: AppConfig) -> std::io::Result<()> {
    let state = ApiState::from_config(&config);
    let rate_shopping = state.provider.is_some();
    let app = router(state);

    let addr = config.api.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        "server running on http://{}:{}",
        config.api.display_host(),
        config.api.port()
    );
    if config.api.binds_to_all_interfaces() {
        tracing::info!("local access: http://localhost:{}", config.api.port());
    }
    if !rate_shopping {
        tracing::warn!("no rate provider configured, POST /shipments is disabled");
    }

    axum::serve(listener, app).await
}

/// Handler for POST /pack endpoint.
///
/// Packs the items against every selected box source independently.
#[utoipa::path(
    post,
    path = "/pack",
    request_body = PackRequest,
    responses(
        (status = 200, description = "Packing per box source", body = PackResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request or box configuration",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_pack(
    State(state): State<ApiState>,
    payload: Result<Json<PackRequest>, JsonRejection>,
) -> Response {
    let request = match parse_pack_request(payload, &state.catalogs) {
        Ok(request) => request,
        Err(response) => return response,
    };

    tracing::info!(
        items = request.items.len(),
        sources = request.catalogs.len(),
        "pack request"
    );
    let result = pack_all_sources(&request.items, &request.catalogs, &state.rate_shop.buffers);
    tracing::info!(
        packed = result.successful().count(),
        failed = result.failures().count(),
        "pack result"
    );

    (StatusCode::OK, Json(PackResponse::from_packing_result(result))).into_response()
}

/// Handler for POST /pack_stream endpoint (SSE).
///
/// Streams pack events as Server-Sent Events while the sources are packed.
#[utoipa::path(
    post,
    path = "/pack_stream",
    request_body = PackRequest,
    responses(
        (
            status = 200,
            description = "Streams pack events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request or box configuration",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_pack_stream(
    State(state): State<ApiState>,
    payload: Result<Json<PackRequest>, JsonRejection>,
) -> Response {
    let ValidatedPackRequest { items, catalogs } =
        match parse_pack_request(payload, &state.catalogs) {
            Ok(request) => request,
            Err(response) => return response,
        };

    let (tx, rx) = mpsc::channel::<String>(32);
    let config = state.rate_shop.buffers;

    tokio::task::spawn_blocking(move || {
        pack_all_sources_with_progress(&items, &catalogs, &config, |evt| {
            if let Ok(json) = serde_json::to_string(evt) {
                // A closed receiver only means the client went away.
                let _ = tx.blocking_send(json);
            }
        });
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for POST /normalize endpoint.
///
/// Converts a measurement into the unit system of the given country.
#[utoipa::path(
    post,
    path = "/normalize",
    request_body = NormalizeRequest,
    responses(
        (status = 200, description = "Normalized measurement", body = Measurement),
        (status = UNPROCESSABLE_ENTITY, description = "Unsupported country, kind or unit", body = ErrorResponse)
    ),
    tag = "shipping"
)]
async fn handle_normalize(payload: Result<Json<NormalizeRequest>, JsonRejection>) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };

    match normalize(request.amount, &request.unit, &request.country, &request.kind) {
        Ok(measurement) => (StatusCode::OK, Json(measurement)).into_response(),
        Err(err) => {
            tracing::error!(country = %request.country, kind = %request.kind, error = %err, "normalization failed");
            validation_error(err.to_string())
        }
    }
}

/// Handler for POST /shipments endpoint.
///
/// Groups order lines by origin and rate-shops every group.
#[utoipa::path(
    post,
    path = "/shipments",
    request_body = ShipmentRequest,
    responses(
        (status = 200, description = "One shipment candidate per origin", body = ShipmentsResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "No rate provider configured", body = ErrorResponse)
    ),
    tag = "shipping"
)]
async fn handle_shipments(
    State(state): State<ApiState>,
    payload: Result<Json<ShipmentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };
    if request.order_lines.is_empty() {
        return validation_error("At least one order line must be specified");
    }
    let Some(provider) = state.provider.as_deref() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Rate shopping unavailable",
            "No rate provider is configured",
        );
    };

    let shipments = assemble_shipments(
        &request.order_lines,
        &request.destination,
        &state.catalogs,
        provider,
        &state.rate_shop,
    )
    .await;
    let without_rates = shipments
        .iter()
        .filter(|shipment| !shipment.has_rates())
        .count();

    (
        StatusCode::OK,
        Json(ShipmentsResponse {
            shipments,
            without_rates,
        }),
    )
        .into_response()
}

/// Handler for POST /deviation endpoint.
///
/// Compares the finalized packing with the suggested one.
#[utoipa::path(
    post,
    path = "/deviation",
    request_body = DeviationRequest,
    responses(
        (status = 200, description = "Deviation report", body = DeviationReport),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "finalization"
)]
async fn handle_deviation(payload: Result<Json<DeviationRequest>, JsonRejection>) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };

    let report = detect_deviation(request.actual.as_deref(), request.suggested.as_deref());
    if let Some(kind) = report.deviation_type {
        tracing::info!(deviation = ?kind, "packing deviated from suggestion");
    }
    (StatusCode::OK, Json(report)).into_response()
}

/// Handler for GET /catalogs endpoint.
#[utoipa::path(
    get,
    path = "/catalogs",
    responses((status = 200, description = "Configured box catalogs", body = CatalogsResponse)),
    tag = "packing"
)]
async fn handle_catalogs(State(state): State<ApiState>) -> Json<CatalogsResponse> {
    Json(CatalogsResponse {
        catalogs: state
            .catalogs
            .iter()
            .map(|catalog| CatalogEntry {
                source: catalog.source,
                name: catalog.source.name().to_string(),
                boxes: catalog.sorted_by_volume(),
            })
            .collect(),
    })
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
