//! # API REST
//!
//! REST API implementation for Labflow.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, status mapping, API key guard, CORS)
//!
//! Uses `api-shared` for transfer objects and `labflow-core` for all lifecycle rules. Handlers
//! never change state themselves; every mutation goes through [`LabService`].

#![warn(rust_2018_idioms)]

pub mod startup;

use api_shared::{
    validate_api_key, ActionReq, ActorDto, CreateRequestReq, DocumentReq, DocumentRes, DraftDto,
    ErrorBody, FlagDto, HealthRes, HealthService, ListPanelsRes, ListRequestsRes, PanelDto,
    ParameterDto, RequestDto, ResultDto, SaveDraftReq, API_KEY_HEADER,
};
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use labflow_core::{LabError, LabService, ShardableUuid, StatusFilter};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across REST handlers.
#[derive(Clone)]
pub struct AppState {
    service: LabService,
    api_key: Option<Arc<str>>,
}

impl AppState {
    /// `api_key` of `None` leaves the API unguarded (local development only).
    pub fn new(service: LabService, api_key: Option<String>) -> Self {
        Self {
            service,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_panels,
        get_panel,
        create_request,
        list_requests,
        get_request,
        receive_specimen,
        load_draft,
        save_draft,
        take_over_draft,
        release_draft_claim,
        finalize,
        release,
        request_document,
        list_released,
        get_released,
    ),
    components(schemas(
        HealthRes,
        ActorDto,
        ActionReq,
        ParameterDto,
        PanelDto,
        ListPanelsRes,
        CreateRequestReq,
        FlagDto,
        ResultDto,
        RequestDto,
        ListRequestsRes,
        DraftDto,
        SaveDraftReq,
        DocumentReq,
        DocumentRes,
        ErrorBody,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router.
///
/// `/health` and the Swagger UI are open; every other route requires the `x-api-key` header
/// when an API key is configured.
pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/panels", get(list_panels))
        .route("/panels/:id", get(get_panel))
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/receive", post(receive_specimen))
        .route("/requests/:id/draft", get(load_draft).put(save_draft))
        .route(
            "/requests/:id/draft/claim",
            post(take_over_draft).delete(release_draft_claim),
        )
        .route("/requests/:id/finalize", post(finalize))
        .route("/requests/:id/release", post(release))
        .route("/requests/:id/documents", post(request_document))
        .route("/released", get(list_released))
        .route("/released/:id", get(get_released))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(guarded)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors and guards
// ============================================================================

/// A [`LabError`] rendered as an HTTP response with an [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError(LabError);

impl From<LabError> for ApiError {
    fn from(err: LabError) -> Self {
        Self(err)
    }
}

/// HTTP status for a lifecycle error.
pub fn status_for(err: &LabError) -> StatusCode {
    match err {
        LabError::NotFound { .. } => StatusCode::NOT_FOUND,
        LabError::IllegalTransition { .. } | LabError::DraftClaimed { .. } => StatusCode::CONFLICT,
        LabError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LabError::DocumentUnavailable(_)
        | LabError::PublishFailed(_)
        | LabError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LabError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LabError::Catalog(_)
        | LabError::StorageDirCreation(_)
        | LabError::FileWrite(_)
        | LabError::FileRead(_)
        | LabError::Wire(_)
        | LabError::Files(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_id(id: &str) -> ApiResult<ShardableUuid> {
    ShardableUuid::parse(id)
        .map_err(|e| ApiError(LabError::InvalidInput(format!("invalid request id: {e}"))))
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = validate_api_key(provided, expected) {
            return (StatusCode::UNAUTHORIZED, Json(ErrorBody::message(e.to_string())))
                .into_response();
        }
    }
    next.run(request).await
}

// ============================================================================
// Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API.
async fn health(State(state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health(state.service.catalog().len()))
}

#[utoipa::path(
    get,
    path = "/panels",
    responses(
        (status = 200, description = "Configured panels", body = ListPanelsRes)
    )
)]
async fn list_panels(State(state): State<AppState>) -> Json<ListPanelsRes> {
    let panels = state
        .service
        .catalog()
        .list()
        .map(|p| PanelDto::from(p.as_ref()))
        .collect();
    Json(ListPanelsRes { panels })
}

#[utoipa::path(
    get,
    path = "/panels/{id}",
    params(("id" = String, Path, description = "Panel id, e.g. `cbc`")),
    responses(
        (status = 200, description = "Panel definition", body = PanelDto),
        (status = 404, description = "Unknown panel", body = ErrorBody)
    )
)]
async fn get_panel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PanelDto>> {
    let panel = state.service.panel(&id)?;
    Ok(Json(PanelDto::from(panel.as_ref())))
}

#[utoipa::path(
    post,
    path = "/requests",
    request_body = CreateRequestReq,
    responses(
        (status = 201, description = "Request registered", body = RequestDto),
        (status = 400, description = "Bad request", body = ErrorBody),
        (status = 404, description = "Unknown panel", body = ErrorBody)
    )
)]
/// Register a new test request from order entry.
async fn create_request(
    State(state): State<AppState>,
    Json(req): Json<CreateRequestReq>,
) -> ApiResult<(StatusCode, Json<RequestDto>)> {
    let request = state.service.create_request(req.into_new_request()?).await?;
    Ok((StatusCode::CREATED, Json(RequestDto::from(&request))))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

#[utoipa::path(
    get,
    path = "/requests",
    params(("status" = Option<String>, Query, description = "active, completed, final or all")),
    responses(
        (status = 200, description = "Requests, oldest first", body = ListRequestsRes),
        (status = 400, description = "Unknown filter", body = ErrorBody)
    )
)]
async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListRequestsRes>> {
    let filter: StatusFilter = match query.status.as_deref() {
        Some(s) => s.parse()?,
        None => StatusFilter::All,
    };
    let requests = state
        .service
        .list_requests(filter)?
        .iter()
        .map(RequestDto::from)
        .collect();
    Ok(Json(ListRequestsRes { requests }))
}

#[utoipa::path(
    get,
    path = "/requests/{id}",
    params(("id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request", body = RequestDto),
        (status = 404, description = "Unknown request", body = ErrorBody)
    )
)]
async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestDto>> {
    let request = state.service.get_request(&parse_id(&id)?)?;
    Ok(Json(RequestDto::from(&request)))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/receive",
    params(("id" = String, Path, description = "Request id")),
    request_body = ActionReq,
    responses(
        (status = 200, description = "Specimen received", body = RequestDto),
        (status = 409, description = "Not awaiting a specimen", body = ErrorBody)
    )
)]
async fn receive_specimen(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActionReq>,
) -> ApiResult<Json<RequestDto>> {
    let request = state
        .service
        .receive_specimen(&parse_id(&id)?, &req.actor.into())
        .await?;
    Ok(Json(RequestDto::from(&request)))
}

#[utoipa::path(
    get,
    path = "/requests/{id}/draft",
    params(
        ("id" = String, Path, description = "Request id"),
        ("name" = String, Query, description = "Technician viewing the draft"),
        ("license_number" = Option<String>, Query, description = "Technician license number")
    ),
    responses(
        (status = 200, description = "Working draft with live flags", body = DraftDto),
        (status = 404, description = "Unknown request", body = ErrorBody),
        (status = 409, description = "Draft claimed by another technician", body = ErrorBody)
    )
)]
async fn load_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(viewer): Query<ActorDto>,
) -> ApiResult<Json<DraftDto>> {
    let view = state
        .service
        .load_draft(&parse_id(&id)?, &viewer.into())
        .await?;
    Ok(Json(DraftDto::from(&view)))
}

#[utoipa::path(
    put,
    path = "/requests/{id}/draft",
    params(("id" = String, Path, description = "Request id")),
    request_body = SaveDraftReq,
    responses(
        (status = 200, description = "Draft stored", body = DraftDto),
        (status = 409, description = "Draft closed or claimed by another technician", body = ErrorBody),
        (status = 503, description = "Draft could not be stored", body = ErrorBody)
    )
)]
/// Merge entered values into the request's draft.
///
/// The response is only sent once the draft is durably stored.
async fn save_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SaveDraftReq>,
) -> ApiResult<Json<DraftDto>> {
    let request_id = parse_id(&id)?;
    let (actor, patch) = req.into_parts();
    let view = state.service.save_draft(&request_id, &actor, &patch).await?;
    Ok(Json(DraftDto::from(&view)))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/draft/claim",
    params(("id" = String, Path, description = "Request id")),
    request_body = ActionReq,
    responses(
        (status = 200, description = "Draft now claimed by the actor", body = DraftDto),
        (status = 409, description = "Draft closed", body = ErrorBody)
    )
)]
/// Take over a draft whose owner is no longer available.
async fn take_over_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActionReq>,
) -> ApiResult<Json<DraftDto>> {
    let view = state
        .service
        .take_over_draft(&parse_id(&id)?, &req.actor.into())
        .await?;
    Ok(Json(DraftDto::from(&view)))
}

#[utoipa::path(
    delete,
    path = "/requests/{id}/draft/claim",
    params(("id" = String, Path, description = "Request id")),
    request_body = ActionReq,
    responses(
        (status = 200, description = "Claim released; values kept", body = DraftDto),
        (status = 409, description = "Draft closed or owned by someone else", body = ErrorBody)
    )
)]
async fn release_draft_claim(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActionReq>,
) -> ApiResult<Json<DraftDto>> {
    let view = state
        .service
        .release_draft_claim(&parse_id(&id)?, &req.actor.into())
        .await?;
    Ok(Json(DraftDto::from(&view)))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/finalize",
    params(("id" = String, Path, description = "Request id")),
    request_body = ActionReq,
    responses(
        (status = 200, description = "Results finalized", body = RequestDto),
        (status = 409, description = "Not in progress", body = ErrorBody),
        (status = 422, description = "Mandatory fields missing", body = ErrorBody)
    )
)]
async fn finalize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActionReq>,
) -> ApiResult<Json<RequestDto>> {
    let request = state
        .service
        .finalize(&parse_id(&id)?, &req.actor.into())
        .await?;
    Ok(Json(RequestDto::from(&request)))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/release",
    params(("id" = String, Path, description = "Request id")),
    request_body = ActionReq,
    responses(
        (status = 200, description = "Results released", body = RequestDto),
        (status = 409, description = "Not completed", body = ErrorBody),
        (status = 503, description = "Publishing failed; request is still completed", body = ErrorBody)
    )
)]
async fn release(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActionReq>,
) -> ApiResult<Json<RequestDto>> {
    let request = state
        .service
        .release(&parse_id(&id)?, &req.actor.into())
        .await?;
    Ok(Json(RequestDto::from(&request)))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/documents",
    params(("id" = String, Path, description = "Request id")),
    request_body = DocumentReq,
    responses(
        (status = 201, description = "Document generated and stored", body = DocumentRes),
        (status = 400, description = "Unknown format", body = ErrorBody),
        (status = 503, description = "Results not finalized or generator unavailable", body = ErrorBody)
    )
)]
async fn request_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DocumentReq>,
) -> ApiResult<(StatusCode, Json<DocumentRes>)> {
    let request_id = parse_id(&id)?;
    let handle = state
        .service
        .request_document(&request_id, req.format()?)
        .await?;
    Ok((StatusCode::CREATED, Json(DocumentRes::from(&handle))))
}

#[utoipa::path(
    get,
    path = "/released",
    responses(
        (status = 200, description = "Released results", body = ListRequestsRes)
    )
)]
async fn list_released(State(state): State<AppState>) -> Json<ListRequestsRes> {
    let requests = state
        .service
        .gateway()
        .released_all()
        .iter()
        .map(|r| RequestDto::from(r.as_ref()))
        .collect();
    Json(ListRequestsRes { requests })
}

#[utoipa::path(
    get,
    path = "/released/{id}",
    params(("id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Released result", body = RequestDto),
        (status = 404, description = "Not released", body = ErrorBody)
    )
)]
/// Read a result through the release gateway. Only `final` requests are visible here.
async fn get_released(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestDto>> {
    let request_id = parse_id(&id)?;
    let request = state
        .service
        .released(&request_id)
        .ok_or_else(|| LabError::NotFound {
            kind: "released request",
            id: request_id.to_string(),
        })?;
    Ok(Json(RequestDto::from(request.as_ref())))
}
