//! Route handlers for the reference ingest and aggregation API.

use super::store::{
    AnalyticsQuery, EventPage, EventQuery, EventStats, RecentActivity, StatsQuery, StoreError,
    Website, WebsiteAnalytics, WebsiteUpdate,
};
use super::validation::{
    sanitize_user_agent, validate_event, validate_registration, validate_update, FieldError,
    RegisterBody, UpdateBody,
};
use super::ServerState;
use crate::collector::types::EventRecord;
use crate::transport::API_KEY_HEADER;
use axum::{
    extract::{Query, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Most records accepted by one batch request.
pub const MAX_BATCH_EVENTS: usize = 100;

/// Successful response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(message: Option<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message,
            data,
        })
    }
}

/// Envelope for responses that carry only a message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Envelope with the payload fields inlined next to `success`.
#[derive(Debug, Serialize)]
pub struct FlatResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            message: message.into(),
            error: None,
            errors: Vec::new(),
        }),
    )
}

fn validation_failed(errors: Vec<FieldError>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            message: "Validation failed".to_string(),
            error: None,
            errors,
        }),
    )
}

/// `apiKey` query parameter, accepted in place of the header.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyParam {
    pub api_key: Option<String>,
}

/// Resolve the calling website from `X-API-Key` or `?apiKey=`.
async fn authenticate(
    state: &ServerState,
    headers: &HeaderMap,
    param: &ApiKeyParam,
) -> Result<Website, ApiError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(param.api_key.as_deref())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "API key is required"))?;

    state
        .store
        .read()
        .await
        .authenticate(api_key)
        .cloned()
        .ok_or_else(|| {
            error(
                StatusCode::UNAUTHORIZED,
                "Invalid API key or website is inactive",
            )
        })
}

/// Validate one raw payload and turn it into a record. A missing
/// timestamp is set to the time of receipt.
fn parse_event(mut body: Value) -> Result<EventRecord, Vec<FieldError>> {
    let errors = validate_event(&body);
    if !errors.is_empty() {
        return Err(errors);
    }

    if let Some(object) = body.as_object_mut() {
        if object.get("timestamp").map_or(true, Value::is_null) {
            object.insert(
                "timestamp".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
    }

    serde_json::from_value(body).map_err(|e| {
        vec![FieldError {
            field: "body".to_string(),
            message: e.to_string(),
            value: None,
        }]
    })
}

fn request_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(sanitize_user_agent)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchData {
    pub event_ids: Vec<String>,
    pub count: usize,
}

fn store_failure(e: StoreError) -> ApiError {
    tracing::error!(error = %e, "Failed to store events");
    error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to track event")
}

fn website_failure(e: StoreError) -> ApiError {
    match e {
        StoreError::DuplicateDomain => error(StatusCode::CONFLICT, e.to_string()),
        StoreError::UnknownWebsite => error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// POST /api/v1/events/track
pub async fn track_event(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<TrackData>>), ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    let record = parse_event(body).map_err(validation_failed)?;

    let mut accepted = state
        .store
        .write()
        .await
        .insert(
            &website.website_id,
            vec![record],
            request_user_agent(&headers).as_deref(),
        )
        .map_err(store_failure)?;

    let Some(accepted) = accepted.pop() else {
        return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to track event"));
    };
    tracing::debug!(website_id = %website.website_id, event_id = %accepted.event_id, "Tracked event");

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(
            Some("Event tracked successfully".to_string()),
            TrackData {
                event_id: accepted.event_id,
                timestamp: accepted.timestamp,
            },
        ),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    #[serde(default)]
    pub events: Option<Vec<Value>>,
}

/// POST /api/v1/events/track/batch
///
/// Every record must validate; otherwise nothing is stored.
pub async fn track_batch(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
    Json(body): Json<BatchBody>,
) -> Result<(StatusCode, Json<ApiResponse<BatchData>>), ApiError> {
    let website = authenticate(&state, &headers, &param).await?;

    let events = body.events.unwrap_or_default();
    if events.is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "Events array is required and must not be empty",
        ));
    }
    if events.len() > MAX_BATCH_EVENTS {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!("Maximum {MAX_BATCH_EVENTS} events allowed per batch"),
        ));
    }

    let mut records = Vec::with_capacity(events.len());
    let mut errors = Vec::new();
    for (index, event) in events.into_iter().enumerate() {
        match parse_event(event) {
            Ok(record) => records.push(record),
            Err(found) => errors.extend(found.into_iter().map(|mut e| {
                e.field = format!("events[{index}].{}", e.field);
                e
            })),
        }
    }
    if !errors.is_empty() {
        return Err(validation_failed(errors));
    }

    let count = records.len();
    let accepted = state
        .store
        .write()
        .await
        .insert(
            &website.website_id,
            records,
            request_user_agent(&headers).as_deref(),
        )
        .map_err(store_failure)?;
    tracing::debug!(website_id = %website.website_id, count, "Tracked event batch");

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(
            Some(format!("{count} events tracked successfully")),
            BatchData {
                event_ids: accepted.into_iter().map(|a| a.event_id).collect(),
                count,
            },
        ),
    ))
}

/// GET /api/v1/events/events
pub async fn list_events(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
    Query(query): Query<EventQuery>,
) -> Result<Json<ApiResponse<EventPage>>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    let page = state.store.read().await.query(&website.website_id, &query);
    Ok(ApiResponse::ok(None, page))
}

/// GET /api/v1/events/stats
pub async fn event_stats(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<EventStats>>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    let stats = state.store.read().await.stats(&website.website_id, &query);
    Ok(ApiResponse::ok(None, stats))
}

/// GET /api/v1/events/analytics
///
/// Dashboard feed: the latest events and counts per type.
pub async fn event_analytics(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
) -> Result<Json<FlatResponse<RecentActivity>>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    let activity = state.store.read().await.recent_activity(&website.website_id);
    Ok(Json(FlatResponse {
        success: true,
        data: activity,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredWebsite {
    pub website_id: String,
    pub name: String,
    pub domain: String,
    pub api_key: String,
    pub status: super::store::WebsiteStatus,
}

/// POST /api/v1/websites/register
pub async fn register_website(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<ApiResponse<RegisteredWebsite>>), ApiError> {
    let registration = validate_registration(&body).map_err(validation_failed)?;

    let mut store = state.store.write().await;
    let mut website = store
        .register(
            &registration.name,
            &registration.domain,
            registration.description,
        )
        .map_err(website_failure)?;
    if registration.owner.is_some() || registration.settings.is_some() {
        website = store
            .update(
                &website.website_id,
                WebsiteUpdate {
                    owner: registration.owner,
                    settings: registration.settings,
                    ..WebsiteUpdate::default()
                },
            )
            .map_err(website_failure)?;
    }
    drop(store);
    tracing::info!(website_id = %website.website_id, domain = %website.domain, "Registered website");

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(
            Some("Website registered successfully".to_string()),
            RegisteredWebsite {
                website_id: website.website_id,
                name: website.name,
                domain: website.domain,
                api_key: website.api_key,
                status: website.status,
            },
        ),
    ))
}

/// GET /api/v1/websites/details
pub async fn website_details(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
) -> Result<Json<ApiResponse<Website>>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    Ok(ApiResponse::ok(None, website))
}

/// PUT /api/v1/websites/update
pub async fn update_website(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<ApiResponse<Website>>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    let update = validate_update(&body).map_err(validation_failed)?;

    let updated = state
        .store
        .write()
        .await
        .update(&website.website_id, update)
        .map_err(website_failure)?;
    tracing::info!(website_id = %updated.website_id, status = ?updated.status, "Updated website");

    Ok(ApiResponse::ok(
        Some("Website updated successfully".to_string()),
        updated,
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegeneratedKey {
    pub website_id: String,
    pub new_api_key: String,
}

/// POST /api/v1/websites/regenerate-api-key
pub async fn regenerate_api_key(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
) -> Result<Json<ApiResponse<RegeneratedKey>>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    let new_api_key = state
        .store
        .write()
        .await
        .regenerate_api_key(&website.website_id)
        .map_err(website_failure)?;
    tracing::info!(website_id = %website.website_id, "Regenerated API key");

    Ok(ApiResponse::ok(
        Some("API key regenerated successfully".to_string()),
        RegeneratedKey {
            website_id: website.website_id,
            new_api_key,
        },
    ))
}

/// GET /api/v1/websites/analytics
pub async fn website_analytics(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<WebsiteAnalytics>>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    let analytics = state
        .store
        .read()
        .await
        .analytics(&website.website_id, &query, Utc::now());
    Ok(ApiResponse::ok(None, analytics))
}

/// DELETE /api/v1/websites/delete
///
/// Suspends the site; its events are kept.
pub async fn delete_website(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(param): Query<ApiKeyParam>,
) -> Result<Json<MessageResponse>, ApiError> {
    let website = authenticate(&state, &headers, &param).await?;
    state
        .store
        .write()
        .await
        .suspend(&website.website_id)
        .map_err(website_failure)?;
    tracing::info!(website_id = %website.website_id, "Suspended website");

    Ok(Json(MessageResponse {
        success: true,
        message: "Website deleted successfully".to_string(),
    }))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
