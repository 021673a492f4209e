//! HTTP request handlers for the billing relay.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::jobs::{DispatchSnapshot, PublishDispatcher, PublishJob};
use crate::messaging::HealthProbe;
use crate::scheduler::SubscriptionStore;
use crate::types::{BillingRequest, EventType, NewSubscription, Subscription};

/// Application state shared across handlers.
pub struct AppState {
    pub dispatcher: PublishDispatcher,
    pub health: Arc<dyn HealthProbe>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
}

/// Errors returned to HTTP clients as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Validation(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

/// Response for an accepted billing request.
#[derive(Debug, Serialize)]
pub struct BillingAccepted {
    status: &'static str,
    message: &'static str,
    username: String,
}

/// Queue a billing request for publishing and return without waiting.
pub async fn process_billing(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BillingRequest>, JsonRejection>,
) -> Result<Json<BillingAccepted>, ApiError> {
    let Json(request) = payload?;
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    info!(
        username = %request.username,
        amount = request.amount,
        currency = %request.currency,
        "Received billing request"
    );

    let data = serde_json::to_value(&request).map_err(|e| {
        error!(error = %e, "Failed to encode billing request");
        ApiError::Internal
    })?;

    state
        .dispatcher
        .submit(PublishJob {
            event_type: EventType::BillingRequest,
            data,
            reference: request.username.clone(),
        })
        .map_err(|e| {
            error!(username = %request.username, error = %e, "Failed to queue billing request");
            ApiError::Internal
        })?;

    Ok(Json(BillingAccepted {
        status: "processing",
        message: "Billing request queued for processing",
        username: request.username,
    }))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    message: String,
    /// Background publish counters since start
    publishing: DispatchSnapshot,
}

/// Report whether the broker accepts connections, plus intake publish stats.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let publishing = state.dispatcher.stats();

    match state.health.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            message: "Service healthy".to_string(),
            publishing,
        }),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            Json(HealthResponse {
                status: "error",
                message: format!("Service unhealthy: {}", e),
                publishing,
            })
        }
    }
}

/// Store a subscription for the daily scan.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewSubscription>, JsonRejection>,
) -> Result<Json<Subscription>, ApiError> {
    let Json(subscription) = payload?;
    if subscription.price <= 0.0 {
        return Err(ApiError::Validation(format!(
            "price must be greater than zero, got {}",
            subscription.price
        )));
    }

    let stored = state.subscriptions.insert(subscription).await.map_err(|e| {
        error!(error = %e, "Failed to store subscription");
        ApiError::Internal
    })?;

    info!(
        id = stored.id,
        user_id = stored.user_id,
        next_payment_date = %stored.next_payment_date,
        "Subscription created"
    );
    Ok(Json(stored))
}
