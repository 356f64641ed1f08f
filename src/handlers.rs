//! HTTP endpoints implemented by the facilitator.
//!
//! Server-side handlers for client-submitted x402 payments: the protocol-critical
//! `/verify` and `/settle`, the `/supported` capability listing, and the
//! discovery endpoints. Payloads follow the wire types in [`crate::types`] and
//! are compatible with the official x402 client SDKs.
//!
//! Status policy: every domain outcome (including failed verification) is an
//! HTTP 200 carrying the canonical response shape; schema-invalid bodies are 400;
//! connectivity problems below the facilitator surface as 502. Response bodies
//! never contain key material or raw payloads.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Query};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::discovery::{DiscoveryRegistry, ListFilters};
use crate::facilitator::Facilitator;
use crate::facilitator_local::FacilitatorLocal;
use crate::provider_cache::ProviderCache;
use crate::types::{
    FacilitatorErrorReason, SettleRequest, SettleResponse, VerifyRequest, VerifyResponse,
};

type LocalFacilitator = Arc<FacilitatorLocal<ProviderCache>>;

/// `GET /verify`: machine-readable description of the verify endpoint.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: machine-readable description of the settle endpoint.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: payment kinds this facilitator can verify and settle.
#[instrument(skip_all)]
pub async fn get_supported(
    Extension(facilitator): Extension<LocalFacilitator>,
) -> impl IntoResponse {
    match facilitator.supported().await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "supported kinds enumeration failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(crate::types::ErrorResponse {
                    error: "Internal server error".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Whether a failure is the facilitator's own infrastructure rather than a
/// judgment on the payment.
fn is_infrastructure(reason: FacilitatorErrorReason) -> bool {
    matches!(
        reason,
        FacilitatorErrorReason::RpcConnectionFailed
            | FacilitatorErrorReason::UnexpectedVerifyError
            | FacilitatorErrorReason::UnexpectedSettleError
    )
}

/// `POST /verify`: facilitator-side verification of a proposed payment.
#[instrument(skip_all)]
pub async fn post_verify(
    Extension(facilitator): Extension<LocalFacilitator>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "schema-invalid verify request");
            return (
                StatusCode::BAD_REQUEST,
                Json(VerifyResponse::invalid(
                    None,
                    FacilitatorErrorReason::InvalidPayload,
                )),
            )
                .into_response();
        }
    };

    let payer_hint = body.payment_payload.payload.payer_hint();
    match facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(error = ?error, "verification failed");
            let reason = error.verify_reason();
            let payer = error.payer().or(payer_hint);
            let status = if is_infrastructure(reason) {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::OK
            };
            (status, Json(VerifyResponse::invalid(payer, reason))).into_response()
        }
    }
}

/// `POST /settle`: facilitator-side execution of a valid payment on-chain.
#[instrument(skip_all)]
pub async fn post_settle(
    Extension(facilitator): Extension<LocalFacilitator>,
    body: Result<Json<SettleRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "schema-invalid settle request");
            let response = SettleResponse {
                success: false,
                error_reason: Some(FacilitatorErrorReason::InvalidPayload),
                payer: None,
                transaction: None,
                // The body did not parse, so no network is known; default to the
                // facilitator's primary network for the shaped error body.
                network: crate::network::Network::Base,
            };
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let payer_hint = body.payment_payload.payload.payer_hint();
    let network = body.payment_payload.network;
    match facilitator.settle(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(error = ?error, "settlement failed");
            let reason = error.settle_reason();
            let payer = error.payer().or(payer_hint);
            let status = if is_infrastructure(reason) {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::OK
            };
            let response = SettleResponse {
                success: false,
                error_reason: Some(reason),
                payer,
                transaction: None,
                network,
            };
            (status, Json(response)).into_response()
        }
    }
}

/// Raw query parameters of `GET /discovery/resources`; `metadata` arrives as a
/// JSON-encoded string.
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(rename = "type")]
    resource_type: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    metadata: Option<String>,
}

/// `GET /discovery/resources`: list catalogued resources.
#[instrument(skip_all)]
pub async fn get_discovery_resources(
    Extension(discovery): Extension<Arc<DiscoveryRegistry>>,
    query: Result<Query<DiscoveryQuery>, QueryRejection>,
) -> impl IntoResponse {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(crate::types::ErrorResponse {
                    error: format!("Invalid query: {rejection}"),
                }),
            )
                .into_response();
        }
    };
    let metadata = match query.metadata.as_deref().map(serde_json::from_str) {
        None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(error)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(crate::types::ErrorResponse {
                    error: format!("Invalid metadata filter: {error}"),
                }),
            )
                .into_response();
        }
    };
    let filters = ListFilters {
        resource_type: query.resource_type,
        metadata,
        limit: query.limit,
        offset: query.offset,
    };
    let listing = discovery.list(&filters).await;
    (StatusCode::OK, Json(listing)).into_response()
}

/// `GET /list`: legacy alias for the discovery listing.
///
/// A hand-built 301: `Redirect::permanent` would emit 308, and clients of the
/// old endpoint expect `301 Moved Permanently`.
#[instrument(skip_all)]
pub async fn get_list_redirect() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/discovery/resources")],
    )
}
