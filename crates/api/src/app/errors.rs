use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use retail_core::DomainError;
use retail_infra::gateway::GatewayError;
use retail_infra::ledger::LedgerError;
use retail_infra::saga::{AdjustmentError, SaleError};
use retail_infra::sale_records::SaleStoreError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = match &err {
        DomainError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        DomainError::NotFound { .. }
        | DomainError::InsufficientStock { .. }
        | DomainError::StockWouldGoNegative { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::Conflict { .. } => StatusCode::CONFLICT,
    };
    (
        status,
        axum::Json(json!({
            "error": err.code(),
            "message": err.to_string(),
            "rejection": err,
        })),
    )
        .into_response()
}

pub fn gateway_error_to_response(err: GatewayError) -> axum::response::Response {
    let status = match &err {
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Unavailable(_) | GatewayError::Internal(_) | GatewayError::Protocol(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    json_error(status, err.code(), err.to_string())
}

pub fn sale_error_to_response(err: SaleError) -> axum::response::Response {
    match err {
        SaleError::Rejected(rejection) => domain_error_to_response(rejection),
        SaleError::CatalogUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "catalog_unavailable", msg)
        }
        err @ SaleError::LedgerOutcomeUnknown { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "ledger_outcome_unknown", err.to_string())
        }
        err @ SaleError::PersistenceFailed { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "sale_persistence_failed",
            err.to_string(),
        ),
    }
}

pub fn adjustment_error_to_response(err: AdjustmentError) -> axum::response::Response {
    match err {
        AdjustmentError::Rejected(rejection) => domain_error_to_response(rejection),
        err @ AdjustmentError::LedgerOutcomeUnknown { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "ledger_outcome_unknown", err.to_string())
        }
    }
}

/// Ledger storage faults surface as 503 so remote callers treat the outcome as unknown.
pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Storage(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "ledger_storage", msg),
    }
}

pub fn sale_store_error_to_response(err: SaleStoreError) -> axum::response::Response {
    match err {
        SaleStoreError::Duplicate(sale_id) => {
            json_error(StatusCode::CONFLICT, "duplicate_sale", format!("sale {sale_id} already exists"))
        }
        SaleStoreError::Storage(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "sale_store_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse::<T>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_input",
            format!("invalid {what}: {raw}"),
        )
    })
}
