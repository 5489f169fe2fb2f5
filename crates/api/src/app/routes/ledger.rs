//! Ledger service: the remote stock operations, served from the hosted ledger.
//!
//! Business rejections are `200 OK` with `success = false`; storage faults are 503
//! so a remote gateway reports an unknown outcome.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use retail_core::ProductId;
use retail_infra::ledger::StockLedger;
use retail_infra::reconcile::reconcile_ledger;
use retail_inventory::{
    AdjustStockRequest, BatchGetStockRequest, BatchGetStockResponse, DecreaseStockRequest,
    GetStockResponse, StockLevel,
};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/stock/batch", post(batch_get_stock))
        .route("/stock/decrease", post(decrease_stock))
        .route("/stock/adjust", post(adjust_stock))
        .route("/stock/:product_id", get(get_stock))
        .route("/stock/:product_id/audit", get(audit_trail))
        .route("/reconcile", get(reconcile))
}

fn hosted(services: &AppServices) -> Result<&Arc<dyn StockLedger>, axum::response::Response> {
    services.ledger.as_ref().ok_or_else(|| {
        errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ledger_not_hosted",
            "this instance does not host the stock ledger",
        )
    })
}

pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let ledger = match hosted(&services) {
        Ok(l) => l,
        Err(resp) => return resp,
    };
    let product_id: ProductId = match errors::parse_id(&product_id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match ledger.get_stock(product_id).await {
        Ok(Some(quantity)) => Json(GetStockResponse {
            product_id,
            quantity,
        })
        .into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no stock record for product {product_id}"),
        ),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn batch_get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<BatchGetStockRequest>,
) -> axum::response::Response {
    let ledger = match hosted(&services) {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    match ledger.batch_get_stock(&body.product_ids).await {
        Ok(quantities) => Json(BatchGetStockResponse {
            items: quantities
                .into_iter()
                .map(|(product_id, quantity)| StockLevel {
                    product_id,
                    quantity,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn decrease_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<DecreaseStockRequest>,
) -> axum::response::Response {
    let ledger = match hosted(&services) {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    match ledger.decrease_stock(body).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<AdjustStockRequest>,
) -> axum::response::Response {
    let ledger = match hosted(&services) {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    match ledger.adjust_stock(body).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn audit_trail(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let ledger = match hosted(&services) {
        Ok(l) => l,
        Err(resp) => return resp,
    };
    let product_id: ProductId = match errors::parse_id(&product_id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match ledger.audit_trail(product_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Products whose quantity disagrees with their audit history (empty when consistent).
pub async fn reconcile(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let ledger = match hosted(&services) {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    match reconcile_ledger(ledger.as_ref()).await {
        Ok(discrepancies) => Json(serde_json::json!({
            "consistent": discrepancies.is_empty(),
            "discrepancies": discrepancies,
        }))
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
