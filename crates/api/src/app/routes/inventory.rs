use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post},
};

use retail_core::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/adjustments", post(create_adjustment))
        .route("/stock/:product_id", get(get_stock))
}

pub async fn create_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateAdjustmentRequest>,
) -> axum::response::Response {
    let (adjustment, idempotency_key) = body.into_parts();

    match services.adjustments.apply(adjustment, idempotency_key).await {
        Ok(outcome) => Json(dto::AdjustmentResponse::from(outcome)).into_response(),
        Err(e) => errors::adjustment_error_to_response(e),
    }
}

/// Storefront stock read, served from the mirror.
pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&product_id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // A product never stocked reads as zero on the storefront.
    match services.mirror.get(product_id).await {
        Ok(quantity) => Json(dto::StockResponse {
            product_id,
            quantity: quantity.unwrap_or(0),
        })
        .into_response(),
        Err(e) => errors::gateway_error_to_response(e),
    }
}
