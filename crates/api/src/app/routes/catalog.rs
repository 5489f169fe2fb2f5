//! Minimal catalog maintenance so the storefront has something to sell.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use retail_core::{Money, ProductId};
use retail_products::{CatalogEntry, CatalogError, ProductCatalog};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:product_id", get(get_entry).put(upsert_entry))
}

pub async fn upsert_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
    Json(body): Json<dto::UpsertCatalogEntryRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&product_id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.name.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_input", "name is required");
    }

    let entry = CatalogEntry::new(product_id, body.name, Money::from_minor(body.unit_price));
    match services.catalog.upsert(entry.clone()) {
        Ok(()) => Json(dto::CatalogEntryResponse::from(entry)).into_response(),
        Err(e) => catalog_error_to_response(e),
    }
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&product_id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.catalog.lookup(product_id).await {
        Ok(entry) => Json(dto::CatalogEntryResponse::from(entry)).into_response(),
        Err(e) => catalog_error_to_response(e),
    }
}

fn catalog_error_to_response(err: CatalogError) -> axum::response::Response {
    match err {
        CatalogError::NotFound(product_id) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("product {product_id} not in catalog"),
        ),
        CatalogError::Backend(msg) => {
            errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "catalog_unavailable", msg)
        }
    }
}
