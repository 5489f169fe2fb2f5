use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use serde::Deserialize;

use retail_core::{ActorId, SaleId};
use retail_sales::{SaleReceipt, SaleRequest};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_sale).get(list_sales))
        .route("/:id", get(get_sale))
}

pub async fn create_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<SaleRequest>,
) -> axum::response::Response {
    match services.saga.create(body).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => errors::sale_error_to_response(e),
    }
}

pub async fn get_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let sale_id: SaleId = match errors::parse_id(&id, "sale id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let record = match services.saga.find(sale_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("sale {sale_id} not found"));
        }
        Err(e) => return errors::sale_store_error_to_response(e),
    };

    match SaleReceipt::from_record(&record) {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_sale", e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListSalesQuery {
    pub actor_id: Option<String>,
}

/// Sale history, newest first, with totals rebuilt from the price snapshots.
pub async fn list_sales(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListSalesQuery>,
) -> axum::response::Response {
    let actor = match query.actor_id.as_deref().filter(|raw| !raw.is_empty()) {
        Some(raw) => match errors::parse_id::<ActorId>(raw, "actor id") {
            Ok(id) => Some(id),
            Err(resp) => return resp,
        },
        None => None,
    };

    let records = match services.saga.list(actor).await {
        Ok(records) => records,
        Err(e) => return errors::sale_store_error_to_response(e),
    };

    match records
        .iter()
        .map(SaleReceipt::from_record)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(receipts) => Json(receipts).into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_sale", e.to_string()),
    }
}
