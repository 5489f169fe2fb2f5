use axum::Router;

pub mod catalog;
pub mod inventory;
pub mod ledger;
pub mod sales;
pub mod system;

/// Router for every service endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/ledger", ledger::router())
        .nest("/sales", sales::router())
        .nest("/inventory", inventory::router())
        .nest("/catalog", catalog::router())
}
