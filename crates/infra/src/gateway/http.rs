//! JSON-over-HTTP client for a remote ledger service.
//!
//! The service side lives in `retail-api` (`/ledger/...` routes). Business rejections
//! arrive as `200 OK` bodies with `success = false`; any other non-success status,
//! connection failure, timeout or undecodable body becomes a `GatewayError`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use retail_core::ProductId;
use retail_inventory::{
    AdjustStockRequest, AdjustStockResponse, AuditEntry, BatchGetStockRequest,
    BatchGetStockResponse, DecreaseStockRequest, DecreaseStockResponse, GetStockResponse,
};

use super::{GatewayError, LedgerGateway};

#[derive(Debug, Clone)]
pub struct HttpLedgerGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpLedgerGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else if err.is_connect() || err.is_request() {
            GatewayError::Unavailable(err.to_string())
        } else if err.is_decode() {
            GatewayError::Protocol(err.to_string())
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "ledger returned an error status");
            return Err(match status {
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                    GatewayError::Unavailable(format!("{status}: {body}"))
                }
                s if s.is_server_error() => GatewayError::Internal(format!("{status}: {body}")),
                _ => GatewayError::Protocol(format!("unexpected status {status}: {body}")),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Protocol(format!("invalid ledger response: {e}")))
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<i64>, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/ledger/stock/{product_id}")))
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: GetStockResponse = self.decode(response).await?;
        Ok(Some(body.quantity))
    }

    async fn batch_get_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>, GatewayError> {
        if product_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let response = self
            .client
            .post(self.url("/ledger/stock/batch"))
            .json(&BatchGetStockRequest {
                product_ids: product_ids.to_vec(),
            })
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let body: BatchGetStockResponse = self.decode(response).await?;
        Ok(body
            .items
            .into_iter()
            .map(|level| (level.product_id, level.quantity))
            .collect())
    }

    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id), err)]
    async fn decrease_stock(
        &self,
        request: DecreaseStockRequest,
    ) -> Result<DecreaseStockResponse, GatewayError> {
        let response = self
            .client
            .post(self.url("/ledger/stock/decrease"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        self.decode(response).await
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id), err)]
    async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<AdjustStockResponse, GatewayError> {
        let response = self
            .client
            .post(self.url("/ledger/stock/adjust"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        self.decode(response).await
    }

    async fn audit_trail(&self, product_id: ProductId) -> Result<Vec<AuditEntry>, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/ledger/stock/{product_id}/audit")))
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        self.decode(response).await
    }
}
