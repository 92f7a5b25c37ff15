//! HTTP block gateway client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use scribe_core::error::{ChainError, ChainResult};
use scribe_core::models::Block;
use scribe_core::ports::ChainClient;

/// How long a single block request may take before it counts as failed.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chain client talking to a node's HTTP block gateway.
///
/// `GET {base}/get_block?blockNumber=n` returns the full block with
/// transactions and receipts; omitting the number returns the head.
pub struct HttpChainClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpChainClient {
    pub fn new(base_url: &str) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_block(&self, number: Option<u64>) -> ChainResult<Block> {
        let url = match number {
            Some(n) => format!("{}/get_block?blockNumber={n}", self.base_url),
            None => format!("{}/get_block", self.base_url),
        };
        debug!(%url, "Fetching block");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The gateway reports unknown blocks inside an error body
            if let Some(n) = number {
                if body.contains("BLOCK_NOT_FOUND") {
                    return Err(ChainError::NotFound(n));
                }
            }
            return Err(ChainError::Rpc(format!("{status}: {body}")));
        }

        response
            .json::<Block>()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    #[instrument(skip(self))]
    async fn get_block(&self, number: u64) -> ChainResult<Block> {
        self.fetch_block(Some(number)).await
    }

    async fn latest_block(&self) -> ChainResult<u64> {
        let head = self.fetch_block(None).await?;
        Ok(head.block_number)
    }
}
