//! Client for the signing service that turns box writes into ledger
//! transactions.

use crate::error::StoreError;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct RemoteSigner {
    base: String,
    client: Client,
}

impl RemoteSigner {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn box_url(&self, app_id: u64, key: &[u8]) -> String {
        format!(
            "{}/apps/{}/boxes/{}",
            self.base,
            app_id,
            general_purpose::URL_SAFE_NO_PAD.encode(key)
        )
    }

    pub async fn put_box(&self, app_id: u64, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let url = self.box_url(app_id, key);
        let body = serde_json::json!({ "value": general_purpose::STANDARD.encode(value) });
        let resp = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        debug!(url = %url, status = %resp.status(), "box put");
        check(resp, key, false).await
    }

    /// Deleting a box that does not exist succeeds.
    pub async fn delete_box(&self, app_id: u64, key: &[u8]) -> Result<(), StoreError> {
        let url = self.box_url(app_id, key);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        debug!(url = %url, status = %resp.status(), "box delete");
        check(resp, key, true).await
    }
}

async fn check(resp: Response, key: &[u8], absent_ok: bool) -> Result<(), StoreError> {
    let status = resp.status();
    if status.is_success() || (absent_ok && status == StatusCode::NOT_FOUND) {
        Ok(())
    } else if status == StatusCode::CONFLICT {
        Err(StoreError::Conflict {
            key: general_purpose::STANDARD.encode(key),
        })
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
