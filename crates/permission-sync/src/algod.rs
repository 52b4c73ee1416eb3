//! Minimal node (algod) REST client: box listing and reads, account local
//! state.

use crate::error::{FeedError, HttpFailure, StoreError};
use base64::{engine::general_purpose, Engine as _};
use permission_core::Address;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const TOKEN_HEADER: &str = "X-Algo-API-Token";

#[derive(Debug, Deserialize)]
struct BoxDescriptor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BoxesResponse {
    #[serde(default)]
    boxes: Vec<BoxDescriptor>,
    #[serde(rename = "next-token", default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoxResponse {
    value: String,
}

#[derive(Debug, Deserialize)]
struct TealValue {
    #[serde(default)]
    bytes: String,
}

#[derive(Debug, Deserialize)]
struct TealKeyValue {
    key: String,
    value: TealValue,
}

#[derive(Debug, Deserialize)]
struct AppLocalState {
    id: u64,
    #[serde(rename = "key-value", default)]
    key_value: Vec<TealKeyValue>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(rename = "apps-local-state", default)]
    apps_local_state: Vec<AppLocalState>,
}

/// Box names of one listing page, already base64-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxNames {
    pub names: Vec<Vec<u8>>,
    pub next: Option<String>,
}

#[derive(Clone)]
pub struct AlgodClient {
    base: String,
    token: Option<String>,
    client: Client,
}

impl AlgodClient {
    pub fn new(base: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn request(&self, url: &str, query: &[(&str, String)]) -> RequestBuilder {
        let request = self.client.get(url).query(query);
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    /// GET returning `None` on 404.
    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, HttpFailure> {
        let resp = self.request(url, query).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(Some(resp.json::<T>().await?))
        } else if status == StatusCode::NOT_FOUND {
            Ok(None)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(HttpFailure::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    pub async fn box_names(&self, app_id: u64, max: u32, next: Option<&str>) -> Result<BoxNames, StoreError> {
        let url = format!("{}/v2/applications/{}/boxes", self.base, app_id);
        let mut query = vec![("max", max.to_string())];
        if let Some(next) = next {
            query.push(("next", next.to_string()));
        }
        let Some(resp) = self.fetch::<BoxesResponse>(&url, &query).await? else {
            return Ok(BoxNames::default());
        };
        let names = resp
            .boxes
            .iter()
            .map(|b| decode_b64(&b.name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BoxNames {
            names,
            next: resp.next_token.filter(|t| !t.is_empty()),
        })
    }

    pub async fn box_value(&self, app_id: u64, name: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let url = format!("{}/v2/applications/{}/box", self.base, app_id);
        let query = [("name", format!("b64:{}", general_purpose::STANDARD.encode(name)))];
        match self.fetch::<BoxResponse>(&url, &query).await? {
            Some(resp) => Ok(Some(decode_b64(&resp.value)?)),
            None => Ok(None),
        }
    }

    /// Raw bytes stored under `key` in `address`'s local state of `app_id`.
    /// `None` when the account has not opted in or holds no such key.
    pub async fn local_state_value(
        &self,
        address: &Address,
        app_id: u64,
        key: &str,
    ) -> Result<Option<Vec<u8>>, FeedError> {
        let url = format!("{}/v2/accounts/{}", self.base, address);
        let Some(account) = self.fetch::<AccountResponse>(&url, &[]).await? else {
            return Ok(None);
        };
        let entry = account
            .apps_local_state
            .into_iter()
            .filter(|state| state.id == app_id)
            .flat_map(|state| state.key_value)
            .find(|kv| kv.key == key);
        match entry {
            Some(kv) => general_purpose::STANDARD
                .decode(kv.value.bytes)
                .map(Some)
                .map_err(|e| FeedError::Decode(e.to_string())),
            None => Ok(None),
        }
    }
}

fn decode_b64(text: &str) -> Result<Vec<u8>, StoreError> {
    general_purpose::STANDARD
        .decode(text)
        .map_err(|e| StoreError::Decode(e.to_string()))
}
