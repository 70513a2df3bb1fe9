//! Order retrieval from ShipStation.

use crate::http::build_client;
use crate::models::OrderRecord;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use once_cell::sync::Lazy;
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::env;
use thiserror::Error;
use tracing::{info, warn};

pub static ROOT: Lazy<String> = Lazy::new(|| {
    env::var("SHIPSTATION_ROOT")
        .ok()
        .map(|root| root.trim().trim_end_matches('/').to_string())
        .filter(|root| !root.is_empty())
        .unwrap_or_else(|| "https://ssapi.shipstation.com".to_string())
});

#[derive(Debug, Error)]
pub enum ShipStationError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<OrderRecord>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    success: Value,
    #[serde(default)]
    message: Option<String>,
}

impl RefreshResponse {
    /// The endpoint answers `"true"` as a string; accept a JSON bool as well.
    fn succeeded(&self) -> bool {
        match &self.success {
            Value::Bool(flag) => *flag,
            Value::String(text) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShipStationClient {
    base_url: String,
    authorization: String,
    store_id: String,
    http: Client,
}

impl ShipStationClient {
    /// `None` unless key, secret and store id are all configured.
    pub fn from_env() -> Option<Self> {
        let key = env::var("SHIPSTATION_API_KEY").ok()?;
        let secret = env::var("SHIPSTATION_API_SECRET").ok()?;
        let store_id = env::var("SHIPSTATION_STORE_ID").ok()?;
        Some(Self::new(ROOT.as_str(), &key, &secret, &store_id))
    }

    pub fn new(base_url: &str, key: &str, secret: &str, store_id: &str) -> Self {
        let credentials = BASE64.encode(format!("{key}:{secret}"));
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: format!("Basic {credentials}"),
            store_id: store_id.trim().to_string(),
            http: build_client(),
        }
    }

    /// Asks ShipStation to pull fresh orders from the storefront. Returns
    /// whether the refresh was accepted.
    pub async fn refresh_store(&self) -> Result<bool, ShipStationError> {
        let url = format!(
            "{}/stores/refreshstore?storeId={}",
            self.base_url,
            urlencoding::encode(&self.store_id)
        );
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|err| ShipStationError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ShipStationError::Status {
                endpoint: "refreshstore",
                status: response.status().as_u16(),
            });
        }

        let payload: RefreshResponse = response
            .json()
            .await
            .map_err(|err| ShipStationError::Deserialize(err.to_string()))?;
        let ok = payload.succeeded();
        if ok {
            info!(target = "pickwell.shipstation", store_id = %self.store_id, "store refresh accepted");
        } else {
            warn!(
                target = "pickwell.shipstation",
                store_id = %self.store_id,
                message = payload.message.as_deref().unwrap_or(""),
                "store refresh failed"
            );
        }
        Ok(ok)
    }

    pub async fn awaiting_shipment(&self) -> Result<Vec<OrderRecord>, ShipStationError> {
        let url = format!(
            "{}/orders?orderStatus=awaiting_shipment&storeId={}",
            self.base_url,
            urlencoding::encode(&self.store_id)
        );
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|err| ShipStationError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ShipStationError::Status {
                endpoint: "orders",
                status: response.status().as_u16(),
            });
        }

        let page: OrdersPage = response
            .json()
            .await
            .map_err(|err| ShipStationError::Deserialize(err.to_string()))?;
        info!(
            target = "pickwell.shipstation",
            count = page.orders.len(),
            "fetched orders awaiting shipment"
        );
        Ok(page.orders)
    }
}
