//! `getSignatureStatuses` over HTTP JSON-RPC

use crate::signature::{SignatureStatus, SignatureStatusClient};
use async_trait::async_trait;
use chainsub_core::{Error, JsonRpcErrorData, JsonRpcRequest, ManagerConfig, Network, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Status client against each network's configured HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpStatusClient {
    client: Client,
    endpoints: HashMap<Network, String>,
}

impl HttpStatusClient {
    pub fn new(config: &ManagerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &ManagerConfig) -> Self {
        let endpoints = config
            .networks
            .iter()
            .filter_map(|n| n.http_url.clone().map(|url| (n.network.clone(), url)))
            .collect();
        Self { client, endpoints }
    }

    pub fn has_endpoint(&self, network: &Network) -> bool {
        self.endpoints.contains_key(network)
    }
}

#[async_trait]
impl SignatureStatusClient for HttpStatusClient {
    #[tracing::instrument(skip(self))]
    async fn signature_status(&self, network: &Network, signature: &str) -> Result<Option<SignatureStatus>> {
        let url = self
            .endpoints
            .get(network)
            .ok_or_else(|| Error::Config(format!("no HTTP endpoint configured for network '{}'", network)))?;

        let request = JsonRpcRequest::new(
            "getSignatureStatuses",
            vec![
                serde_json::json!([signature]),
                serde_json::json!({ "searchTransactionHistory": true }),
            ],
            1u64,
        );

        let resp = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("failed to read body: {}", e)))?;
        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        parse_status_response(&text)
    }
}

fn parse_status_response(text: &str) -> Result<Option<SignatureStatus>> {
    let body: serde_json::Value = serde_json::from_str(text)?;

    if let Some(error) = body.get("error") {
        let error: JsonRpcErrorData = serde_json::from_value(error.clone())?;
        return Err(Error::JsonRpc(error));
    }

    match body.pointer("/result/value/0") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(status) => Ok(Some(serde_json::from_value(status.clone())?)),
    }
}
