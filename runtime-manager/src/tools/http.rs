//! Tool transport backed by an HTTP tool server.

use async_trait::async_trait;
use reqwest::Client;
use runtime_common::ToolCallResult;
use serde::Serialize;
use serde_json::Value;

use super::ToolTransport;
use crate::error::{Error, Result};

/// Forwards tool calls to `POST {base_url}/tools/call` and cancellations to
/// `POST {base_url}/tools/cancel`.
pub struct HttpToolTransport {
    http_client: Client,
    base_url: String,
}

impl HttpToolTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ToolCallRequest<'a> {
    tool_name: &'a str,
    arguments: &'a Value,
    cancellation_token: &'a str,
}

#[derive(Debug, Serialize)]
struct ToolCancelRequest<'a> {
    cancellation_token: &'a str,
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn call_tool(&self, name: &str, arguments: &Value, token: &str) -> Result<ToolCallResult> {
        let url = format!("{}/tools/call", self.base_url);
        let request = ToolCallRequest {
            tool_name: name,
            arguments,
            cancellation_token: token,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Communication(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Communication(format!(
                "Tool server returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Communication(format!("Invalid tool response: {}", e)))
    }

    async fn cancel_tool_call(&self, token: &str) -> Result<()> {
        let url = format!("{}/tools/cancel", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&ToolCancelRequest {
                cancellation_token: token,
            })
            .send()
            .await
            .map_err(|e| Error::Communication(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Communication(format!(
                "Tool server returned {} for cancel",
                response.status()
            )));
        }
        Ok(())
    }
}
