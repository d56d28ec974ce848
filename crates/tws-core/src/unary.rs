//! Unary operation client over HTTP.
//!
//! `POST <url>` with body `{"operation": .., "input": ..}`. The server answers
//! HTTP 200 with `{"data": <output>}`, or `{"error": <message>}` when the
//! operation failed. Any other status is a server failure.

use crate::config::NetworkConfig;
use crate::error::{Result, TwsError};
use crate::logger::SharedLogger;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Request body of a unary operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnaryRequest<I> {
    pub operation: String,
    pub input: I,
}

/// Response body of a unary operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnaryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl UnaryResponse {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(Value::String(message.into())),
        }
    }
}

/// HTTP client for unary operations.
pub struct UnaryClient {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
    logger: SharedLogger,
}

impl UnaryClient {
    pub fn new(
        url: impl Into<String>,
        headers: HashMap<String, String>,
        logger: SharedLogger,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| TwsError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            url: url.into(),
            headers,
            logger,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Execute `operation` with `input` and decode its output.
    pub async fn execute<I, O>(&self, operation: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let body = UnaryRequest {
            operation: operation.to_string(),
            input,
        };

        let mut request = self.client.post(&self.url).json(&body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        debug!("POST {} operation={}", self.url, operation);
        let response = request.send().await.map_err(|e| TwsError::Network {
            message: format!("POST {} failed: {}", self.url, e),
            source: Some(e),
        })?;

        let status = response.status();
        let text = response.text().await?;

        let data = self.interpret(status, text)?;
        Ok(serde_json::from_value(data)?)
    }

    /// Execute an operation that takes no input; the body carries `{}`.
    pub async fn execute_without_input<O: DeserializeOwned>(&self, operation: &str) -> Result<O> {
        self.execute(operation, &serde_json::Map::new()).await
    }

    fn interpret(&self, status: StatusCode, text: String) -> Result<Value> {
        if status != StatusCode::OK {
            self.logger.error(&format!(
                "Server responded with status code {}: {}",
                status.as_u16(),
                text
            ));
            return Err(TwsError::Server {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: UnaryResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => {
                self.logger
                    .error(&format!("Server responded with invalid JSON: {}", text));
                return Err(TwsError::InvalidResponse { body: text });
            }
        };

        if let Some(error) = parsed.error.filter(|e| !e.is_null()) {
            self.logger
                .error(&format!("Server responded with error: {}", error));
            let message = match error {
                Value::String(message) => message,
                other => other.to_string(),
            };
            return Err(TwsError::Remote { message });
        }

        Ok(parsed.data.unwrap_or(Value::Null))
    }
}
