//! HTTP_REQUEST executor backed by `reqwest`.
//!
//! Payload: `{url, method?, headers?, body?}`. `method` defaults to GET and
//! `body` may be a string or any JSON value (sent as JSON). A non-2xx
//! response is a task failure. The result is `{status, body}`, with the body
//! truncated to [`MAX_BODY_BYTES`].

use std::time::Duration;

use mender_core::workflow::executor::{TaskExecutor, TaskInvocation};
use mender_core::workflow::simulation::{SimulationDirectives, simulate_work};
use mender_types::error::ExecutionError;
use serde_json::{Value, json};

use super::optional_str;

pub const MAX_BODY_BYTES: usize = 4096;

pub struct HttpExecutor {
    client: reqwest::Client,
    simulated_work: Duration,
}

impl HttpExecutor {
    pub fn new(timeout: Duration, simulated_work: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mender/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            simulated_work,
        })
    }

    async fn send(&self, url: &str, payload: &Value) -> Result<Value, ExecutionError> {
        let method = optional_str(payload, "method")
            .map_err(ExecutionError::Failed)?
            .unwrap_or("GET");
        let http_method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| ExecutionError::Failed(format!("invalid HTTP method: {method}")))?;

        let mut request = self.client.request(http_method, url);

        match payload.get("headers") {
            None | Some(Value::Null) => {}
            Some(Value::Object(headers)) => {
                for (key, value) in headers {
                    let value = value.as_str().ok_or_else(|| {
                        ExecutionError::Failed(format!("header '{key}' must be a string"))
                    })?;
                    request = request.header(key.as_str(), value);
                }
            }
            Some(_) => {
                return Err(ExecutionError::Failed("'headers' must be an object".to_string()));
            }
        }

        match payload.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(body)) => request = request.body(body.clone()),
            Some(other) => request = request.json(other),
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::Failed(format!("HTTP request to '{url}' failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::Failed(format!("failed to read HTTP response body: {e}")))?;

        tracing::info!(
            url,
            status = status.as_u16(),
            body_len = body.len(),
            "HTTP task completed"
        );

        if !status.is_success() {
            return Err(ExecutionError::Failed(format!(
                "HTTP {} from '{url}'",
                status.as_u16()
            )));
        }

        Ok(json!({
            "status": status.as_u16(),
            "body": truncate_body(body),
        }))
    }
}

impl TaskExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, invocation: &TaskInvocation) -> Result<Value, ExecutionError> {
        SimulationDirectives::from_payload(&invocation.payload)
            .apply(invocation.attempt)
            .await?;

        match optional_str(&invocation.payload, "url").map_err(ExecutionError::Failed)? {
            Some(url) => self.send(url, &invocation.payload).await,
            None => Ok(simulate_work(self.simulated_work).await),
        }
    }
}

/// Cut `body` to at most [`MAX_BODY_BYTES`] on a char boundary.
fn truncate_body(mut body: String) -> String {
    if body.len() <= MAX_BODY_BYTES {
        return body;
    }
    let mut end = MAX_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
    body
}
