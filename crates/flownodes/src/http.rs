use async_trait::async_trait;
use flowcore::{Map, Node, NodeContext, NodeError, Value};
use serde_json::json;

/// HTTP request node
///
/// Reads `url` from the input and `method` / `headers` from config (or input).
/// A response of any status is a result; only transport failures are errors,
/// so the retry loop sees them.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let url = ctx
            .require_input("url")?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "url".to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })?;
        let method = ctx
            .setting_or("method", Value::String("GET".to_string()))
            .as_str()
            .unwrap_or("GET")
            .to_uppercase();

        tracing::info!("{} {} {}", ctx.id, method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        match ctx.data.get("body") {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(body) => request = request.json(body),
        }

        if let Value::Object(headers) = ctx.setting_or("headers", Value::Null) {
            for (key, value) in &headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key.as_str(), val_str);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: Map = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        tracing::debug!("{} response status: {}", ctx.id, status);

        Ok(json!({
            "status": status,
            "body": body_text,
            "headers": headers,
        }))
    }
}
