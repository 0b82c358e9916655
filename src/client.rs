//! Thin HTTP client for a running relay.
//!
//! Used by the `agent-relay client` subcommands and the end-to-end tests.

use crate::relay::NewMessage;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

/// Status code and decoded JSON body of a relay response.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayReply {
    pub status: u16,
    pub body: Value,
}

impl RelayReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    base_url: String,
    http: reqwest::Client,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send(&self, message: &NewMessage) -> Result<RelayReply> {
        self.post("/send", message).await
    }

    pub async fn send_and_wait(&self, message: &NewMessage) -> Result<RelayReply> {
        self.post("/send-and-wait", message).await
    }

    pub async fn receive(
        &self,
        agent_id: &str,
        tags: &[String],
        agent_ids: &[String],
        consume: bool,
    ) -> Result<RelayReply> {
        let body = json!({
            "agent_id": agent_id,
            "tags": tags,
            "agent_ids": agent_ids,
            "consume": consume,
        });
        self.post("/receive", &body).await
    }

    pub async fn check(&self, tags: &[String], agent_ids: &[String]) -> Result<RelayReply> {
        self.post("/check", &json!({"tags": tags, "agent_ids": agent_ids}))
            .await
    }

    pub async fn respond(
        &self,
        request_id: &str,
        responder_id: &str,
        response_content: Value,
    ) -> Result<RelayReply> {
        let body = json!({
            "request_id": request_id,
            "responder_id": responder_id,
            "response_content": response_content,
        });
        self.post("/respond", &body).await
    }

    pub async fn status(&self) -> Result<RelayReply> {
        let url = self.url("/status");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        Self::decode(response).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<RelayReply> {
        let url = self.url(path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<RelayReply> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("failed to read relay response body")?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(RelayReply { status, body })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Interpret a CLI content argument: JSON if it parses, otherwise a JSON string.
pub fn parse_content_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
