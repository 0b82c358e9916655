//! JSON handlers for the relay endpoints.
//!
//! Bodies are extracted as `Result<Json<T>, JsonRejection>` so that every
//! malformed request is answered with a uniform 400 before it reaches the
//! broker.

use super::AppState;
use crate::relay::{MessageFilter, NewMessage, RelayError};
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

// ── Request bodies ───────────────────────────────────────────────

/// Body of `POST /receive`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiveBody {
    /// Caller identity; only used for logging.
    pub agent_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    /// Set to `false` to peek at the first match without consuming it.
    #[serde(default = "default_consume")]
    pub consume: bool,
}

fn default_consume() -> bool {
    true
}

/// Body of `POST /check`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CheckBody {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
}

/// Query string of `GET /check`; lists are comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckQuery {
    pub tags: Option<String>,
    pub agent_ids: Option<String>,
}

/// Body of `POST /respond`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RespondBody {
    pub request_id: String,
    pub responder_id: String,
    #[serde(default)]
    pub response_content: Value,
}

fn filter_from_lists(tags: Vec<String>, agent_ids: Vec<String>) -> MessageFilter {
    MessageFilter::any()
        .with_tags(tags)
        .with_agent_ids(agent_ids)
}

fn split_csv(value: Option<&str>) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

// ── Error shaping ────────────────────────────────────────────────

fn error_response(err: &RelayError) -> Response {
    let mut body = json!({"ok": false, "error": err.to_string()});
    if let RelayError::Timeout { request_id, .. } = err {
        body["id"] = Value::String(request_id.clone());
    }
    (err.status_code(), Json(body)).into_response()
}

fn rejection_response(endpoint: &str, rejection: &JsonRejection) -> Response {
    rejected_body(endpoint, rejection.status(), rejection.body_text())
}

fn rejected_body(endpoint: &str, status: StatusCode, reason: String) -> Response {
    tracing::warn!(endpoint, reason = %reason, "rejected malformed body");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({"ok": false, "error": reason})),
        )
            .into_response();
    }
    error_response(&RelayError::invalid_body(reason))
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /send — append a message
pub async fn handle_send(
    State(state): State<AppState>,
    body: Result<Json<NewMessage>, JsonRejection>,
) -> Response {
    let Json(new) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response("/send", &rejection),
    };
    let id = state.broker.send(new);
    Json(json!({"ok": true, "id": id})).into_response()
}

/// POST /send-and-wait — append a request and hold the connection until answered
pub async fn handle_send_and_wait(
    State(state): State<AppState>,
    body: Result<Json<NewMessage>, JsonRejection>,
) -> Response {
    let Json(new) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response("/send-and-wait", &rejection),
    };
    match state.broker.send_and_wait(new).await {
        Ok(resolved) => Json(json!({
            "ok": true,
            "id": resolved.id,
            "response": resolved.response,
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// POST /receive — consume the first matching message
pub async fn handle_receive(
    State(state): State<AppState>,
    body: Result<Json<ReceiveBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response("/receive", &rejection),
    };
    let filter = filter_from_lists(body.tags, body.agent_ids);
    let message = state.broker.receive(&filter, body.consume);
    tracing::debug!(
        agent_id = %body.agent_id,
        found = message.is_some(),
        "receive served"
    );
    Json(json!({"ok": true, "message": message})).into_response()
}

/// POST /check — list matching messages without consuming them
///
/// An empty body means no filter; a non-empty body must be a JSON object.
pub async fn handle_check(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) => return rejected_body("/check", rejection.status(), rejection.body_text()),
    };
    let body = if bytes.trim_ascii().is_empty() {
        CheckBody::default()
    } else {
        match Json::<CheckBody>::from_bytes(&bytes) {
            Ok(Json(body)) => body,
            Err(rejection) => return rejection_response("/check", &rejection),
        }
    };
    let filter = filter_from_lists(body.tags, body.agent_ids);
    let messages = state.broker.check(&filter);
    Json(json!({"ok": true, "messages": messages})).into_response()
}

/// GET /check — same as POST /check with `?tags=a,b&agent_ids=x`
pub async fn handle_check_query(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Response {
    let filter = MessageFilter {
        tags: split_csv(query.tags.as_deref()),
        agent_ids: split_csv(query.agent_ids.as_deref()),
    };
    let messages = state.broker.check(&filter);
    Json(json!({"ok": true, "messages": messages})).into_response()
}

/// POST /respond — answer a pending send-and-wait
pub async fn handle_respond(
    State(state): State<AppState>,
    body: Result<Json<RespondBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response("/respond", &rejection),
    };
    match state
        .broker
        .respond(&body.request_id, &body.responder_id, body.response_content)
    {
        Ok(_) => Json(json!({"ok": true})).into_response(),
        Err(err) => error_response(&err),
    }
}

/// GET /status — message counters, pending requests and uptime
pub async fn handle_status(State(state): State<AppState>) -> Response {
    Json(state.broker.status()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Broker;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn receive_body_consumes_by_default() {
        let body: ReceiveBody = serde_json::from_value(json!({"agent_id": "dev"})).unwrap();
        assert!(body.consume);
        assert!(body.tags.is_empty());
        assert!(body.agent_ids.is_empty());
    }

    #[test]
    fn respond_body_content_defaults_to_null() {
        let body: RespondBody =
            serde_json::from_value(json!({"request_id": "r", "responder_id": "d"})).unwrap();
        assert_eq!(body.response_content, Value::Null);
    }

    #[test]
    fn split_csv_drops_blanks() {
        let items = split_csv(Some(" a, ,b,,a "));
        assert_eq!(items.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(split_csv(None).is_empty());
    }

    #[tokio::test]
    async fn timeout_error_carries_request_id() {
        let response = error_response(&RelayError::Timeout {
            request_id: "req-9".into(),
            timeout_secs: 30,
        });
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let body = body_json(response).await;
        assert_eq!(body["id"], "req-9");
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn peek_receive_does_not_consume() {
        let state = AppState::new(Broker::new());
        state.broker.send(NewMessage::new("a", "hello"));

        let peek = ReceiveBody {
            agent_id: "b".into(),
            tags: vec![],
            agent_ids: vec![],
            consume: false,
        };
        let response = handle_receive(State(state.clone()), Ok(Json(peek))).await;
        let body = body_json(response).await;
        assert_eq!(body["message"]["consumed"], false);
        assert_eq!(state.broker.status().messages.unconsumed, 1);
    }

    #[tokio::test]
    async fn respond_handler_records_response() {
        let state = AppState::new(Broker::new());
        let pending = state.broker.register_request(NewMessage::new("dev", "q"));
        let body = RespondBody {
            request_id: pending.id().to_string(),
            responder_id: "designer".into(),
            response_content: json!("done"),
        };
        let response = handle_respond(State(state.clone()), Ok(Json(body))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(pending.wait().await, Ok(json!("done")));
        assert_eq!(state.broker.status().messages.total, 2);
    }
}
