//! Stateless HTTP API client.
//!
//! Every call POSTs an `{action, params}` envelope to `<base>/<action>` and
//! decodes the JSON reply. There is no receive primitive in this mode.
//!
//! The per-action path follows the OneBot HTTP API. A gateway that instead
//! reads actions from the bare base URL still parses the same body, since the
//! envelope names its own `action`.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, trace};

use island_core::{
    ConnError, ConnResult, GroupInfo, HttpClientConfig, MessageKind, OutboundEnvelope,
    TransportMode, actions, parse_group_list,
};

/// HTTP client for the gateway's action API.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpApiClient {
    /// Creates a client for `config.api_url`.
    ///
    /// The base URL gets a trailing slash so that actions are appended as
    /// path segments.
    pub fn new(config: &HttpClientConfig) -> ConnResult<Self> {
        let base = config.api_url.trim();
        if base.is_empty() {
            return Err(ConnError::InvalidConfig("HTTP API URL is not configured".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConnError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        let base_url = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };

        info!(url = %base_url, "HTTP API client ready");
        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// The normalized base URL, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}{}", self.base_url, action.trim_start_matches('/'))
    }

    fn post(&self, action: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(self.endpoint(action));
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Issues one action and returns the decoded reply body.
    ///
    /// A non-success HTTP status becomes [`ConnError::Http`]; an empty body
    /// decodes to `Value::Null`.
    pub async fn call(&self, envelope: &OutboundEnvelope) -> ConnResult<Value> {
        trace!(action = %envelope.action, "POST action");
        let response = self
            .post(&envelope.action)
            .json(envelope)
            .send()
            .await
            .map_err(|e| request_error(&envelope.action, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ConnError::ReceiveFailed(e.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| ConnError::Parse(e.to_string()))
    }

    /// Sends a chat message of the given kind.
    pub async fn send_message(&self, kind: &MessageKind, target_id: i64, text: &str) -> ConnResult<()> {
        let request = kind.to_request(target_id, text);
        let reply = self.call(&request).await?;
        ensure_ok(reply)?;
        debug!(kind = %kind, target_id = target_id, "Message sent over HTTP");
        Ok(())
    }

    /// Sends a raw action.
    ///
    /// Only the message-send actions are supported over HTTP; anything else
    /// fails with [`ConnError::Unsupported`].
    pub async fn send_action(&self, action: &str, params: &Value) -> ConnResult<()> {
        let (kind, target_id, text) = message_from_params(action, params)?;
        self.send_message(&kind, target_id, text).await
    }

    /// Fetches the group list.
    pub async fn group_list(&self) -> ConnResult<Vec<GroupInfo>> {
        let reply = self.call(&OutboundEnvelope::group_list()).await?;
        parse_group_list(&reply)
    }

    /// Leaves a group.
    pub async fn leave_group(&self, group_id: i64) -> ConnResult<()> {
        let reply = self.call(&OutboundEnvelope::leave_group(group_id)).await?;
        ensure_ok(reply)
    }

    /// Liveness check; any status other than 200 is an error.
    pub async fn test_connection(&self) -> ConnResult<()> {
        let response = self
            .post(actions::GET_STATUS)
            .json(&OutboundEnvelope::new(actions::GET_STATUS, Value::Null))
            .send()
            .await
            .map_err(|e| request_error(actions::GET_STATUS, e))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ConnError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn request_error(action: &str, error: reqwest::Error) -> ConnError {
    if error.is_timeout() {
        ConnError::SendFailed(format!("'{action}' timed out: {error}"))
    } else {
        ConnError::SendFailed(format!("'{action}' failed: {error}"))
    }
}

/// Rejects replies carrying a status other than `ok`/`async`.
fn ensure_ok(reply: Value) -> ConnResult<()> {
    match reply.get("status").and_then(Value::as_str) {
        None | Some("ok" | "async") => Ok(()),
        Some(_) => Err(ConnError::UnexpectedResponse(reply)),
    }
}

/// Extracts `(kind, target_id, text)` from a message-send action.
///
/// The action is checked first: anything but a message send is
/// [`ConnError::Unsupported`] whatever its params look like.
fn message_from_params<'a>(action: &str, params: &'a Value) -> ConnResult<(MessageKind, i64, &'a str)> {
    let kind = match action {
        actions::SEND_GROUP_MSG => MessageKind::Group,
        actions::SEND_PRIVATE_MSG => MessageKind::Private,
        actions::SEND_MSG => match params.get("message_type").and_then(Value::as_str) {
            Some(kind) => MessageKind::from(kind),
            None if params.get("group_id").is_some() => MessageKind::Group,
            None => MessageKind::Private,
        },
        other => return Err(ConnError::unsupported(TransportMode::HttpPoll, other)),
    };

    let text = params
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| ConnError::invalid_params(action, "missing string field 'message'"))?;

    let id = |field: &str| {
        params
            .get(field)
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| ConnError::invalid_params(action, format!("missing numeric field '{field}'")))
    };

    let target = match kind {
        MessageKind::Group => id("group_id")?,
        MessageKind::Private => id("user_id")?,
        MessageKind::Other(_) => id("user_id").or_else(|_| id("group_id"))?,
    };
    Ok((kind, target, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Response},
        routing::post,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct Recorded {
        action: String,
        auth: Option<String>,
        body: Value,
    }

    type Log = Arc<Mutex<Vec<Recorded>>>;

    async fn gateway(
        Path(action): Path<String>,
        State(log): State<Log>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        log.lock().push(Recorded {
            action: action.clone(),
            auth: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });

        match action.as_str() {
            "get_group_list" => Json(json!({
                "status": "ok",
                "retcode": 0,
                "data": [{ "group_id": 1, "group_name": "A" }, { "group_id": 2, "group_name": "B" }],
            }))
            .into_response(),
            "get_status" => Json(json!({ "status": "ok", "data": { "online": true } })).into_response(),
            "set_group_leave" => Json(json!({ "status": "failed", "retcode": 100 })).into_response(),
            "send_group_msg" | "send_private_msg" | "send_msg" => {
                Json(json!({ "status": "ok", "data": { "message_id": 1 } })).into_response()
            }
            _ => (AxumStatus::NOT_FOUND, "no such action").into_response(),
        }
    }

    async fn spawn_gateway() -> (SocketAddr, Log) {
        let log: Log = Arc::default();
        let app = Router::new()
            .route("/{action}", post(gateway))
            .with_state(log.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr, log)
    }

    fn client_for(addr: SocketAddr) -> HttpApiClient {
        HttpApiClient::new(&HttpClientConfig::new(format!("http://{addr}"))).unwrap()
    }

    #[test]
    fn test_base_url_normalized() {
        let client = HttpApiClient::new(&HttpClientConfig::new("http://127.0.0.1:5700")).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5700/");
        assert_eq!(client.endpoint("get_status"), "http://127.0.0.1:5700/get_status");

        let client = HttpApiClient::new(&HttpClientConfig::new("http://host/api/")).unwrap();
        assert_eq!(client.endpoint("send_msg"), "http://host/api/send_msg");
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(
            HttpApiClient::new(&HttpClientConfig::new("  ")),
            Err(ConnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_message_from_params() {
        let params = json!({ "group_id": 10, "message": "hi" });
        let (kind, id, text) = message_from_params("send_group_msg", &params).unwrap();
        assert_eq!((kind, id, text), (MessageKind::Group, 10, "hi"));

        let params = json!({ "user_id": "20", "message": "yo" });
        let (kind, id, _) = message_from_params("send_private_msg", &params).unwrap();
        assert_eq!((kind, id), (MessageKind::Private, 20));

        let params = json!({ "message_type": "discuss", "user_id": 30, "message": "x" });
        let (kind, id, _) = message_from_params("send_msg", &params).unwrap();
        assert_eq!((kind, id), (MessageKind::Other("discuss".to_string()), 30));

        assert!(matches!(
            message_from_params("send_group_msg", &json!({ "message": "hi" })),
            Err(ConnError::InvalidParams { .. })
        ));
        assert!(matches!(
            message_from_params("get_login_info", &json!({ "message": "hi" })),
            Err(ConnError::Unsupported { mode: TransportMode::HttpPoll, .. })
        ));
    }

    #[test]
    fn test_unknown_action_is_unsupported_before_params_are_read() {
        for params in [json!({}), json!({ "user_id": 1 }), Value::Null] {
            assert!(matches!(
                message_from_params("get_login_info", &params),
                Err(ConnError::Unsupported { mode: TransportMode::HttpPoll, ref operation })
                    if operation == "get_login_info"
            ));
        }
        assert!(matches!(
            message_from_params("send_private_msg", &json!({ "user_id": 1 })),
            Err(ConnError::InvalidParams { .. })
        ));
    }

    #[tokio::test]
    async fn test_group_list_over_http() {
        let (addr, log) = spawn_gateway().await;
        let groups = client_for(addr).group_list().await.unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].name, "B");
        assert!(groups.iter().all(|g| g.active));

        let recorded = log.lock()[0].clone();
        assert_eq!(recorded.action, "get_group_list");
        assert_eq!(recorded.body["action"], "get_group_list");
        assert!(recorded.auth.is_none());
    }

    #[tokio::test]
    async fn test_send_other_kind_fills_both_ids_and_bearer() {
        let (addr, log) = spawn_gateway().await;
        let client =
            HttpApiClient::new(&HttpClientConfig::new(format!("http://{addr}/")).with_token("tok")).unwrap();

        client
            .send_message(&MessageKind::Other("discuss".to_string()), 55, "hello")
            .await
            .unwrap();

        let recorded = log.lock()[0].clone();
        assert_eq!(recorded.action, "send_msg");
        assert_eq!(recorded.auth.as_deref(), Some("Bearer tok"));
        assert_eq!(recorded.body["params"]["user_id"], 55);
        assert_eq!(recorded.body["params"]["group_id"], 55);
        assert_eq!(recorded.body["params"]["message_type"], "discuss");
    }

    #[tokio::test]
    async fn test_send_action_routes_to_message_endpoint() {
        let (addr, log) = spawn_gateway().await;
        client_for(addr)
            .send_action("send_private_msg", &json!({ "user_id": 9, "message": "pong" }))
            .await
            .unwrap();

        let recorded = log.lock()[0].clone();
        assert_eq!(recorded.action, "send_private_msg");
        assert_eq!(recorded.body["params"], json!({ "user_id": 9, "message": "pong" }));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_unexpected_response() {
        let (addr, _) = spawn_gateway().await;
        match client_for(addr).leave_group(3).await {
            Err(ConnError::UnexpectedResponse(raw)) => assert_eq!(raw["retcode"], 100),
            other => panic!("expected UnexpectedResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (addr, _) = spawn_gateway().await;
        let envelope = OutboundEnvelope::new("unknown_action", Value::Null);
        match client_for(addr).call(&envelope).await {
            Err(ConnError::Http { status: 404, body }) => assert_eq!(body, "no such action"),
            other => panic!("expected HTTP 404, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_reports_gateway_status() {
        let (addr, log) = spawn_gateway().await;
        client_for(addr).test_connection().await.unwrap();
        assert_eq!(log.lock()[0].action, "get_status");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        let client = HttpApiClient::new(
            &HttpClientConfig::new(format!("http://{dead}")).with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        assert!(matches!(client.test_connection().await, Err(ConnError::SendFailed(_))));
    }
}
