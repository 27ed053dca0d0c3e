//! 远程会话：通过 HTTP 调用持有真实 CAD/FEA 会话的桥接进程
//!
//! - `POST {endpoint}/call` `{action, args}` -> `{delta?, value?, message?}` 或 `{error: {kind, message}}`
//! - `GET {endpoint}/snapshot` -> ModelSnapshot
//! - `POST {endpoint}/open` `{path}` -> 2xx 表示模型已载入
//!
//! HTTP 429/503 映射为 Busy，504 映射为 Timeout，其它 4xx 映射为 Rejected，
//! 其它 5xx 映射为 Protocol（不重试）。连接失败映射为 Unavailable。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::{SessionError, SessionOutcome, SimulationSession};
use crate::snapshot::{ModelSnapshot, StateDelta};

#[derive(Serialize)]
struct CallBody<'a> {
    action: &'a str,
    args: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct OpenBody<'a> {
    path: &'a str,
}

#[derive(Deserialize)]
struct RemoteFault {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RemoteReply {
    #[serde(default)]
    error: Option<RemoteFault>,
    #[serde(default)]
    delta: Option<StateDelta>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP 桥接会话
pub struct RemoteSession {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteSession {
    /// endpoint 如 http://127.0.0.1:8765；timeout 为单次 HTTP 请求上限
    pub fn new(name: impl Into<String>, endpoint: &str, timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Protocol(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn map_transport(e: reqwest::Error) -> SessionError {
    if e.is_timeout() {
        SessionError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        SessionError::Unavailable(e.to_string())
    } else {
        SessionError::Protocol(e.to_string())
    }
}

/// 非成功 HTTP 状态映射；body 中若带 {error:{kind,message}} 则优先采用
fn map_status(status: StatusCode, body: &str) -> SessionError {
    if let Ok(RemoteReply { error: Some(fault), .. }) = serde_json::from_str::<RemoteReply>(body) {
        if !fault.kind.is_empty() {
            return SessionError::from_kind(&fault.kind, fault.message);
        }
    }
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => SessionError::Busy(detail),
        StatusCode::GATEWAY_TIMEOUT => SessionError::Timeout(detail),
        s if s.is_client_error() => SessionError::Rejected(detail),
        _ => SessionError::Protocol(detail),
    }
}

fn decode_reply(body: &str) -> Result<SessionOutcome, SessionError> {
    let reply: RemoteReply = serde_json::from_str(body)
        .map_err(|e| SessionError::Protocol(format!("invalid reply: {e}")))?;
    if let Some(fault) = reply.error {
        return Err(SessionError::from_kind(&fault.kind, fault.message));
    }
    Ok(SessionOutcome {
        delta: reply.delta,
        value: reply.value,
        message: reply.message,
    })
}

#[async_trait]
impl SimulationSession for RemoteSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        action: &str,
        args: &Map<String, Value>,
    ) -> Result<SessionOutcome, SessionError> {
        let resp = self
            .client
            .post(format!("{}/call", self.endpoint))
            .json(&CallBody { action, args })
            .send()
            .await
            .map_err(map_transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(map_status(status, &body));
        }
        decode_reply(&body)
    }

    async fn snapshot(&self) -> Result<ModelSnapshot, SessionError> {
        let resp = self
            .client
            .get(format!("{}/snapshot", self.endpoint))
            .send()
            .await
            .map_err(map_transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(map_status(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| SessionError::Protocol(format!("invalid snapshot: {e}")))
    }

    async fn open(&self, model_path: &str) -> Result<(), SessionError> {
        let resp = self
            .client
            .post(format!("{}/open", self.endpoint))
            .json(&OpenBody { path: model_path })
            .send()
            .await
            .map_err(map_transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.map_err(map_transport)?;
        Err(map_status(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::StudyStatus;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(StatusCode::TOO_MANY_REQUESTS, ""), SessionError::Busy(_)));
        assert!(matches!(map_status(StatusCode::SERVICE_UNAVAILABLE, "busy"), SessionError::Busy(_)));
        assert!(matches!(map_status(StatusCode::BAD_REQUEST, "bad args"), SessionError::Rejected(ref m) if m == "bad args"));
        assert!(matches!(map_status(StatusCode::GATEWAY_TIMEOUT, ""), SessionError::Timeout(_)));
    }

    #[test]
    fn test_server_fault_is_not_retried() {
        let err = map_status(StatusCode::INTERNAL_SERVER_ERROR, "solver crashed");
        assert_eq!(err, SessionError::Protocol("solver crashed".into()));
        assert!(!err.is_transient());
        assert!(!map_status(StatusCode::BAD_GATEWAY, "").is_transient());
    }

    #[tokio::test]
    async fn test_open_without_bridge_is_unavailable() {
        // 保留端口 9，无人监听
        let session = RemoteSession::new("remote", "http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        assert_eq!(session.endpoint(), "http://127.0.0.1:9");
        let err = session.open("Demo_file.mph").await.unwrap_err();
        assert!(err.is_transient(), "expected transient error, got {err:?}");
    }

    #[test]
    fn test_fault_body_wins_over_status() {
        let body = r#"{"error": {"kind": "diverged", "message": "Study 1 did not converge"}}"#;
        assert_eq!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, body),
            SessionError::Diverged("Study 1 did not converge".into())
        );
    }

    #[test]
    fn test_decode_reply() {
        let ok = decode_reply(r#"{"delta": {"studies": {"Study 1": "completed"}}, "message": "done"}"#).unwrap();
        let delta = ok.delta.unwrap();
        assert_eq!(delta.studies.get("Study 1"), Some(&StudyStatus::Completed));
        assert_eq!(ok.message.as_deref(), Some("done"));

        let err = decode_reply(r#"{"error": {"kind": "busy", "message": "solver running"}}"#).unwrap_err();
        assert!(err.is_transient());

        assert!(matches!(decode_reply("not json"), Err(SessionError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // 绑定后立即释放，得到一个大概率无人监听的端口
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let session = RemoteSession::new(
            "remote",
            &format!("http://127.0.0.1:{port}/"),
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(session.endpoint(), format!("http://127.0.0.1:{port}"));
        let err = session.snapshot().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}
