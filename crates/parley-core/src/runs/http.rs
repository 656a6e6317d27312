use super::transport::{AssistantTransport, DispatchReply, DispatchRequest, StatusQuery, StatusReply};
use crate::config::ParleyConfig;
use crate::error::ChatError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

/// JSON-over-HTTP transport for the dispatch and status endpoints.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    dispatch_path: String,
    status_path: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        dispatch_path: impl Into<String>,
        status_path: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            dispatch_path: dispatch_path.into(),
            status_path: status_path.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &ParleyConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("parley/0.1")
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::new(
            client,
            &config.base_url,
            &config.dispatch_path,
            &config.status_path,
            &config.api_key,
        ))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ChatError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChatError::Transport(format!("status {status}: {body}")));
    }
    let body = resp
        .text()
        .await
        .map_err(|e| ChatError::Transport(format!("failed to read response body: {e}")))?;
    serde_json::from_str(&body)
        .map_err(|e| ChatError::Transport(format!("malformed reply: {e}")))
}

#[async_trait]
impl AssistantTransport for HttpTransport {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReply, ChatError> {
        let url = self.url(&self.dispatch_path);
        debug!("dispatching to {url}");
        let resp = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("request failed: {e}")))?;
        read_json(resp).await
    }

    async fn status(&self, query: &StatusQuery) -> Result<StatusReply, ChatError> {
        let url = self.url(&self.status_path);
        let resp = self
            .authorize(self.client.get(&url))
            .query(query)
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("request failed: {e}")))?;
        read_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::transport::{DispatchStatus, RunStatus};
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn serve_once<F, Fut>(handler: F) -> SocketAddr
    where
        F: Fn(Request<hyper::body::Incoming>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Response<Full<Bytes>>, Infallible>>
            + Send
            + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(handler))
                .await
                .ok();
        });

        addr
    }

    fn transport(addr: SocketAddr, api_key: &str) -> HttpTransport {
        HttpTransport::new(
            Client::new(),
            format!("http://{addr}/"),
            "/api/assistant",
            "/api/assistant/status",
            api_key,
        )
    }

    fn request() -> DispatchRequest {
        DispatchRequest {
            message: "hello".to_string(),
            thread_id: None,
            personality: "mentor".into(),
            user_id: "u-1".to_string(),
        }
    }

    #[tokio::test]
    async fn dispatch_posts_json_and_parses_reply() {
        let addr = serve_once(|req| async move {
            assert_eq!(req.method(), hyper::Method::POST);
            assert_eq!(req.uri().path(), "/api/assistant");
            let auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            assert_eq!(auth, "Bearer secret");
            let body = req.collect().await.unwrap().to_bytes();
            let sent: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(sent["message"], "hello");
            assert_eq!(sent["userId"], "u-1");
            assert!(sent["threadId"].is_null());
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(
                r#"{"threadId":"t-9","status":"processing","runId":"r-1"}"#,
            ))))
        })
        .await;

        let reply = transport(addr, "secret").dispatch(&request()).await.unwrap();
        assert_eq!(reply.thread_id.as_str(), "t-9");
        assert_eq!(reply.status, DispatchStatus::Processing);
        assert_eq!(reply.run_id.unwrap().as_str(), "r-1");
    }

    #[tokio::test]
    async fn status_sends_query_parameters() {
        let addr = serve_once(|req| async move {
            assert_eq!(req.method(), hyper::Method::GET);
            assert_eq!(req.uri().path(), "/api/assistant/status");
            assert!(req.headers().get("authorization").is_none());
            let query = req.uri().query().unwrap_or("").to_string();
            assert!(query.contains("threadId=t-9"), "query: {query}");
            assert!(query.contains("runId=r-1"), "query: {query}");
            assert!(query.contains("personality=analyst"), "query: {query}");
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(
                r#"{"status":"completed","content":"hi!"}"#,
            ))))
        })
        .await;

        let reply = transport(addr, "")
            .status(&StatusQuery {
                thread_id: "t-9".into(),
                run_id: "r-1".into(),
                user_id: "u-1".to_string(),
                personality: "analyst".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply.status, RunStatus::Completed);
        assert_eq!(reply.content.as_deref(), Some("hi!"));
    }

    #[tokio::test]
    async fn non_2xx_is_transport_error() {
        let addr = serve_once(|_req| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .status(502)
                    .body(Full::new(Bytes::from("bad gateway")))
                    .unwrap(),
            )
        })
        .await;

        let err = transport(addr, "").dispatch(&request()).await.unwrap_err();
        match err {
            ChatError::Transport(msg) => assert!(msg.contains("502"), "unexpected: {msg}"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_transport_error() {
        let addr = serve_once(|_req| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from("<html>oops</html>"))))
        })
        .await;

        let err = transport(addr, "").dispatch(&request()).await.unwrap_err();
        assert!(matches!(err, ChatError::Transport(ref m) if m.contains("malformed")));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport(addr, "").dispatch(&request()).await.unwrap_err();
        assert!(matches!(err, ChatError::Transport(ref m) if m.contains("request failed")));
    }
}
