use std::time::Instant;

use reqwest::{Client, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{ChatFlowError, CoreResult};
use crate::stream::line::LineStream;

/// A boxed stream of decoded protocol lines.
pub type SseLineStream = futures::stream::BoxStream<'static, CoreResult<String>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(std::time::Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(std::time::Duration::from_millis(cfg.request_timeout_ms));
        if let Some(cap) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(cap);
        }
        let inner = builder
            .build()
            .map_err(|e| ChatFlowError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "chatflow/0.1".to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ChatFlowError::Transport(e.to_string()))?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let resp_headers = resp.headers().clone();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&resp_headers);
            return Err(map_http_error(status, ra, &text));
        }

        let parsed = resp
            .json::<R>()
            .await
            .map_err(|e| ChatFlowError::Decode(format!("response body: {e}")))?;
        Ok((parsed, latency))
    }

    /// POST JSON and return the response body as a stream of protocol
    /// lines. Line reassembly across chunk boundaries happens in
    /// [`LineStream`]; each yielded item is one raw line (no trimming).
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseLineStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ChatFlowError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let resp_headers = resp.headers().clone();
            let ra = parse_retry_after(&resp_headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &body));
        }

        let byte_stream = Box::pin(resp.bytes_stream());
        Ok(Box::pin(LineStream::new(byte_stream)))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // Non-numeric (HTTP-date) forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ChatFlowError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatFlowError::RateLimited { retry_after },
        s if s.is_server_error() => {
            ChatFlowError::Transport(format!("endpoint unavailable ({})", s.as_u16()))
        }
        s => ChatFlowError::Upstream {
            status: s.as_u16(),
            message: truncate(body, 300),
        },
    }
}

/// Char-boundary-safe truncation with an ellipsis marker.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_json_success() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(200).json_body(json!({"ok": true}));
        });

        #[derive(serde::Deserialize)]
        struct Resp {
            ok: bool,
        }

        let client = HttpClient::new_default().unwrap();
        let (resp, latency) = client
            .post_json::<_, Resp>(&format!("{}/chat", server.base_url()), &json!({"msg":"hi"}), &[])
            .await
            .unwrap();

        assert!(resp.ok);
        assert!(latency < 60_000);
        m.assert();
    }

    #[tokio::test]
    async fn post_json_forwards_custom_headers() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/chat")
                .header("Authorization", "Bearer sk-test");
            then.status(200).json_body(json!({"ok": true}));
        });
        let client = HttpClient::new_default().unwrap();
        let _: (serde_json::Value, u32) = client
            .post_json(
                &format!("{}/chat", server.base_url()),
                &json!({}),
                &[("Authorization", "Bearer sk-test")],
            )
            .await
            .unwrap();
        m.assert();
    }

    #[tokio::test]
    async fn post_json_429_maps_to_rate_limited() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(429).header("Retry-After", "2").body("slow down");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({"msg":"hi"}),
                &[],
            )
            .await
            .unwrap_err();

        match err {
            ChatFlowError::RateLimited { retry_after } => assert_eq!(retry_after, Some(2)),
            other => panic!("expected RateLimited, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_json_503_maps_to_transport() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(503).body("oops");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({"msg":"hi"}),
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatFlowError::Transport(_)));
    }

    #[tokio::test]
    async fn post_json_200_bad_json_maps_to_decode() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(200).body("not-json");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({"msg":"hi"}),
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatFlowError::Decode(_)));
    }

    #[tokio::test]
    async fn post_json_400_truncates_body() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(400).body(big.clone());
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/chat", server.base_url()),
                &json!({"msg":"hi"}),
                &[],
            )
            .await
            .unwrap_err();
        match err {
            ChatFlowError::Upstream { status, message } => {
                assert_eq!(status, 400);
                assert!(message.ends_with("..."));
                assert!(message.len() <= 303);
            }
            other => panic!("expected Upstream, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_transport() {
        // Connect to a likely-closed port to simulate a network error quickly.
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>("http://127.0.0.1:9/chat", &json!({}), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatFlowError::Transport(_)));
    }

    #[tokio::test]
    async fn post_sse_lines_yields_body_lines() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(200)
                .header("Content-Type", "text/event-stream")
                .body("data: {\"a\":1}\n\ndata: [DONE]\n");
        });
        let client = HttpClient::new_default().unwrap();
        let lines: Vec<String> = client
            .post_sse_lines(&format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
            .unwrap()
            .map(|r| r.expect("line"))
            .collect()
            .await;
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn post_sse_lines_non_2xx_is_an_error_up_front() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(401).body("no key");
        });
        let client = HttpClient::new_default().unwrap();
        let err = client
            .post_sse_lines(&format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
            .err()
            .unwrap();
        match err {
            ChatFlowError::Upstream { status, .. } => assert_eq!(status, 401),
            other => panic!("expected Upstream, got: {:?}", other),
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 300), "short");
        let t = truncate(&"é".repeat(200), 301);
        assert!(t.ends_with("..."));
        assert!(t.len() <= 304);
    }
}
