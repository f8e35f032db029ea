use std::sync::Mutex;

use reqwest::Url;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::config::RequestConfig;
use crate::error::{ChatFlowError, CoreResult};
use crate::http_client::HttpClient;
use crate::model::{ChatMessage, Completion, Usage, map_finish};
use crate::normalize::normalize_conversation;
use crate::session::{CancelHandle, SessionDriver, SessionHandle};
use crate::telemetry::{self, SessionTrace};

// ---- Wire structs (minimal) ----

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    choices: Vec<BodyChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct BodyChoice {
    #[serde(default)]
    index: u32,
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

fn map_completion(body: CompletionBody) -> Completion {
    // Single-choice simplification: only choice index 0 is read.
    let primary = body.choices.iter().find(|c| c.index == 0);
    Completion {
        content: primary
            .map(|c| c.message.content.clone())
            .unwrap_or_default(),
        stop_reason: primary.and_then(|c| map_finish(c.finish_reason.as_deref())),
        id: body.id,
        created: body.created,
        usage: body.usage,
    }
}

/// Builds outbound requests and owns the transport handle. No global
/// "current client" singleton: every session hangs off an explicit
/// `ChatClient`, so concurrent clients (and tests) stay isolated.
pub struct ChatClient {
    http: HttpClient,
    // Cancel handle of the most recently started session; a new request
    // supersedes it.
    outstanding: Mutex<Option<CancelHandle>>,
}

impl ChatClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            outstanding: Mutex::new(None),
        }
    }

    pub fn new_default() -> CoreResult<Self> {
        Ok(Self::new(HttpClient::new_default()?))
    }

    fn validate(config: &RequestConfig) -> CoreResult<Url> {
        if config.model.trim().is_empty() {
            return Err(ChatFlowError::Config("model id must not be empty".into()));
        }
        endpoint_url(&config.endpoint)
    }

    /// Start one session. Fails synchronously on configuration problems;
    /// everything after dispatch arrives through the returned handle.
    /// Starting a new session cancels the previous outstanding one.
    ///
    /// Must be called within a tokio runtime: the driver runs as a
    /// spawned task.
    pub fn start_session(
        &self,
        conversation: Vec<ChatMessage>,
        config: RequestConfig,
    ) -> CoreResult<SessionHandle> {
        let url = Self::validate(&config)?;
        let body = ChatCompletionRequest {
            model: config.model.clone(),
            messages: normalize_conversation(conversation),
            stream: config.stream,
        };
        let (handle, driver) = SessionDriver::new(&config.model, url.as_str());

        {
            let mut slot = match self.outstanding.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(previous) = slot.replace(handle.cancel_handle()) {
                previous.cancel();
            }
        }

        let http = self.http.clone();
        let span =
            tracing::info_span!("chat_session", model = %config.model, streaming = config.stream);
        if config.stream {
            let connect = async move {
                let headers = auth_headers(&config);
                let hdrs: Vec<(&str, &str)> = headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                http.post_sse_lines(url.as_str(), &body, &hdrs).await
            };
            tokio::spawn(driver.run_streaming(connect).instrument(span));
        } else {
            let request = async move {
                let headers = auth_headers(&config);
                let hdrs: Vec<(&str, &str)> = headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let (parsed, _latency) = http
                    .post_json::<_, CompletionBody>(url.as_str(), &body, &hdrs)
                    .await?;
                Ok(map_completion(parsed))
            };
            tokio::spawn(driver.run_non_streaming(request).instrument(span));
        }
        Ok(handle)
    }

    /// One-shot non-streaming completion, without going through a session
    /// handle.
    pub async fn complete(
        &self,
        conversation: Vec<ChatMessage>,
        config: &RequestConfig,
    ) -> CoreResult<Completion> {
        let url = Self::validate(config)?;
        let body = ChatCompletionRequest {
            model: config.model.clone(),
            messages: normalize_conversation(conversation),
            stream: false,
        };
        let headers = auth_headers(config);
        let hdrs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (parsed, latency) = self
            .http
            .post_json::<_, CompletionBody>(url.as_str(), &body, &hdrs)
            .await?;
        let completion = map_completion(parsed);
        telemetry::emit_session(
            SessionTrace::new()
                .model(&config.model)
                .endpoint(url.as_str())
                .outcome("completed")
                .latency_ms(latency as u64)
                .tokens(completion.usage)
                .stop_reason_opt(completion.stop_reason),
        );
        Ok(completion)
    }

    /// Cancel the session this client most recently started, if any is
    /// still live.
    pub fn cancel_outstanding(&self) {
        let slot = match self.outstanding.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cancel) = slot.as_ref() {
            cancel.cancel();
        }
    }
}

fn auth_headers(config: &RequestConfig) -> Vec<(String, String)> {
    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    if let Some(credential) = &config.credential {
        headers.push((
            "Authorization".to_string(),
            format!("Bearer {}", credential.expose_secret()),
        ));
    }
    headers
}

fn endpoint_url(raw: &str) -> CoreResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ChatFlowError::Config(format!("malformed endpoint '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ChatFlowError::Config(format!(
                "unsupported endpoint scheme '{other}'"
            )));
        }
    }
    if url.host_str().is_none() {
        return Err(ChatFlowError::Config(format!(
            "endpoint '{raw}' has no host"
        )));
    }
    Ok(url)
}
