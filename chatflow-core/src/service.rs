use async_trait::async_trait;

use crate::client::ChatClient;
use crate::config::RequestConfig;
use crate::error::CoreResult;
use crate::http_client::SseLineStream;
use crate::model::{ChatMessage, Completion, Usage};
use crate::session::{SessionDriver, SessionHandle};

/// The seam between the protocol engine and its collaborators (UI,
/// persistence, tests): run a one-shot completion or start a streaming
/// session without knowing anything about the transport.
#[async_trait]
pub trait ChatService: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        conversation: Vec<ChatMessage>,
        config: &RequestConfig,
    ) -> CoreResult<Completion>;

    /// Start a session honoring `config.stream`. Must be called within a
    /// tokio runtime.
    fn start_session(
        &self,
        conversation: Vec<ChatMessage>,
        config: RequestConfig,
    ) -> CoreResult<SessionHandle>;
}

#[async_trait]
impl ChatService for ChatClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(
        &self,
        conversation: Vec<ChatMessage>,
        config: &RequestConfig,
    ) -> CoreResult<Completion> {
        ChatClient::complete(self, conversation, config).await
    }

    fn start_session(
        &self,
        conversation: Vec<ChatMessage>,
        config: RequestConfig,
    ) -> CoreResult<SessionHandle> {
        ChatClient::start_session(self, conversation, config)
    }
}

/// A canned implementation that never touches the network. Useful for
/// tests or as a placeholder when no credential is configured.
pub struct NullService;

const NULL_RESPONSE: &str = "[null service response]";

#[async_trait]
impl ChatService for NullService {
    fn name(&self) -> &str {
        "null"
    }

    async fn complete(
        &self,
        conversation: Vec<ChatMessage>,
        _config: &RequestConfig,
    ) -> CoreResult<Completion> {
        let prompt_tokens: u32 = conversation.iter().map(|m| m.content.len() as u32).sum();
        Ok(Completion {
            id: "null".into(),
            created: 0,
            content: NULL_RESPONSE.into(),
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens: 0,
                total_tokens: prompt_tokens,
            }),
            stop_reason: None,
        })
    }

    fn start_session(
        &self,
        _conversation: Vec<ChatMessage>,
        config: RequestConfig,
    ) -> CoreResult<SessionHandle> {
        let (handle, driver) = SessionDriver::new(&config.model, &config.endpoint);
        // Canned script through the real driver, so callers exercise the
        // same event contract as the HTTP path.
        let script: Vec<CoreResult<String>> = vec![
            Ok(format!(
                r#"data: {{"choices":[{{"index":0,"delta":{{"content":"{NULL_RESPONSE}"}}}}]}}"#
            )),
            Ok("data: [DONE]".to_string()),
        ];
        let lines: SseLineStream = Box::pin(futures_util::stream::iter(script));
        tokio::spawn(driver.run_streaming(async move { Ok(lines) }));
        Ok(handle)
    }
}
