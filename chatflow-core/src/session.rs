//! One session = one request driven to exactly one terminal outcome.
//!
//! The driver owns the decode pipeline's mutable state (line buffer lives
//! in the transport stream it consumes, accumulation buffer lives here).
//! Events are delivered through a bounded channel, so the consumer sees
//! increments and the terminal event strictly ordered on its own task,
//! never concurrently. Exactly one of `Completed` / `Failed` /
//! `Cancelled` is emitted per session; the finishers consume the driver,
//! so a second terminal event cannot be produced.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use crate::error::{ChatFlowError, CoreResult};
use crate::http_client::SseLineStream;
use crate::model::{Completion, StopReason, Usage, map_finish};
use crate::stream::StreamEvent;
use crate::stream::classifier::{LineEvent, classify};
use crate::stream::fragment::{ChatChunk, decode_chunk};
use crate::telemetry::{self, DecodeFailure, SessionTrace};

/// Lifecycle of one request-to-terminal interaction. Terminal states are
/// mutually exclusive and final; no state is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sent,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

const EVENT_BUFFER: usize = 32;

struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation for one session. Cloneable; cancelling flips
/// the session to `Cancelled` and discards bytes still in flight.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(CancelState {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.flag.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            // Re-check after registering so a cancel between the check
            // and the await cannot be missed.
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}

/// Consumer end of a session: an ordered event sequence plus the cancel
/// handle. Dropping the handle stops the driver without a terminal event.
pub struct SessionHandle {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancelHandle,
}

impl SessionHandle {
    /// Next event, in delivery order. After cancellation, increments that
    /// were already buffered are discarded; only a terminal event (or
    /// channel close) comes through.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            let ev = self.events.recv().await?;
            if self.cancel.is_cancelled() && !ev.is_terminal() {
                continue;
            }
            return Some(ev);
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl futures_util::Stream for SessionHandle {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.events.poll_recv(cx) {
                Poll::Ready(Some(ev)) if this.cancel.is_cancelled() && !ev.is_terminal() => {
                    continue;
                }
                other => return other,
            }
        }
    }
}

/// Accumulates deltas into the terminal result. Owned exclusively by one
/// driver; concurrent sessions never share it.
#[derive(Default)]
struct Accumulator {
    id: Option<String>,
    created: Option<i64>,
    content: String,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
}

impl Accumulator {
    /// Fold one chunk in; returns the delta content to forward, if any.
    fn absorb(&mut self, chunk: &ChatChunk) -> Option<String> {
        if self.id.is_none() && chunk.id.is_some() {
            self.id = chunk.id.clone();
        }
        if self.created.is_none() && chunk.created.is_some() {
            self.created = chunk.created;
        }
        if let Some(reason) = chunk.finish_reason() {
            self.stop_reason = map_finish(Some(reason));
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        match chunk.delta_content() {
            Some(text) if !text.is_empty() => {
                self.content.push_str(text);
                Some(text.to_string())
            }
            _ => None,
        }
    }

    fn into_completion(self) -> Completion {
        Completion {
            id: self.id.unwrap_or_default(),
            created: self.created.unwrap_or_default(),
            content: self.content,
            usage: self.usage,
            stop_reason: self.stop_reason,
        }
    }
}

enum LineAction {
    Skip,
    Forward(Vec<StreamEvent>),
    Complete,
}

pub(crate) struct SessionDriver {
    state: SessionState,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancelHandle,
    acc: Accumulator,
    model: String,
    endpoint: String,
    started: Instant,
}

impl SessionDriver {
    pub(crate) fn new(model: &str, endpoint: &str) -> (SessionHandle, Self) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancelHandle::new();
        let handle = SessionHandle {
            events: rx,
            cancel: cancel.clone(),
        };
        let driver = Self {
            state: SessionState::Idle,
            events: tx,
            cancel,
            acc: Accumulator::default(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            started: Instant::now(),
        };
        (handle, driver)
    }

    /// Drive a streaming request: connect, then pump decoded lines until
    /// the sentinel, transport end, transport error, or cancellation.
    pub(crate) async fn run_streaming<F>(mut self, connect: F)
    where
        F: Future<Output = CoreResult<SseLineStream>>,
    {
        let cancel = self.cancel.clone();
        self.transition(SessionState::Sent);

        let mut lines = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.finish_cancelled().await,
            res = connect => match res {
                Ok(stream) => stream,
                Err(e) => return self.finish_failed(e).await,
            },
        };

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish_cancelled().await,
                item = lines.next() => item,
            };
            match item {
                Some(Ok(line)) => {
                    if self.state == SessionState::Sent {
                        self.transition(SessionState::Streaming);
                    }
                    match self.handle_line(&line) {
                        LineAction::Skip => {}
                        LineAction::Forward(events) => {
                            for ev in events {
                                if self.forward(ev).await.is_err() {
                                    return;
                                }
                            }
                        }
                        LineAction::Complete => return self.finish_completed().await,
                    }
                }
                Some(Err(e)) => return self.finish_failed(e).await,
                None => return self.finish_completed().await,
            }
        }
    }

    /// Drive a non-streaming request: one body, one terminal event, no
    /// increments.
    pub(crate) async fn run_non_streaming<F>(mut self, request: F)
    where
        F: Future<Output = CoreResult<Completion>>,
    {
        let cancel = self.cancel.clone();
        self.transition(SessionState::Sent);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => self.finish_cancelled().await,
            res = request => match res {
                Ok(completion) => self.finish_completed_with(completion).await,
                Err(e) => self.finish_failed(e).await,
            },
        }
    }

    fn handle_line(&mut self, line: &str) -> LineAction {
        match classify(line) {
            LineEvent::Ignored => LineAction::Skip,
            LineEvent::Done => LineAction::Complete,
            LineEvent::Data(payload) => match decode_chunk(payload) {
                Err(e) => {
                    warn!(error = %e, "dropping malformed stream fragment");
                    telemetry::emit_decode_failure(DecodeFailure::new(payload, &e));
                    LineAction::Skip
                }
                Ok(chunk) => {
                    let mut events = Vec::new();
                    if let Some(text) = self.acc.absorb(&chunk) {
                        events.push(StreamEvent::Delta(text));
                    }
                    if let Some(usage) = chunk.usage {
                        events.push(StreamEvent::Usage {
                            prompt: Some(usage.prompt_tokens),
                            completion: Some(usage.completion_tokens),
                            total: Some(usage.total_tokens),
                        });
                    }
                    if events.is_empty() {
                        LineAction::Skip
                    } else {
                        LineAction::Forward(events)
                    }
                }
            },
        }
    }

    async fn forward(&mut self, ev: StreamEvent) -> Result<(), ()> {
        if self.events.send(ev).await.is_err() {
            debug!("session receiver dropped; stopping driver");
            return Err(());
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(!self.state.is_terminal(), "terminal state revisited");
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn base_trace(&self) -> SessionTrace {
        SessionTrace::new()
            .model(&self.model)
            .endpoint(&self.endpoint)
            .latency_ms(self.started.elapsed().as_millis() as u64)
    }

    async fn finish_completed(mut self) {
        let acc = std::mem::take(&mut self.acc);
        if acc.content.is_empty() {
            warn!("stream terminated before any content was delivered");
        }
        self.finish_completed_with(acc.into_completion()).await;
    }

    async fn finish_completed_with(mut self, completion: Completion) {
        self.transition(SessionState::Completed);
        telemetry::emit_session(
            self.base_trace()
                .outcome("completed")
                .tokens(completion.usage)
                .stop_reason_opt(completion.stop_reason),
        );
        let _ = self.events.send(StreamEvent::Completed(completion)).await;
    }

    async fn finish_failed(mut self, err: ChatFlowError) {
        self.transition(SessionState::Failed);
        telemetry::emit_session(
            self.base_trace()
                .outcome("failed")
                .error_kind(err.kind())
                .error_message(&err.to_string()),
        );
        let _ = self.events.send(StreamEvent::Failed(err)).await;
    }

    async fn finish_cancelled(mut self) {
        self.transition(SessionState::Cancelled);
        telemetry::emit_session(self.base_trace().outcome("cancelled"));
        let _ = self.events.send(StreamEvent::Cancelled).await;
    }
}
