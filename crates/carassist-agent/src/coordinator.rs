//! Streaming response coordinator.
//!
//! `start` persists the question, spawns one worker thread that runs the
//! [`Generator`] and returns a [`ResponseStream`]. Tokens flow through a
//! [`MarkerFilter`] into the request's relay queue; the consumer collects
//! them and persists the transcript once the sentinel arrives.
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::Stream;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use carassist_core::config::AssistantSettings;

use crate::filter::MarkerFilter;
use crate::history::{recent_window, ChatMessage, HistoryStore, Role};
use crate::relay::{relay_queue, RelayConsumer, RelayItem, RelayProducer};

pub const DEFAULT_MARKER: &str = "Final Answer:";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to persist user message: {0}")]
    Persist(String),
    #[error("Failed to start generation worker: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamPhase {
    Idle = 0,
    Generating = 1,
    Filtering = 2,
    Emitting = 3,
    Completed = 4,
}

impl StreamPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => StreamPhase::Generating,
            2 => StreamPhase::Filtering,
            3 => StreamPhase::Emitting,
            4 => StreamPhase::Completed,
            _ => StreamPhase::Idle,
        }
    }
}

/// Phase shared by the worker and the consumer.
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker(Arc<AtomicU8>);

impl PhaseTracker {
    pub fn get(&self) -> StreamPhase { StreamPhase::from_u8(self.0.load(Ordering::SeqCst)) }

    fn set(&self, phase: StreamPhase) {
        let prev = StreamPhase::from_u8(self.0.swap(phase as u8, Ordering::SeqCst));
        if prev != phase {
            debug!(from = ?prev, to = ?phase, "stream phase");
        }
    }
}

/// What the worker hands to the generator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub question: String,
    /// Windowed conversation history, oldest first.
    pub history: Vec<ChatMessage>,
}

pub trait TokenSink {
    fn on_token(&mut self, token: &str);
    /// True once nobody is reading the stream; generators should stop early.
    fn is_cancelled(&self) -> bool;
}

/// Produces the answer token by token. Runs on the request's worker thread.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest, sink: &mut dyn TokenSink) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub question: String,
    pub conversation_id: String,
    pub access_token: String,
}

pub struct StreamCoordinator {
    generator: Arc<dyn Generator>,
    history: Arc<dyn HistoryStore>,
    marker: Option<String>,
    memory_window: usize,
}

impl StreamCoordinator {
    pub fn new(generator: Arc<dyn Generator>, history: Arc<dyn HistoryStore>) -> Self {
        Self { generator, history, marker: Some(DEFAULT_MARKER.to_string()), memory_window: 5 }
    }

    pub fn from_settings(settings: &AssistantSettings, generator: Arc<dyn Generator>, history: Arc<dyn HistoryStore>) -> Self {
        Self::new(generator, history)
            .with_marker(Some(settings.final_answer_marker.as_str()))
            .with_memory_window(settings.memory_window)
    }

    /// `None` or an empty marker relays every token.
    pub fn with_marker(mut self, marker: Option<&str>) -> Self {
        self.marker = marker.filter(|m| !m.is_empty()).map(str::to_string);
        self
    }

    pub fn with_memory_window(mut self, exchanges: usize) -> Self {
        self.memory_window = exchanges;
        self
    }

    pub async fn start(&self, request: StreamRequest) -> Result<ResponseStream, StreamError> {
        let StreamRequest { question, conversation_id, access_token } = request;
        self.history
            .save(&conversation_id, &ChatMessage::user(question.as_str()), &access_token)
            .await
            .map_err(|e| StreamError::Persist(format!("{e:#}")))?;

        let mut history = match self.history.fetch(&conversation_id, &access_token).await {
            Ok(h) => h,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "could not load conversation history");
                Vec::new()
            }
        };
        // the question was just persisted and is passed separately
        if history.last().is_some_and(|m| m.role == Role::User && m.content == question) {
            history.pop();
        }
        let history = recent_window(&history, self.memory_window);
        info!(conversation_id = %conversation_id, history = history.len(), "starting streamed answer");

        let (producer, consumer) = relay_queue();
        let phase = PhaseTracker::default();
        let sink = RelaySink { filter: MarkerFilter::new(self.marker.as_deref()), producer, phase: phase.clone() };
        let generator = Arc::clone(&self.generator);
        let gen_request = GenerationRequest { question, history };
        let worker = std::thread::Builder::new()
            .name(format!("carassist-gen-{}", conversation_id.replace('\0', "")))
            .spawn(move || run_generation(generator.as_ref(), &gen_request, sink))?;

        Ok(ResponseStream {
            consumer,
            collected: Vec::new(),
            persist: Some(PersistJob { history: Arc::clone(&self.history), conversation_id, access_token }),
            phase,
            worker: Some(worker),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "generator panicked".to_string())
}

fn run_generation(generator: &dyn Generator, request: &GenerationRequest, mut sink: RelaySink) {
    sink.phase.set(StreamPhase::Generating);
    let outcome = catch_unwind(AssertUnwindSafe(|| generator.generate(request, &mut sink)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };
    if let Some(msg) = failure {
        error!(error = %msg, "generation failed");
        sink.producer.put(format!("[Agent error: {msg}]"));
    }
    // dropping the sink enqueues the sentinel
}

/// Worker-side sink: marker filter in front of the relay producer.
struct RelaySink {
    filter: MarkerFilter,
    producer: RelayProducer,
    phase: PhaseTracker,
}

impl TokenSink for RelaySink {
    fn on_token(&mut self, token: &str) {
        let relayed = self.filter.push(token);
        self.phase.set(if self.filter.is_emitting() { StreamPhase::Emitting } else { StreamPhase::Filtering });
        if let Some(text) = relayed {
            self.producer.put(text);
        }
    }

    fn is_cancelled(&self) -> bool { self.producer.is_closed() }
}

impl Drop for RelaySink {
    fn drop(&mut self) {
        self.phase.set(StreamPhase::Completed);
        self.producer.finish();
    }
}

struct PersistJob {
    history: Arc<dyn HistoryStore>,
    conversation_id: String,
    access_token: String,
}

/// Consumer side of one streamed answer.
pub struct ResponseStream {
    consumer: RelayConsumer,
    collected: Vec<String>,
    persist: Option<PersistJob>,
    phase: PhaseTracker,
    worker: Option<JoinHandle<()>>,
}

impl ResponseStream {
    /// Next relayed token, or `None` after the sentinel. The transcript is
    /// persisted as the assistant's message when the sentinel is received.
    pub async fn next_token(&mut self) -> Option<String> {
        match self.consumer.get().await {
            RelayItem::Token(t) => {
                self.collected.push(t.clone());
                Some(t)
            }
            RelayItem::End => {
                self.complete().await;
                None
            }
        }
    }

    async fn complete(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                let _ = worker.join();
            }
        }
        let Some(job) = self.persist.take() else { return };
        let transcript = self.transcript();
        match job.history.save(&job.conversation_id, &ChatMessage::assistant(transcript), &job.access_token).await {
            Ok(()) => info!(conversation_id = %job.conversation_id, tokens = self.collected.len(), "saved assistant response"),
            Err(e) => error!(conversation_id = %job.conversation_id, error = %e, "failed to save assistant response"),
        }
    }

    /// Everything relayed so far, concatenated.
    pub fn transcript(&self) -> String { self.collected.concat() }

    pub fn phase(&self) -> StreamPhase { self.phase.get() }

    pub fn phase_tracker(&self) -> PhaseTracker { self.phase.clone() }

    /// Drain the stream, returning every relayed token.
    pub async fn collect(mut self) -> Vec<String> {
        while self.next_token().await.is_some() {}
        std::mem::take(&mut self.collected)
    }

    /// Adapt into a `Stream` of text chunks, e.g. for an HTTP body.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        futures::stream::unfold(self, |mut s| async move { s.next_token().await.map(|t| (t, s)) })
    }
}
