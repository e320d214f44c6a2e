//! Ollama-backed generator.
//!
//! Looks the question up in the knowledge tool once, then streams
//! `POST /api/chat` and forwards each content fragment to the sink.
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use carassist_core::config::AssistantSettings;

use crate::coordinator::{GenerationRequest, Generator, TokenSink, DEFAULT_MARKER};
use crate::history::Role;
use crate::tools::{ToolRegistry, KNOWLEDGE_TOOL_NAME};

pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    marker: String,
    tools: Arc<ToolRegistry>,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout: Duration, tools: Arc<ToolRegistry>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            marker: DEFAULT_MARKER.to_string(),
            tools,
        })
    }

    pub fn from_settings(settings: &AssistantSettings, tools: Arc<ToolRegistry>) -> Result<Self> {
        let mut g = Self::new(&settings.ollama_url, &settings.model, Duration::from_secs(settings.request_timeout_secs), tools)?;
        g.marker = settings.final_answer_marker.clone();
        Ok(g)
    }

    pub fn model(&self) -> &str { &self.model }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are an expert automotive assistant. Answer the user's question using the provided \
             knowledge base context when it is relevant, and say so when it does not cover the question.",
        );
        if !self.tools.is_empty() {
            prompt.push_str("\n\nAvailable tools:\n");
            prompt.push_str(&self.tools.describe());
        }
        if !self.marker.is_empty() {
            prompt.push_str(&format!(
                "\n\nThink briefly about the question first. Then write the answer for the user on a new line starting with `{}`.",
                self.marker
            ));
        }
        prompt
    }

    /// Chat messages for one request: system prompt, history, then the
    /// question with any retrieved context.
    pub fn build_messages(&self, request: &GenerationRequest, context: Option<&str>) -> Vec<OllamaMessage> {
        let mut messages = vec![OllamaMessage { role: "system".into(), content: self.system_prompt() }];
        for m in &request.history {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(OllamaMessage { role: role.into(), content: m.content.clone() });
        }
        let content = match context {
            Some(ctx) => format!("Context from the knowledge base:\n{ctx}\n\nQuestion: {}", request.question),
            None => request.question.clone(),
        };
        messages.push(OllamaMessage { role: "user".into(), content });
        messages
    }

    async fn stream_chat(&self, messages: Vec<OllamaMessage>, sink: &mut dyn TokenSink) -> Result<()> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest { model: self.model.clone(), messages, stream: true };
        let response = self.client.post(&url).json(&body).send().await.with_context(|| format!("Failed to send request to {url}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Ollama HTTP {status}: {error_text}"));
        }
        let mut bytes = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut fragments = 0usize;
        while let Some(chunk) = bytes.next().await {
            pending.extend_from_slice(&chunk?);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Some(delta) = parse_chat_line(&String::from_utf8_lossy(&line))? {
                    if !delta.content.is_empty() {
                        sink.on_token(&delta.content);
                        fragments += 1;
                    }
                    if delta.done {
                        debug!(fragments, "chat stream done");
                        return Ok(());
                    }
                }
                if sink.is_cancelled() {
                    info!(fragments, "consumer went away; stopping generation");
                    return Ok(());
                }
            }
        }
        if let Some(delta) = parse_chat_line(&String::from_utf8_lossy(&pending))? {
            if !delta.content.is_empty() {
                sink.on_token(&delta.content);
            }
        }
        Ok(())
    }
}

impl Generator for OllamaGenerator {
    fn generate(&self, request: &GenerationRequest, sink: &mut dyn TokenSink) -> Result<()> {
        let context = self.tools.call(KNOWLEDGE_TOOL_NAME, &request.question);
        let messages = self.build_messages(request, context.as_deref());
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        rt.block_on(self.stream_chat(messages, sink))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OllamaMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDelta {
    pub content: String,
    pub done: bool,
}

/// Parse one NDJSON line of a streamed `/api/chat` response. Blank lines
/// yield `None`; an `error` field is an error.
pub fn parse_chat_line(line: &str) -> Result<Option<ChatDelta>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: ChatLine = serde_json::from_str(line).with_context(|| format!("invalid chat stream line: {line}"))?;
    if let Some(err) = parsed.error {
        return Err(anyhow!("Ollama error: {err}"));
    }
    Ok(Some(ChatDelta { content: parsed.message.map(|m| m.content).unwrap_or_default(), done: parsed.done }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatMessage;
    use crate::tools::Tool;

    struct FixedTool;

    impl Tool for FixedTool {
        fn name(&self) -> &str { KNOWLEDGE_TOOL_NAME }
        fn description(&self) -> &str { "manuals" }
        fn call(&self, _input: &str) -> String { "📄 [manual.pdf - page 3]\nUse the jack.".into() }
    }

    #[test]
    fn parses_content_done_and_errors() {
        let d = parse_chat_line(r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#).unwrap().unwrap();
        assert_eq!(d, ChatDelta { content: "Hel".into(), done: false });
        let d = parse_chat_line(r#"{"model":"m","done":true,"total_duration":1}"#).unwrap().unwrap();
        assert!(d.done && d.content.is_empty());
        assert!(parse_chat_line("  \n").unwrap().is_none());
        assert!(parse_chat_line(r#"{"error":"model not found"}"#).is_err());
        assert!(parse_chat_line("not json").is_err());
    }

    #[test]
    fn messages_carry_history_and_context() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(FixedTool));
        let g = OllamaGenerator::new("http://localhost:11434/", "mistral:latest", Duration::from_secs(5), Arc::new(tools)).unwrap();
        let request = GenerationRequest {
            question: "How do I lift the car?".into(),
            history: vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")],
        };
        let msgs = g.build_messages(&request, Some("ctx"));
        let roles: Vec<_> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert!(msgs[0].content.contains(DEFAULT_MARKER));
        assert!(msgs[0].content.contains(KNOWLEDGE_TOOL_NAME));
        assert_eq!(msgs[3].content, "Context from the knowledge base:\nctx\n\nQuestion: How do I lift the car?");
    }
}
