//! Conversation history collaborator.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use carassist_core::config::HistorySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum Role {
    User,
    Assistant,
}

impl From<String> for Role {
    /// Anything other than `USER` is read as an assistant message.
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("user") { Role::User } else { Role::Assistant }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Messages of a conversation, oldest first.
    async fn fetch(&self, conversation_id: &str, access_token: &str) -> Result<Vec<ChatMessage>>;
    async fn save(&self, conversation_id: &str, message: &ChatMessage, access_token: &str) -> Result<()>;
}

/// The last `exchanges` user/assistant pairs of `messages`.
pub fn recent_window(messages: &[ChatMessage], exchanges: usize) -> Vec<ChatMessage> {
    let keep = exchanges.saturating_mul(2);
    messages[messages.len().saturating_sub(keep)..].to_vec()
}

/// History kept by the conversation REST API at
/// `{api_url}/api/conversations/{id}/messages`.
pub struct RestHistoryStore {
    client: reqwest::Client,
    api_url: String,
}

impl RestHistoryStore {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_url: api_url.trim_end_matches('/').to_string() })
    }

    fn messages_url(&self, conversation_id: &str) -> String {
        format!("{}/api/conversations/{}/messages", self.api_url, conversation_id)
    }
}

#[async_trait]
impl HistoryStore for RestHistoryStore {
    async fn fetch(&self, conversation_id: &str, access_token: &str) -> Result<Vec<ChatMessage>> {
        let response = self.client.get(self.messages_url(conversation_id)).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("history fetch failed: HTTP {}", response.status()));
        }
        let messages: Vec<ChatMessage> = response.json().await?;
        debug!(conversation_id, messages = messages.len(), "fetched history");
        Ok(messages)
    }

    async fn save(&self, conversation_id: &str, message: &ChatMessage, access_token: &str) -> Result<()> {
        let response = self.client.post(self.messages_url(conversation_id)).bearer_auth(access_token).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("history save failed: HTTP {status}: {body}"));
        }
        Ok(())
    }
}

/// Process-local history, keyed by conversation id.
#[derive(Default)]
pub struct InMemoryHistory {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self { Self::default() }

    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        let guard = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(conversation_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn fetch(&self, conversation_id: &str, _access_token: &str) -> Result<Vec<ChatMessage>> {
        Ok(self.messages(conversation_id))
    }

    async fn save(&self, conversation_id: &str, message: &ChatMessage, _access_token: &str) -> Result<()> {
        let mut guard = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(conversation_id.to_string()).or_default().push(message.clone());
        Ok(())
    }
}

/// REST history when an API url is configured, in-memory otherwise.
pub fn history_from_settings(settings: &HistorySettings) -> Result<Arc<dyn HistoryStore>> {
    match settings.api_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            info!(url, "using conversation API for history");
            Ok(Arc::new(RestHistoryStore::new(url, Duration::from_secs(settings.timeout_secs))?))
        }
        None => Ok(Arc::new(InMemoryHistory::new())),
    }
}
