//! Adapter interfaces for external systems.
//!
//! The pipeline talks to three collaborators through these traits:
//! - `Generator`: AI text generation
//! - `Dispatcher`: posting replies back to the page
//! - `PageSource`: listing posts, comments, and conversations for polling

pub mod gemini;
pub mod graph;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{Channel, EventKind};

// Re-export the HTTP adapters
pub use gemini::{GeminiClient, GeminiConfig};
pub use graph::{GraphClient, GraphConfig, PageIdentity};

/// Canonical request handed to a `Generator`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Fixed persona instruction
    pub system_instruction: String,

    /// The customer's comment or message
    pub text: String,

    /// Linearized recent transcript, oldest first (messages only)
    pub context: Option<String>,

    pub kind: EventKind,
}

impl GenerationRequest {
    pub fn new(
        system_instruction: impl Into<String>,
        text: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            text: text.into(),
            context: None,
            kind,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }

    /// Customer-facing part of the prompt, framed by event kind
    pub fn user_prompt(&self) -> String {
        let prompt = match self.kind {
            EventKind::Comment => format!(
                "A customer left this comment on our Facebook post:\n\n\"{}\"\n\nWrite a friendly response.",
                self.text
            ),
            EventKind::Message => format!(
                "A customer sent this message to our Facebook page:\n\n\"{}\"\n\nWrite a helpful response.",
                self.text
            ),
        };

        match &self.context {
            Some(context) => format!("Previous context:\n{}\n\n{}", context, prompt),
            None => prompt,
        }
    }
}

/// Failure kinds from a `Generator`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,

    #[error("generation service rejected the credentials")]
    Unauthorized,

    #[error("generation returned no text")]
    Empty,

    #[error("generation adapter error: {0}")]
    Adapter(String),
}

/// AI text generation collaborator
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Produce reply text for the request
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Round-trip a trivial prompt to prove credentials and connectivity
    async fn health_check(&self) -> Result<(), GenerationError> {
        let request = GenerationRequest::new(
            "You are a connectivity probe. Answer with one word.",
            "Hello, testing!",
            EventKind::Comment,
        );
        self.generate(&request).await.map(|_| ())
    }
}

/// Reply delivery collaborator
///
/// Both methods report failure as `false`; implementations log the cause.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Post a threaded reply under a comment
    async fn reply_to_thread(&self, comment_id: &str, text: &str) -> bool;

    /// Send a direct message to a user
    async fn send_direct(&self, recipient_id: &str, text: &str) -> bool;

    async fn dispatch(&self, channel: &Channel, text: &str) -> bool {
        match channel {
            Channel::CommentThread { comment_id } => self.reply_to_thread(comment_id, text).await,
            Channel::Direct { recipient_id } => self.send_direct(recipient_id, text).await,
        }
    }
}

/// Transport or platform failure from a `PageSource`
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("platform returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Pull collaborator used by the poll cycle
///
/// Listings are returned as raw JSON objects; the normalizer turns them into
/// events.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Recent posts, newest first, optionally embedding a comment page
    async fn recent_posts(&self, limit: usize) -> Result<Vec<Value>, SourceError>;

    async fn post_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Value>, SourceError>;

    /// Replies underneath a single comment
    async fn comment_replies(&self, comment_id: &str) -> Result<Vec<Value>, SourceError>;

    /// Recent conversations, optionally embedding their latest messages
    async fn conversations(&self, limit: usize) -> Result<Vec<Value>, SourceError>;

    /// Messages of one conversation, newest first
    async fn conversation_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>, SourceError>;
}
