//! In-process fakes for the pipeline collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pagebot::adapters::{
    Dispatcher, GenerationError, GenerationRequest, Generator, PageSource, SourceError,
};
use pagebot::core::{Ledger, Orchestrator, PipelineSettings};
use pagebot::domain::{Channel, CommentEvent, Event, Ingress, MessageEvent, Sender};

pub const PAGE_ID: &str = "PAGE";

/// Generator that returns a scripted result and records every request
pub struct FakeGenerator {
    result: Mutex<Result<String, GenerationError>>,
    delay: Duration,
    panics: bool,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            result: Mutex::new(Ok(text.to_string())),
            delay: Duration::ZERO,
            panics: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: GenerationError) -> Self {
        Self {
            result: Mutex::new(Err(error)),
            ..Self::replying("")
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::replying("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.panics {
            panic!("generator exploded");
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.lock().unwrap().clone()
    }
}

/// Dispatcher that records deliveries and reports a fixed result
pub struct FakeDispatcher {
    succeed: AtomicBool,
    pub sent: Mutex<Vec<(Channel, String)>>,
}

impl FakeDispatcher {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed: AtomicBool::new(succeed),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn reply_to_thread(&self, comment_id: &str, text: &str) -> bool {
        self.sent.lock().unwrap().push((
            Channel::CommentThread {
                comment_id: comment_id.to_string(),
            },
            text.to_string(),
        ));
        self.succeed.load(Ordering::SeqCst)
    }

    async fn send_direct(&self, recipient_id: &str, text: &str) -> bool {
        self.sent.lock().unwrap().push((
            Channel::Direct {
                recipient_id: recipient_id.to_string(),
            },
            text.to_string(),
        ));
        self.succeed.load(Ordering::SeqCst)
    }
}

/// Page listings served from memory
#[derive(Default)]
pub struct FakeSource {
    pub posts: Vec<Value>,
    pub post_comments: HashMap<String, Vec<Value>>,
    pub replies: HashMap<String, Vec<Value>>,
    pub conversations: Vec<Value>,
    pub messages: HashMap<String, Vec<Value>>,
    pub listings_fail: bool,
    pub replies_fail: bool,
    pub reply_lookups: AtomicUsize,
}

fn unavailable() -> SourceError {
    SourceError::Api {
        status: 503,
        message: "unavailable".to_string(),
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn recent_posts(&self, limit: usize) -> Result<Vec<Value>, SourceError> {
        if self.listings_fail {
            return Err(unavailable());
        }
        Ok(self.posts.iter().take(limit).cloned().collect())
    }

    async fn post_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Value>, SourceError> {
        Ok(self
            .post_comments
            .get(post_id)
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn comment_replies(&self, comment_id: &str) -> Result<Vec<Value>, SourceError> {
        self.reply_lookups.fetch_add(1, Ordering::SeqCst);
        if self.replies_fail {
            return Err(unavailable());
        }
        Ok(self.replies.get(comment_id).cloned().unwrap_or_default())
    }

    async fn conversations(&self, limit: usize) -> Result<Vec<Value>, SourceError> {
        if self.listings_fail {
            return Err(unavailable());
        }
        Ok(self.conversations.iter().take(limit).cloned().collect())
    }

    async fn conversation_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>, SourceError> {
        Ok(self
            .messages
            .get(conversation_id)
            .map(|m| m.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Orchestrator plus handles on its fakes
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub ledger: Arc<Ledger>,
    pub generator: Arc<FakeGenerator>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub source: Arc<FakeSource>,
}

impl Harness {
    pub fn new(generator: FakeGenerator, dispatcher: FakeDispatcher, source: FakeSource) -> Self {
        Self::with_settings(
            generator,
            dispatcher,
            source,
            PipelineSettings::new(PAGE_ID, "You are a helpful restaurant assistant."),
        )
    }

    pub fn with_settings(
        generator: FakeGenerator,
        dispatcher: FakeDispatcher,
        source: FakeSource,
        settings: PipelineSettings,
    ) -> Self {
        Self::with_ledger(
            Ledger::open_in_memory().unwrap(),
            generator,
            dispatcher,
            source,
            settings,
        )
    }

    pub fn with_ledger(
        ledger: Ledger,
        generator: FakeGenerator,
        dispatcher: FakeDispatcher,
        source: FakeSource,
        settings: PipelineSettings,
    ) -> Self {
        let ledger = Arc::new(ledger);
        let generator = Arc::new(generator);
        let dispatcher = Arc::new(dispatcher);
        let source = Arc::new(source);
        let orchestrator = Orchestrator::new(
            ledger.clone(),
            generator.clone(),
            dispatcher.clone(),
            source.clone(),
            settings,
        );
        Self {
            orchestrator,
            ledger,
            generator,
            dispatcher,
            source,
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(
            FakeGenerator::replying(text),
            FakeDispatcher::new(true),
            FakeSource::default(),
        )
    }
}

pub fn comment(id: &str, sender_id: &str, text: &str) -> Event {
    Event::Comment(CommentEvent {
        id: id.to_string(),
        post_id: "post-1".to_string(),
        text: Some(text.to_string()),
        sender: Some(Sender::new(sender_id, Some("Ada".to_string()))),
        is_hidden: false,
        ingress: Ingress::Webhook,
    })
}

pub fn message(id: &str, sender_id: &str, text: &str, conversation_id: Option<&str>) -> Event {
    Event::Message(MessageEvent {
        id: id.to_string(),
        conversation_id: conversation_id.map(str::to_string),
        text: Some(text.to_string()),
        sender: Sender::new(sender_id, Some("Bo".to_string())),
        is_echo: false,
        ingress: Ingress::Poll,
    })
}

/// Webhook body carrying one new comment
pub fn comment_delivery(comment_id: &str, sender_id: &str, text: &str) -> Value {
    json!({
        "object": "page",
        "entry": [{
            "id": PAGE_ID,
            "changes": [{
                "field": "feed",
                "value": {
                    "item": "comment",
                    "verb": "add",
                    "comment_id": comment_id,
                    "post_id": "post-1",
                    "message": text,
                    "from": { "id": sender_id, "name": "Ada" }
                }
            }]
        }]
    })
}
