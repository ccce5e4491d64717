//! Reply orchestrator.
//!
//! Drives each event through ledger claim, filters, generation, dispatch and
//! the terminal ledger write. Both ingestion paths (the scheduled poll cycle
//! and webhook deliveries) share one `Orchestrator` and therefore one ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{Dispatcher, GenerationRequest, Generator, PageSource};
use crate::domain::{CycleStats, Disposition, ErrorReason, Event, Outcome, SkipReason};

use super::filters;
use super::ledger::{Ledger, LedgerError};
use super::normalizer::{self, NormalizeError};
use super::scheduler::CycleRunner;

/// Maximum number of prior messages used as generation context
pub const MAX_CONTEXT_WINDOW: usize = 5;

/// Knobs for one orchestrator instance
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// The page's own user id; events from it are never answered
    pub own_id: String,

    /// System instruction handed to the generator
    pub persona: String,

    /// Upper bound on each generation and dispatch call
    pub call_timeout: Duration,

    /// Events processed concurrently within one batch
    pub workers: usize,

    /// Posts inspected per poll cycle
    pub post_limit: usize,

    /// Comments listed per post when the post listing embeds none
    pub comment_limit: usize,

    /// Conversations inspected per poll cycle
    pub conversation_limit: usize,

    /// Prior messages used as context (1..=5)
    pub context_window: usize,
}

impl PipelineSettings {
    pub fn new(own_id: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            own_id: own_id.into(),
            persona: persona.into(),
            call_timeout: Duration::from_secs(30),
            workers: 4,
            post_limit: 10,
            comment_limit: 100,
            conversation_limit: 25,
            context_window: MAX_CONTEXT_WINDOW,
        }
    }
}

/// Shared pipeline entry point
#[derive(Clone)]
pub struct Orchestrator {
    ledger: Arc<Ledger>,
    generator: Arc<dyn Generator>,
    dispatcher: Arc<dyn Dispatcher>,
    source: Arc<dyn PageSource>,
    settings: Arc<PipelineSettings>,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<Ledger>,
        generator: Arc<dyn Generator>,
        dispatcher: Arc<dyn Dispatcher>,
        source: Arc<dyn PageSource>,
        mut settings: PipelineSettings,
    ) -> Self {
        settings.workers = settings.workers.max(1);
        settings.context_window = settings.context_window.clamp(1, MAX_CONTEXT_WINDOW);
        Self {
            ledger,
            generator,
            dispatcher,
            source,
            settings: Arc::new(settings),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one event to its terminal outcome
    ///
    /// Never fails: ledger faults are converted to an `Errored` outcome at
    /// this boundary.
    #[instrument(
        skip(self, event),
        fields(event_id = %event.id(), kind = %event.kind(), ingress = %event.ingress())
    )]
    pub async fn process_event(&self, event: &Event) -> Disposition {
        match self.try_process(event).await {
            Ok(disposition) => disposition,
            Err(e) => self.fail_event(event, e.to_string()).await,
        }
    }

    async fn try_process(&self, event: &Event) -> Result<Disposition, LedgerError> {
        let id = event.id().to_string();
        if self.with_ledger(move |ledger| ledger.exists(&id)).await? {
            debug!("Already in ledger");
            return Ok(Disposition::Duplicate);
        }

        let claimed = event.clone();
        if !self.with_ledger(move |ledger| ledger.claim(&claimed)).await? {
            info!("Another ingestion path claimed this event first");
            return Ok(Disposition::Decided(Outcome::skipped(SkipReason::AlreadyClaimed)));
        }

        let screened = filters::screen(event, &self.settings.own_id, self.source.as_ref()).await;
        let outcome = match screened {
            Some(skip) => skip,
            None => self.reply(event).await,
        };

        if let Err(e) = self.record(event, &outcome).await {
            if !matches!(outcome, Outcome::Replied { .. }) {
                return Err(e);
            }
            warn!(error = %e, "Could not record sent reply, retrying");
            if let Err(e) = self.record(event, &outcome).await {
                // The pending claim alone keeps the event from a second reply
                error!(error = %e, "Reply sent but not recorded; event stays claimed");
            }
        }

        match &outcome {
            Outcome::Replied { .. } => info!(preview = %event.preview(), "Replied"),
            Outcome::Skipped { reason, .. } => debug!(%reason, "Skipped"),
            Outcome::Errored { reason, .. } => warn!(%reason, "Event errored"),
        }
        Ok(Disposition::Decided(outcome))
    }

    /// Run a ledger call on the blocking pool
    async fn with_ledger<T, F>(&self, call: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || call(ledger.as_ref()))
            .await
            .map_err(|e| LedgerError::Task(e.to_string()))?
    }

    async fn record(&self, event: &Event, outcome: &Outcome) -> Result<bool, LedgerError> {
        let (event, outcome) = (event.clone(), outcome.clone());
        self.with_ledger(move |ledger| ledger.record(&event, &outcome)).await
    }

    /// Generate and deliver a reply for an event that passed every filter
    async fn reply(&self, event: &Event) -> Outcome {
        let context = self.message_context(event).await;
        let request = GenerationRequest::new(
            self.settings.persona.as_str(),
            event.text().unwrap_or_default(),
            event.kind(),
        )
        .with_context(context);

        info!(
            sender = event.sender_name().unwrap_or("Unknown"),
            preview = %event.preview(),
            "Generating reply"
        );
        let generation = timeout(self.settings.call_timeout, self.generator.generate(&request));
        let generated = match generation.await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(generator = self.generator.name(), error = %e, "Generation failed");
                return Outcome::errored(ErrorReason::GenerationFailed);
            }
            Err(_) => {
                warn!(
                    generator = self.generator.name(),
                    timeout_secs = self.settings.call_timeout.as_secs(),
                    "Generation timed out"
                );
                return Outcome::errored(ErrorReason::GenerationFailed);
            }
        };

        let Some(reply) = clean_reply(&generated) else {
            warn!("Generated reply was empty after cleanup");
            return Outcome::errored(ErrorReason::GenerationFailed);
        };

        let channel = event.reply_channel();
        let dispatch = timeout(
            self.settings.call_timeout,
            self.dispatcher.dispatch(&channel, &reply),
        );
        let sent = match dispatch.await {
            Ok(sent) => sent,
            Err(_) => {
                warn!(?channel, "Dispatch timed out");
                false
            }
        };

        if sent {
            Outcome::Replied { reply }
        } else {
            Outcome::Errored {
                reason: ErrorReason::DispatchFailed,
                reply: Some(reply),
            }
        }
    }

    /// Recent transcript for a polled message, oldest first
    async fn message_context(&self, event: &Event) -> Option<String> {
        let Event::Message(message) = event else {
            return None;
        };
        let conversation_id = message.conversation_id.as_deref()?;

        let window = self.settings.context_window;
        match self
            .source
            .conversation_messages(conversation_id, window + 1)
            .await
        {
            Ok(messages) => build_context(&messages, &message.id, window),
            Err(e) => {
                warn!(%conversation_id, error = %e, "Could not load conversation context");
                None
            }
        }
    }

    async fn fail_event(&self, event: &Event, detail: String) -> Disposition {
        error!(event_id = %event.id(), error = %detail, "Event processing failed");
        let outcome = Outcome::errored(ErrorReason::Internal(detail));
        if let Err(e) = self.record(event, &outcome).await {
            error!(event_id = %event.id(), error = %e, "Could not record failure");
        }
        Disposition::Decided(outcome)
    }

    /// Process one event on its own task so a panic is contained to it
    async fn process_isolated(self, event: Event) -> Disposition {
        let worker = self.clone();
        let owned = event.clone();
        match tokio::spawn(async move { worker.process_event(&owned).await }).await {
            Ok(disposition) => disposition,
            Err(e) => {
                self.fail_event(&event, format!("event task failed: {e}"))
                    .await
            }
        }
    }

    /// Run events through the pipeline on the bounded worker pool
    pub async fn process_batch(&self, events: Vec<Event>) -> CycleStats {
        let permits = Arc::new(Semaphore::new(self.settings.workers));
        let mut tasks = JoinSet::new();

        for event in events {
            let orchestrator = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                orchestrator.process_isolated(event).await
            });
        }

        let mut stats = CycleStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(disposition) => stats.tally(&disposition),
                Err(e) => {
                    error!(error = %e, "Worker task failed");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    /// Handle one webhook delivery body
    ///
    /// Fails only when the body is structurally unusable; individual bad
    /// items are counted as errors and dropped.
    #[instrument(skip(self, payload))]
    pub async fn handle_webhook(&self, payload: &Value) -> Result<CycleStats, NormalizeError> {
        let batch = normalizer::from_webhook(payload)?;

        let mut stats = CycleStats {
            checked: batch.entries,
            found: batch.events.len() + batch.rejected.len(),
            errors: batch.rejected.len(),
            ..CycleStats::default()
        };
        for rejected in &batch.rejected {
            warn!(error = %rejected, "Dropping webhook item");
        }

        stats.merge(&self.process_batch(batch.events).await);
        self.log_activity("webhook", &stats).await;
        Ok(stats)
    }

    /// One poll over recent posts and conversations
    #[instrument(skip(self))]
    pub async fn poll_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();
        let mut events = Vec::new();

        self.collect_comments(&mut stats, &mut events).await;
        self.collect_messages(&mut stats, &mut events).await;

        stats.merge(&self.process_batch(events).await);
        info!(summary = %stats.summary(), "Poll cycle complete");
        self.log_activity("poll_cycle", &stats).await;
        stats
    }

    async fn collect_comments(&self, stats: &mut CycleStats, events: &mut Vec<Event>) {
        let posts = match self.source.recent_posts(self.settings.post_limit).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(error = %e, "Could not list posts");
                stats.errors += 1;
                return;
            }
        };

        for post in &posts {
            let Some(post_id) = normalizer::object_id(post) else {
                continue;
            };
            stats.checked += 1;

            let comments = match normalizer::embedded_items(post, "comments") {
                Some(comments) => comments,
                None => match self
                    .source
                    .post_comments(post_id, self.settings.comment_limit)
                    .await
                {
                    Ok(comments) => comments,
                    Err(e) => {
                        warn!(%post_id, error = %e, "Could not list comments");
                        stats.errors += 1;
                        continue;
                    }
                },
            };

            for raw in &comments {
                stats.found += 1;
                match normalizer::comment_from_graph(raw, post_id) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        warn!(%post_id, error = %e, "Dropping comment");
                        stats.errors += 1;
                    }
                }
            }
        }
    }

    async fn collect_messages(&self, stats: &mut CycleStats, events: &mut Vec<Event>) {
        let conversations = match self
            .source
            .conversations(self.settings.conversation_limit)
            .await
        {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(error = %e, "Could not list conversations");
                stats.errors += 1;
                return;
            }
        };

        for conversation in &conversations {
            let Some(conversation_id) = normalizer::object_id(conversation) else {
                continue;
            };
            stats.checked += 1;

            let messages = match normalizer::embedded_items(conversation, "messages") {
                Some(messages) => messages,
                None => match self
                    .source
                    .conversation_messages(conversation_id, self.settings.context_window + 1)
                    .await
                {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(%conversation_id, error = %e, "Could not list messages");
                        stats.errors += 1;
                        continue;
                    }
                },
            };

            // Listings are newest first; only the latest customer message is answered
            let Some(latest) = messages
                .iter()
                .find(|m| normalizer::author_id(m) != Some(self.settings.own_id.as_str()))
            else {
                continue;
            };

            stats.found += 1;
            match normalizer::message_from_graph(latest, conversation_id) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(%conversation_id, error = %e, "Dropping message");
                    stats.errors += 1;
                }
            }
        }
    }

    async fn log_activity(&self, kind: &'static str, stats: &CycleStats) {
        let summary = stats.summary();
        let written = self
            .with_ledger(move |ledger| ledger.log_activity(kind, &summary))
            .await;
        if let Err(e) = written {
            warn!(%kind, error = %e, "Could not write activity log");
        }
    }
}

#[async_trait]
impl CycleRunner for Orchestrator {
    async fn run_cycle(&self) -> CycleStats {
        self.poll_cycle().await
    }
}

/// Trim generated text and strip one layer of enclosing quotes
pub fn clean_reply(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = [('"', '"'), ('\u{201C}', '\u{201D}')]
        .iter()
        .find_map(|&(open, close)| {
            trimmed
                .strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
        })
        .unwrap_or(trimmed)
        .trim();

    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

/// Linearize up to `window` prior messages as `name: text` lines
///
/// `messages` is newest first; the result is oldest first and leaves out the
/// message being answered.
pub fn build_context(messages: &[Value], current_id: &str, window: usize) -> Option<String> {
    let mut lines: Vec<String> = messages
        .iter()
        .filter(|m| normalizer::object_id(m) != Some(current_id))
        .take(window)
        .filter_map(|m| {
            let text = m.get("message").and_then(Value::as_str)?;
            if text.trim().is_empty() {
                return None;
            }
            let name = m
                .pointer("/from/name")
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            Some(format!("{}: {}", name, text))
        })
        .collect();

    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}
