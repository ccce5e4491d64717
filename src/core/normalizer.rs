//! Raw payload normalization.
//!
//! Turns webhook deliveries and Graph listings into canonical `Event`s. Items
//! without an id are rejected here and never reach the ledger. Nothing in this
//! module has side effects.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{CommentEvent, Event, EventKind, Ingress, MessageEvent, Sender};

/// Structural validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("{0} payload has no id")]
    MissingId(EventKind),

    #[error("{kind} {id} is missing {field}")]
    MissingField {
        kind: EventKind,
        id: String,
        field: &'static str,
    },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawActor {
    id: Option<String>,
    name: Option<String>,
}

impl RawActor {
    fn into_sender(self) -> Option<Sender> {
        let id = self.id.filter(|id| !id.is_empty())?;
        Some(Sender::new(id, self.name))
    }
}

/// Only the envelope is typed. Items are parsed one at a time after routing,
/// and a failure rejects that item alone.
#[derive(Debug, Deserialize)]
struct RawDelivery {
    object: Option<String>,
    #[serde(default)]
    entry: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawFeedValue {
    comment_id: Option<String>,
    post_id: Option<String>,
    message: Option<String>,
    from: Option<RawActor>,
    is_hidden: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawMessaging {
    sender: Option<RawActor>,
    message: RawMessageBody,
}

#[derive(Debug, Deserialize)]
struct RawMessageBody {
    mid: Option<String>,
    text: Option<String>,
    is_echo: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawGraphItem {
    id: Option<String>,
    message: Option<String>,
    from: Option<RawActor>,
    is_hidden: Option<bool>,
}

/// Events extracted from one webhook delivery
#[derive(Debug, Default)]
pub struct WebhookBatch {
    /// Entries in the delivery
    pub entries: usize,
    pub events: Vec<Event>,
    /// Items dropped before reaching the ledger
    pub rejected: Vec<NormalizeError>,
}

/// Normalize a webhook delivery body
///
/// Only `page` deliveries produce events. Feed changes other than new
/// comments, and messaging items without a message (reads, deliveries), are
/// ignored rather than rejected.
pub fn from_webhook(payload: &Value) -> Result<WebhookBatch, NormalizeError> {
    let delivery: RawDelivery = serde_json::from_value(payload.clone())
        .map_err(|e| NormalizeError::Malformed(e.to_string()))?;

    let mut batch = WebhookBatch {
        entries: delivery.entry.len(),
        ..WebhookBatch::default()
    };
    if delivery.object.as_deref() != Some("page") {
        return Ok(batch);
    }

    for entry in &delivery.entry {
        for change in items(entry, "changes") {
            if change.get("field").and_then(Value::as_str) != Some("feed") {
                continue;
            }
            let Some(value) = change.get("value") else {
                continue;
            };
            if value.get("item").and_then(Value::as_str) != Some("comment")
                || value.get("verb").and_then(Value::as_str) != Some("add")
            {
                continue;
            }
            match parse_item(value).and_then(pushed_comment) {
                Ok(event) => batch.events.push(event),
                Err(e) => batch.rejected.push(e),
            }
        }

        for messaging in items(entry, "messaging") {
            // Read and delivery receipts carry no message
            if messaging.get("message").map_or(true, Value::is_null) {
                continue;
            }
            match parse_item(messaging).and_then(pushed_message) {
                Ok(event) => batch.events.push(event),
                Err(e) => batch.rejected.push(e),
            }
        }
    }

    Ok(batch)
}

/// Array under `key`, empty when absent or not an array
fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn parse_item<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, NormalizeError> {
    serde_json::from_value(value.clone()).map_err(|e| NormalizeError::Malformed(e.to_string()))
}

fn pushed_comment(value: RawFeedValue) -> Result<Event, NormalizeError> {
    let id = value
        .comment_id
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingId(EventKind::Comment))?;
    let post_id = value.post_id.ok_or_else(|| NormalizeError::MissingField {
        kind: EventKind::Comment,
        id: id.clone(),
        field: "post_id",
    })?;

    Ok(Event::Comment(CommentEvent {
        id,
        post_id,
        text: value.message,
        sender: value.from.and_then(RawActor::into_sender),
        is_hidden: value.is_hidden.unwrap_or(false),
        ingress: Ingress::Webhook,
    }))
}

fn pushed_message(messaging: RawMessaging) -> Result<Event, NormalizeError> {
    let RawMessaging { sender, message: body } = messaging;
    let id = body
        .mid
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingId(EventKind::Message))?;
    let sender = sender
        .and_then(RawActor::into_sender)
        .ok_or_else(|| NormalizeError::MissingField {
            kind: EventKind::Message,
            id: id.clone(),
            field: "sender",
        })?;

    Ok(Event::Message(MessageEvent {
        id,
        conversation_id: None,
        text: body.text,
        sender,
        is_echo: body.is_echo.unwrap_or(false),
        ingress: Ingress::Webhook,
    }))
}

fn graph_item(value: &Value, kind: EventKind) -> Result<(String, RawGraphItem), NormalizeError> {
    let item: RawGraphItem = parse_item(value)?;
    let id = item
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingId(kind))?;
    Ok((id, item))
}

/// Normalize one comment from a post listing
pub fn comment_from_graph(value: &Value, post_id: &str) -> Result<Event, NormalizeError> {
    let (id, item) = graph_item(value, EventKind::Comment)?;
    Ok(Event::Comment(CommentEvent {
        id,
        post_id: post_id.to_string(),
        text: item.message,
        sender: item.from.and_then(RawActor::into_sender),
        is_hidden: item.is_hidden.unwrap_or(false),
        ingress: Ingress::Poll,
    }))
}

/// Normalize one message from a conversation listing
pub fn message_from_graph(value: &Value, conversation_id: &str) -> Result<Event, NormalizeError> {
    let (id, item) = graph_item(value, EventKind::Message)?;
    let sender = item
        .from
        .and_then(RawActor::into_sender)
        .ok_or_else(|| NormalizeError::MissingField {
            kind: EventKind::Message,
            id: id.clone(),
            field: "from",
        })?;

    Ok(Event::Message(MessageEvent {
        id,
        conversation_id: Some(conversation_id.to_string()),
        text: item.message,
        sender,
        is_echo: false,
        ingress: Ingress::Poll,
    }))
}

/// `id` of a Graph object, if present and non-empty
pub fn object_id(value: &Value) -> Option<&str> {
    value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// `from.id` of a Graph object
pub fn author_id(value: &Value) -> Option<&str> {
    value.pointer("/from/id").and_then(Value::as_str)
}

/// Items of an embedded connection such as `comments` or `messages`
///
/// Returns `None` when the connection is absent or empty so callers can fall
/// back to a direct listing.
pub fn embedded_items(value: &Value, connection: &str) -> Option<Vec<Value>> {
    value
        .get(connection)
        .and_then(|c| c.get("data"))
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
        .cloned()
}
