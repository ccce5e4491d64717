//! Canonical interaction events.
//!
//! An `Event` is built once per ingestion by the normalizer and consumed by a
//! single pipeline pass. Nothing mutates it after construction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The author of a comment or message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Platform-scoped user id
    pub id: String,

    /// Display name, when the platform supplied one
    pub name: Option<String>,
}

impl Sender {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// Which path delivered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ingress {
    /// Pushed by the platform to the webhook endpoint
    Webhook,

    /// Pulled by the scheduled poll cycle
    Poll,
}

impl fmt::Display for Ingress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook => f.write_str("webhook"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// Discriminant of an `Event`, persisted with every ledger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Comment,
    Message,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Message => "message",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "comment" => Some(Self::Comment),
            "message" => Some(Self::Message),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A public comment left on one of the page's posts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub id: String,
    pub post_id: String,
    pub text: Option<String>,
    /// Absent when the platform withholds the author
    pub sender: Option<Sender>,
    pub is_hidden: bool,
    pub ingress: Ingress,
}

/// A private message sent to the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub id: String,
    /// Known for polled messages; pushed messages only carry the sender
    pub conversation_id: Option<String>,
    pub text: Option<String>,
    pub sender: Sender,
    pub is_echo: bool,
    pub ingress: Ingress,
}

/// Where a reply to an event must be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Threaded reply underneath the comment
    CommentThread { comment_id: String },

    /// Direct message to the sender
    Direct { recipient_id: String },
}

/// A normalized customer interaction eligible for an automated reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Comment(CommentEvent),
    Message(MessageEvent),
}

impl Event {
    /// External identifier; the ledger key
    pub fn id(&self) -> &str {
        match self {
            Self::Comment(c) => &c.id,
            Self::Message(m) => &m.id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Comment(_) => EventKind::Comment,
            Self::Message(_) => EventKind::Message,
        }
    }

    /// Post id for comments; conversation id (or the sender id when the
    /// conversation is unknown) for messages
    pub fn thread_id(&self) -> &str {
        match self {
            Self::Comment(c) => &c.post_id,
            Self::Message(m) => m.conversation_id.as_deref().unwrap_or(&m.sender.id),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Comment(c) => c.text.as_deref(),
            Self::Message(m) => m.text.as_deref(),
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match self {
            Self::Comment(c) => c.sender.as_ref(),
            Self::Message(m) => Some(&m.sender),
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender().map(|s| s.id.as_str())
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.sender().and_then(|s| s.name.as_deref())
    }

    pub fn ingress(&self) -> Ingress {
        match self {
            Self::Comment(c) => c.ingress,
            Self::Message(m) => m.ingress,
        }
    }

    pub fn reply_channel(&self) -> Channel {
        match self {
            Self::Comment(c) => Channel::CommentThread {
                comment_id: c.id.clone(),
            },
            Self::Message(m) => Channel::Direct {
                recipient_id: m.sender.id.clone(),
            },
        }
    }

    /// Customer text shortened for log lines
    pub fn preview(&self) -> String {
        self.text().unwrap_or_default().chars().take(50).collect()
    }
}
