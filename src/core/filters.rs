//! Fixed-order filter chain.
//!
//! The synchronous checks run first and the first match wins; only comments
//! that pass all of them cost a lookup of existing replies.

use serde_json::Value;
use tracing::warn;

use crate::adapters::PageSource;
use crate::core::normalizer::author_id;
use crate::domain::{Event, Outcome, SkipReason};

/// Checks that need nothing but the event
pub fn evaluate(event: &Event, own_id: &str) -> Option<SkipReason> {
    if event.sender_id() == Some(own_id) {
        return Some(SkipReason::SelfOrigin);
    }
    match event {
        Event::Comment(c) if c.is_hidden => return Some(SkipReason::Hidden),
        Event::Message(m) if m.is_echo => return Some(SkipReason::Echo),
        _ => {}
    }
    if event.text().map_or(true, |t| t.trim().is_empty()) {
        return Some(SkipReason::Empty);
    }
    None
}

/// First reply in `replies` authored by `own_id`
pub fn own_reply<'a>(replies: &'a [Value], own_id: &str) -> Option<&'a Value> {
    replies.iter().find(|reply| author_id(reply) == Some(own_id))
}

/// Run the whole chain, returning the skip outcome if any filter matches
///
/// A failed reply lookup is logged and treated as "no existing reply".
pub async fn screen(event: &Event, own_id: &str, source: &dyn PageSource) -> Option<Outcome> {
    if let Some(reason) = evaluate(event, own_id) {
        return Some(Outcome::skipped(reason));
    }

    let Event::Comment(comment) = event else {
        return None;
    };

    match source.comment_replies(&comment.id).await {
        Ok(replies) => own_reply(&replies, own_id).map(|reply| Outcome::Skipped {
            reason: SkipReason::AlreadyReplied,
            existing_reply: reply
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        Err(e) => {
            warn!(event_id = %comment.id, error = %e, "Could not look up existing replies");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommentEvent, Ingress, MessageEvent, Sender};
    use serde_json::json;

    const PAGE: &str = "PAGE";

    fn comment(sender: &str, text: Option<&str>, hidden: bool) -> Event {
        Event::Comment(CommentEvent {
            id: "c1".to_string(),
            post_id: "p1".to_string(),
            text: text.map(str::to_string),
            sender: Some(Sender::new(sender, None)),
            is_hidden: hidden,
            ingress: Ingress::Poll,
        })
    }

    fn message(sender: &str, text: &str, echo: bool) -> Event {
        Event::Message(MessageEvent {
            id: "m1".to_string(),
            conversation_id: None,
            text: Some(text.to_string()),
            sender: Sender::new(sender, None),
            is_echo: echo,
            ingress: Ingress::Webhook,
        })
    }

    #[test]
    fn test_first_match_wins() {
        // Own, hidden, and empty at once: self is reported
        assert_eq!(
            evaluate(&comment(PAGE, None, true), PAGE),
            Some(SkipReason::SelfOrigin)
        );
        assert_eq!(
            evaluate(&comment("U1", Some(""), true), PAGE),
            Some(SkipReason::Hidden)
        );
        assert_eq!(evaluate(&message("U1", "  ", true), PAGE), Some(SkipReason::Echo));
    }

    #[test]
    fn test_blank_text_is_empty() {
        assert_eq!(
            evaluate(&comment("U1", None, false), PAGE),
            Some(SkipReason::Empty)
        );
        assert_eq!(
            evaluate(&message("U1", " \n\t", false), PAGE),
            Some(SkipReason::Empty)
        );
        assert_eq!(evaluate(&message("U1", "hi", false), PAGE), None);
    }

    #[test]
    fn test_comment_without_sender_is_not_self() {
        let event = Event::Comment(CommentEvent {
            id: "c2".to_string(),
            post_id: "p1".to_string(),
            text: Some("hello".to_string()),
            sender: None,
            is_hidden: false,
            ingress: Ingress::Poll,
        });
        assert_eq!(evaluate(&event, PAGE), None);
    }

    #[test]
    fn test_own_reply_lookup() {
        let replies = vec![
            json!({ "id": "r1", "message": "me too", "from": { "id": "U2" } }),
            json!({ "id": "r2", "message": "Thanks Ada!", "from": { "id": PAGE } }),
        ];
        assert_eq!(own_reply(&replies, PAGE).map(|r| r["id"].clone()), Some(json!("r2")));
        assert!(own_reply(&replies[..1], PAGE).is_none());
    }
}
