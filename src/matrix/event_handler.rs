use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

const AGE_LIMIT_MS: i64 = 900000;

/// Inbound room events the bridge distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixEvent {
    Message {
        room_id: String,
        sender: String,
        event_id: Option<String>,
        msgtype: String,
        body: String,
    },
    Invite {
        room_id: String,
        sender: String,
        invitee: String,
    },
    /// `target` left the room or was kicked or banned from it.
    Leave {
        room_id: String,
        sender: String,
        target: String,
    },
    Other {
        room_id: String,
        sender: String,
        event_type: String,
    },
}

impl MatrixEvent {
    pub fn room_id(&self) -> &str {
        match self {
            Self::Message { room_id, .. }
            | Self::Invite { room_id, .. }
            | Self::Leave { room_id, .. }
            | Self::Other { room_id, .. } => room_id,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Self::Message { sender, .. }
            | Self::Invite { sender, .. }
            | Self::Leave { sender, .. }
            | Self::Other { sender, .. } => sender,
        }
    }

    /// Returns `None` for events without a room, sender or type.
    pub fn from_raw(event: &Value) -> Option<Self> {
        let room_id = event.get("room_id").and_then(Value::as_str)?.to_owned();
        let sender = event.get("sender").and_then(Value::as_str)?.to_owned();
        let event_type = event.get("type").and_then(Value::as_str)?;
        let content = event.get("content");
        let membership = content
            .and_then(|c| c.get("membership"))
            .and_then(Value::as_str);

        match event_type {
            "m.room.message" => {
                let content = content?;
                Some(Self::Message {
                    room_id,
                    sender,
                    event_id: event
                        .get("event_id")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    msgtype: content
                        .get("msgtype")
                        .and_then(Value::as_str)
                        .unwrap_or("m.text")
                        .to_owned(),
                    body: content
                        .get("body")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                })
            }
            "m.room.member" if membership == Some("invite") => {
                let invitee = event.get("state_key").and_then(Value::as_str)?.to_owned();
                Some(Self::Invite {
                    room_id,
                    sender,
                    invitee,
                })
            }
            "m.room.member" if matches!(membership, Some("leave" | "ban")) => {
                let target = event.get("state_key").and_then(Value::as_str)?.to_owned();
                Some(Self::Leave {
                    room_id,
                    sender,
                    target,
                })
            }
            other => Some(Self::Other {
                room_id,
                sender,
                event_type: other.to_owned(),
            }),
        }
    }
}

#[async_trait]
pub trait MatrixEventHandler: Send + Sync {
    async fn on_event(&self, event: &MatrixEvent) -> Result<()>;
}

pub struct MatrixEventProcessor {
    event_handler: Arc<dyn MatrixEventHandler>,
}

impl MatrixEventProcessor {
    pub fn new(event_handler: Arc<dyn MatrixEventHandler>) -> Self {
        Self { event_handler }
    }

    fn check_event_age(event: &Value) -> bool {
        let Some(ts) = event.get("origin_server_ts").and_then(Value::as_i64) else {
            return true;
        };
        let now = chrono::Utc::now().timestamp_millis();
        if ts > now {
            debug!("event timestamp is in the future, allowing event");
            return true;
        }
        let age = now - ts;
        if age > AGE_LIMIT_MS {
            info!(
                "skipping event due to age {}ms > {}ms event_id={:?}",
                age,
                AGE_LIMIT_MS,
                event.get("event_id")
            );
            return false;
        }
        true
    }

    /// Feeds every usable event of an appservice transaction to the handler.
    /// Handler errors are logged per event and never fail the transaction.
    pub async fn process_transaction(&self, txn_id: &str, body: &Value) -> usize {
        let Some(events) = body.get("events").and_then(Value::as_array) else {
            return 0;
        };

        let mut handled = 0;
        for raw in events {
            if !Self::check_event_age(raw) {
                continue;
            }
            let Some(event) = MatrixEvent::from_raw(raw) else {
                debug!("dropping malformed event in transaction {}", txn_id);
                continue;
            };
            crate::web::metrics::Metrics::matrix_event_received();
            if let Err(e) = self.event_handler.on_event(&event).await {
                error!(
                    "error processing event room_id={} txn_id={}: {:#}",
                    event.room_id(),
                    txn_id,
                    e
                );
            }
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    fn raw_message(ts: Option<i64>) -> Value {
        let mut event = json!({
            "event_id": "$test",
            "type": "m.room.message",
            "room_id": "!room:example.org",
            "sender": "@user:example.org",
            "content": { "msgtype": "m.text", "body": "!help" },
        });
        if let Some(ts) = ts {
            event["origin_server_ts"] = json!(ts);
        }
        event
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<MatrixEvent>>,
    }

    #[async_trait]
    impl MatrixEventHandler for RecordingHandler {
        async fn on_event(&self, event: &MatrixEvent) -> Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn check_event_age_allows_recent_events() {
        let now = chrono::Utc::now().timestamp_millis();
        assert!(MatrixEventProcessor::check_event_age(&raw_message(Some(now))));
    }

    #[test]
    fn check_event_age_rejects_old_events() {
        let old_ts = chrono::Utc::now().timestamp_millis() - 1_000_000;
        assert!(!MatrixEventProcessor::check_event_age(&raw_message(Some(old_ts))));
    }

    #[test]
    fn check_event_age_allows_events_without_timestamp() {
        assert!(MatrixEventProcessor::check_event_age(&raw_message(None)));
    }

    #[test]
    fn check_event_age_allows_future_events() {
        let future_ts = chrono::Utc::now().timestamp_millis() + 60_000;
        assert!(MatrixEventProcessor::check_event_age(&raw_message(Some(future_ts))));
    }

    #[test]
    fn from_raw_parses_invites() {
        let raw = json!({
            "type": "m.room.member",
            "room_id": "!room:example.org",
            "sender": "@alice:example.org",
            "state_key": "@_ig_:example.org",
            "content": { "membership": "invite" },
        });
        assert_eq!(
            MatrixEvent::from_raw(&raw),
            Some(MatrixEvent::Invite {
                room_id: "!room:example.org".to_string(),
                sender: "@alice:example.org".to_string(),
                invitee: "@_ig_:example.org".to_string(),
            })
        );
    }

    #[test]
    fn from_raw_treats_joins_as_other() {
        let raw = json!({
            "type": "m.room.member",
            "room_id": "!room:example.org",
            "sender": "@alice:example.org",
            "state_key": "@alice:example.org",
            "content": { "membership": "join" },
        });
        assert!(matches!(
            MatrixEvent::from_raw(&raw),
            Some(MatrixEvent::Other { event_type, .. }) if event_type == "m.room.member"
        ));
    }

    #[test]
    fn from_raw_parses_leaves() {
        let raw = json!({
            "type": "m.room.member",
            "room_id": "!room:example.org",
            "sender": "@alice:example.org",
            "state_key": "@alice:example.org",
            "content": { "membership": "leave" },
        });
        assert!(matches!(
            MatrixEvent::from_raw(&raw),
            Some(MatrixEvent::Leave { target, .. }) if target == "@alice:example.org"
        ));
    }

    #[test]
    fn from_raw_rejects_events_without_room() {
        let raw = json!({ "type": "m.presence", "sender": "@alice:example.org" });
        assert_eq!(MatrixEvent::from_raw(&raw), None);
    }

    #[tokio::test]
    async fn process_transaction_skips_stale_and_malformed_events() {
        let handler = Arc::new(RecordingHandler::default());
        let processor = MatrixEventProcessor::new(handler.clone());
        let stale = chrono::Utc::now().timestamp_millis() - 1_000_000;
        let body = json!({
            "events": [
                raw_message(None),
                raw_message(Some(stale)),
                { "type": "m.room.message" },
            ]
        });

        assert_eq!(processor.process_transaction("txn1", &body).await, 1);
        let events = handler.events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], MatrixEvent::Message { body, .. } if body == "!help"));
    }
}
