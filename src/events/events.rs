use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::api::NewMessage;
use crate::messages::Message;
use crate::users::api::{Profile, ProfileEdit};
use crate::users::{User, UserStatus};
use crate::utils::timestamp;

/// Everything a client may send over the event channel. Unknown event names
/// fail to parse and are answered with a point-to-point error.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "user:register", rename_all = "camelCase")]
    Register {
        username: String,
        #[serde(default)]
        avatar_url: Option<String>,
        #[serde(default)]
        status: Option<UserStatus>,
    },
    #[serde(rename = "message:send")]
    Send(NewMessage),
    #[serde(rename = "message:edit", rename_all = "camelCase")]
    Edit { id: i64, text: String },
    #[serde(rename = "message:delete", rename_all = "camelCase")]
    Delete { id: i64 },
    #[serde(rename = "user:status")]
    Status { status: UserStatus },
    #[serde(rename = "user:typing:start")]
    TypingStart,
    #[serde(rename = "user:typing:stop")]
    TypingStop,
    #[serde(rename = "profile:update")]
    ProfileUpdate(ProfileEdit),
    #[serde(rename = "profile:get", rename_all = "camelCase")]
    ProfileGet { user_id: i64 },
}

#[derive(Serialize, Debug)]
#[serde(tag = "type")]
pub enum EventBody {
    #[serde(rename = "message:history")]
    History { messages: Vec<Message> },
    #[serde(rename = "message:new")]
    NewMessage { message: Box<Message> },
    #[serde(rename = "message:edited")]
    MessageEdited { message: Box<Message> },
    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted { message_id: i64, deleted_by: String },
    #[serde(rename = "users:list")]
    UserList { users: Vec<User> },
    #[serde(rename = "user:typing", rename_all = "camelCase")]
    Typing {
        user_id: i64,
        username: String,
        is_typing: bool,
    },
    #[serde(rename = "profile:updated")]
    ProfileUpdated { user: Box<User> },
    #[serde(rename = "profile:data")]
    ProfileData { profile: Box<Profile> },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Serialize, Debug)]
pub struct Event {
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    pub fn new(body: EventBody) -> Event {
        Event {
            timestamp: timestamp(),
            body,
        }
    }

    pub fn encode(body: EventBody) -> String {
        SyncEvent::new(Event::new(body), None).encoded.to_string()
    }
}

/// A pre-encoded event ready for fan-out. `origin` marks the connection the
/// event came from, so "everyone except the sender" is a receiver-side check.
#[derive(Clone, Debug)]
pub struct SyncEvent {
    pub event: Arc<Event>,
    pub encoded: Arc<str>,
    pub origin: Option<Uuid>,
}

impl SyncEvent {
    pub fn new(event: Event, origin: Option<Uuid>) -> SyncEvent {
        let encoded = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","message":"encoding failure"}"#.to_string());
        SyncEvent {
            event: Arc::new(event),
            encoded: encoded.into(),
            origin,
        }
    }

    pub fn visible_to(&self, connection: Uuid) -> bool {
        self.origin != Some(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_client_events() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"message:send","text":"hi","hasMarkdown":true}"#).unwrap();
        match event {
            ClientEvent::Send(new) => {
                assert_eq!(new.text, "hi");
                assert!(new.has_markdown);
                assert!(new.attachments.is_empty());
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }

        let event: ClientEvent = serde_json::from_str(r#"{"type":"user:typing:start"}"#).unwrap();
        assert!(matches!(event, ClientEvent::TypingStart));

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"user:register","username":"alice"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Register { .. }));

        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"no:such:event"}"#).is_err());
    }

    // An absurd expiry must come back as a parse error, which the connection
    // loop answers with a point-to-point error event. A panic here would tear
    // down the session without running the disconnect path.
    #[test]
    fn out_of_range_attachment_expiry_is_an_error() {
        let raw = r#"{"type":"message:send","text":"x","attachment":
            {"type":"image","url":"/u/x.png","expiresAt":9223372036854775807}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());

        let raw = r#"{"type":"message:send","text":"x","attachment":
            {"type":"image","url":"/u/x.png","expiresAt":1700000000000}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_ok());
    }

    #[test]
    fn encoded_event_shape() {
        let encoded = Event::encode(EventBody::Typing {
            user_id: 7,
            username: "carol".to_string(),
            is_typing: true,
        });
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "user:typing");
        assert_eq!(value["username"], "carol");
        assert_eq!(value["isTyping"], true);
        assert!(value["timestamp"].is_i64());
    }
}
