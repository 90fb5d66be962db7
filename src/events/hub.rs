//! The session hub: who is connected, who they are, and the broadcast
//! primitive every state change goes through.
//!
//! Owned by `main` and passed down by `Arc`; nothing here is ambient state.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use super::events::{Event, EventBody, SyncEvent};

const BROADCAST_CAPACITY: usize = 256;

struct TypingEntry {
    username: String,
    last_update: Instant,
}

pub struct Hub {
    sender: broadcast::Sender<SyncEvent>,
    // connection id -> bound user id; a connection appears here only after
    // an explicit register event.
    sessions: RwLock<HashMap<Uuid, i64>>,
    typing: Mutex<HashMap<i64, TypingEntry>>,
}

impl Hub {
    pub fn new() -> Hub {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Hub {
            sender,
            sessions: RwLock::new(HashMap::new()),
            typing: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publishes to every subscribed connection, in completion order.
    pub fn broadcast(&self, body: EventBody) {
        self.sender.send(SyncEvent::new(Event::new(body), None)).ok();
    }

    /// Publishes to every connection except the originating one.
    pub fn broadcast_from(&self, origin: Uuid, body: EventBody) {
        self.sender
            .send(SyncEvent::new(Event::new(body), Some(origin)))
            .ok();
    }

    pub async fn bind(&self, connection: Uuid, user_id: i64) {
        self.sessions.write().await.insert(connection, user_id);
    }

    pub async fn unbind(&self, connection: Uuid) -> Option<i64> {
        self.sessions.write().await.remove(&connection)
    }

    pub async fn user_of(&self, connection: Uuid) -> Option<i64> {
        self.sessions.read().await.get(&connection).copied()
    }

    pub async fn typing_started(&self, user_id: i64, username: &str) {
        self.typing.lock().await.insert(
            user_id,
            TypingEntry {
                username: username.to_string(),
                last_update: Instant::now(),
            },
        );
    }

    /// Returns the username when the user actually had a typing entry.
    pub async fn typing_stopped(&self, user_id: i64) -> Option<String> {
        self.typing.lock().await.remove(&user_id).map(|e| e.username)
    }

    /// Drops entries quiet for longer than `quiet` and reports who expired.
    pub async fn expire_quiet(&self, quiet: Duration) -> Vec<(i64, String)> {
        let now = Instant::now();
        let mut typing = self.typing.lock().await;
        let expired: Vec<i64> = typing
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_update) > quiet)
            .map(|(user_id, _)| *user_id)
            .collect();
        expired
            .into_iter()
            .filter_map(|user_id| typing.remove(&user_id).map(|e| (user_id, e.username)))
            .collect()
    }
}

impl Default for Hub {
    fn default() -> Hub {
        Hub::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_binds_and_unbinds() {
        let hub = Hub::new();
        let conn = Uuid::new_v4();
        assert_eq!(hub.user_of(conn).await, None);
        hub.bind(conn, 42).await;
        assert_eq!(hub.user_of(conn).await, Some(42));
        assert_eq!(hub.unbind(conn).await, Some(42));
        assert_eq!(hub.user_of(conn).await, None);
    }

    #[tokio::test]
    async fn typing_is_not_echoed_to_its_origin() {
        let hub = Hub::new();
        let carol_conn = Uuid::new_v4();
        let dave_conn = Uuid::new_v4();
        let mut carol_rx = hub.subscribe();
        let mut dave_rx = hub.subscribe();

        hub.broadcast_from(
            carol_conn,
            EventBody::Typing {
                user_id: 1,
                username: "carol".to_string(),
                is_typing: true,
            },
        );

        let to_dave = dave_rx.recv().await.unwrap();
        assert!(to_dave.visible_to(dave_conn));
        let value: serde_json::Value = serde_json::from_str(&to_dave.encoded).unwrap();
        assert_eq!(value["type"], "user:typing");
        assert_eq!(value["username"], "carol");
        assert_eq!(value["isTyping"], true);

        // Carol's connection receives the envelope but must filter it out.
        let to_carol = carol_rx.recv().await.unwrap();
        assert!(!to_carol.visible_to(carol_conn));
    }

    #[tokio::test]
    async fn quiet_typing_entries_expire() {
        let hub = Hub::new();
        hub.typing_started(1, "carol").await;
        assert!(hub.expire_quiet(Duration::from_secs(3)).await.is_empty());
        let expired = hub.expire_quiet(Duration::from_millis(0)).await;
        assert_eq!(expired, vec![(1, "carol".to_string())]);
        // Already gone: stopping again reports nothing.
        assert_eq!(hub.typing_stopped(1).await, None);
    }
}
