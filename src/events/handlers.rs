use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use super::{ClientEvent, Event, EventBody, Hub};
use crate::api;
use crate::database;
use crate::error::AppError;
use crate::messages::Message;
use crate::users::api::Profile;
use crate::users::{presence_window, User, UserStatus};
use crate::websocket::{establish_web_socket, log_error};

/// How many messages a fresh connection gets as its initial sync.
const HISTORY_LIMIT: i64 = 100;

type Peer = mpsc::UnboundedSender<String>;

fn send_direct(peer: &Peer, body: EventBody) {
    peer.send(Event::encode(body)).ok();
}

async fn roster() -> Result<EventBody, AppError> {
    let db = database::get().await;
    let users = User::get_active_since(&db, presence_window())?;
    Ok(EventBody::UserList { users })
}

async fn require_user(hub: &Hub, connection: Uuid) -> Result<i64, AppError> {
    hub.user_of(connection).await.ok_or_else(|| {
        AppError::BadRequest("Register a username before sending events".to_string())
    })
}

async fn dispatch(
    hub: &Hub,
    connection: Uuid,
    peer: &Peer,
    event: ClientEvent,
) -> Result<(), AppError> {
    match event {
        ClientEvent::Register {
            username,
            avatar_url,
            status,
        } => {
            let (user, messages) = {
                let db = database::get().await;
                let user = User::upsert(
                    &db,
                    &username,
                    avatar_url.as_deref(),
                    status.unwrap_or(UserStatus::Online),
                )?;
                let messages = Message::get_history(&db, HISTORY_LIMIT)?;
                (user, messages)
            };
            hub.bind(connection, user.id).await;
            send_direct(peer, EventBody::History { messages });
            hub.broadcast(roster().await?);
        }
        ClientEvent::Send(new) => {
            let author = require_user(hub, connection).await?;
            let message = {
                let mut db = database::get().await;
                Message::create(&mut db, author, &new)?
            };
            hub.broadcast(EventBody::NewMessage {
                message: Box::new(message),
            });
        }
        ClientEvent::Edit { id, text } => {
            let author = require_user(hub, connection).await?;
            let edited = {
                let db = database::get().await;
                Message::edit(&db, id, author, &text)?
            };
            match edited {
                Some(message) => hub.broadcast(EventBody::MessageEdited {
                    message: Box::new(message),
                }),
                None => return Err(AppError::NoPermission),
            }
        }
        ClientEvent::Delete { id } => {
            let author = require_user(hub, connection).await?;
            let (username, deleted) = {
                let db = database::get().await;
                let username = User::get_by_id(&db, author)?
                    .ok_or(AppError::NotFound("user"))?
                    .username;
                let deleted = Message::delete(&db, id, author, &username)?;
                (username, deleted)
            };
            match deleted {
                Some(message) => hub.broadcast(EventBody::MessageDeleted {
                    message_id: message.id,
                    deleted_by: username,
                }),
                None => return Err(AppError::NoPermission),
            }
        }
        ClientEvent::Status { status } => {
            let user_id = require_user(hub, connection).await?;
            {
                let db = database::get().await;
                User::update_status(&db, user_id, status)?;
            }
            hub.broadcast(roster().await?);
        }
        ClientEvent::TypingStart => {
            let user_id = require_user(hub, connection).await?;
            let username = {
                let db = database::get().await;
                User::get_by_id(&db, user_id)?
                    .ok_or(AppError::NotFound("user"))?
                    .username
            };
            hub.typing_started(user_id, &username).await;
            hub.broadcast_from(
                connection,
                EventBody::Typing {
                    user_id,
                    username,
                    is_typing: true,
                },
            );
        }
        ClientEvent::TypingStop => {
            let user_id = require_user(hub, connection).await?;
            if let Some(username) = hub.typing_stopped(user_id).await {
                hub.broadcast_from(
                    connection,
                    EventBody::Typing {
                        user_id,
                        username,
                        is_typing: false,
                    },
                );
            }
        }
        ClientEvent::ProfileUpdate(patch) => {
            let user_id = require_user(hub, connection).await?;
            let updated = {
                let db = database::get().await;
                User::update_profile(&db, user_id, &patch)?
            };
            match updated {
                Some(user) => hub.broadcast(EventBody::ProfileUpdated {
                    user: Box::new(user),
                }),
                None => {
                    return Err(AppError::BadRequest(
                        "The profile update contained no recognized fields".to_string(),
                    ))
                }
            }
        }
        ClientEvent::ProfileGet { user_id } => {
            let profile = {
                let db = database::get().await;
                let user = User::get_by_id(&db, user_id)?.ok_or(AppError::NotFound("user"))?;
                let stats = User::stats(&db, user.id)?;
                Profile { user, stats }
            };
            send_direct(
                peer,
                EventBody::ProfileData {
                    profile: Box::new(profile),
                },
            );
        }
    }
    Ok(())
}

/// Tears down a connection's session: the user goes offline, their typing
/// indicator clears, and the remaining clients get a fresh roster.
async fn disconnect(hub: &Hub, connection: Uuid) {
    let user_id = match hub.unbind(connection).await {
        Some(user_id) => user_id,
        None => return,
    };
    if let Some(username) = hub.typing_stopped(user_id).await {
        hub.broadcast(EventBody::Typing {
            user_id,
            username,
            is_typing: false,
        });
    }
    {
        let db = database::get().await;
        if let Err(e) = User::set_offline(&db, user_id) {
            log::warn!("Failed to mark user {} offline: {}", user_id, e);
        }
    }
    match roster().await {
        Ok(body) => hub.broadcast(body),
        Err(e) => log::warn!("Failed to load the roster on disconnect: {}", e),
    }
}

async fn handle_connection(hub: Arc<Hub>, ws: WebSocketStream<Upgraded>) {
    let connection = Uuid::new_v4();
    let (mut outgoing, mut incoming) = ws.split();
    let (peer, mut peer_messages) = mpsc::unbounded_channel::<String>();
    let mut broadcasts = hub.subscribe();

    let writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = broadcasts.recv() => match event {
                    Ok(event) if event.visible_to(connection) => event.encoded.to_string(),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Connection {} lagged behind {} events", connection, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                direct = peer_messages.recv() => match direct {
                    Some(text) => text,
                    None => break,
                },
            };
            if let Err(e) = outgoing.send(WsMessage::Text(text)).await {
                log_error(&e);
                break;
            }
        }
    });

    while let Some(message) = incoming.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                log_error(&e);
                break;
            }
        };
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(e) = dispatch(&hub, connection, &peer, event).await {
                        send_direct(
                            &peer,
                            EventBody::Error {
                                message: e.to_string(),
                            },
                        );
                    }
                }
                Err(_) => send_direct(
                    &peer,
                    EventBody::Error {
                        message: "Unrecognized event".to_string(),
                    },
                ),
            },
            WsMessage::Close(_) => break,
            _ => (),
        }
    }

    disconnect(&hub, connection).await;
    writer.abort();
}

pub async fn router(req: api::Request, path: &str, hub: &Arc<Hub>) -> api::Result {
    use hyper::Method;

    match (path, req.method().clone()) {
        ("/connect", Method::GET) => {
            let hub = hub.clone();
            establish_web_socket(req, move |ws| handle_connection(hub, ws))
        }
        _ => Err(AppError::missing()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_before_registration_are_rejected() {
        let hub = Hub::new();
        let connection = Uuid::new_v4();
        let (peer, _rx) = mpsc::unbounded_channel();

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"message:send","text":"hi"}"#).unwrap();
        let result = dispatch(&hub, connection, &peer, event).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        let event: ClientEvent = serde_json::from_str(r#"{"type":"user:typing:stop"}"#).unwrap();
        assert!(dispatch(&hub, connection, &peer, event).await.is_err());
    }
}
