use hyper::Method;

use crate::api::{self, parse_body, parse_query, LimitQuery};
use crate::database;
use crate::error::AppError;
use crate::media;
use crate::messages::api::{
    DeleteForm, GlobalStats, MessageDeletedReturn, MessageListReturn, SearchQuery, StatsReturn,
};
use crate::messages::Message;
use crate::users::{presence_window, User};

async fn history(req: api::Request) -> api::Result {
    let LimitQuery { limit } = parse_query(req.uri())?;
    let limit = limit.unwrap_or(100).clamp(1, 500);
    let db = database::get().await;
    let messages = Message::get_history(&db, limit)?;
    api::Return::new(MessageListReturn {
        count: messages.len(),
        messages,
    })
    .build()
}

async fn search(req: api::Request) -> api::Result {
    let SearchQuery { q, limit } = parse_query(req.uri())?;
    if q.trim().is_empty() {
        return Err(AppError::BadRequest("The search query is empty".to_string()));
    }
    let limit = limit.unwrap_or(50).clamp(1, 200);
    let db = database::get().await;
    let messages = Message::search(&db, &q, limit)?;
    api::Return::new(MessageListReturn {
        count: messages.len(),
        messages,
    })
    .build()
}

/// The REST variant of message deletion: the same author-owned soft delete
/// the event channel performs, for clients without a live connection.
async fn delete(req: api::Request, id: i64) -> api::Result {
    let DeleteForm { username } = parse_body(req).await?;
    let db = database::get().await;
    let user = User::get_by_username(&db, &username)?.ok_or(AppError::NotFound("user"))?;
    Message::get_by_id(&db, id)?.ok_or(AppError::NotFound("message"))?;
    match Message::delete(&db, id, user.id, &user.username)? {
        Some(message) => api::Return::new(MessageDeletedReturn {
            message_id: message.id,
        })
        .build(),
        None => Err(AppError::NoPermission),
    }
}

/// `GET /api/stats` — room-wide totals.
pub async fn stats() -> api::Result {
    let db = database::get().await;
    let total_users = User::all(&db)?.len();
    let online_users = User::get_active_since(&db, presence_window())?.len();
    let messages = Message::stats(&db)?;
    api::Return::new(StatsReturn {
        stats: GlobalStats {
            total_users,
            online_users,
            messages,
        },
    })
    .build()
}

pub async fn router(req: api::Request, path: &str) -> api::Result {
    match (path, req.method().clone()) {
        ("" | "/", Method::GET) => history(req).await,
        ("/search", Method::GET) => search(req).await,
        ("/attachment", Method::POST) => media::handlers::upload_attachment(req).await,
        _ => {
            let rest = path.trim_start_matches('/');
            if req.method() == Method::DELETE {
                if let Ok(id) = rest.parse::<i64>() {
                    return delete(req, id).await;
                }
            }
            Err(AppError::missing())
        }
    }
}
