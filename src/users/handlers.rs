use hyper::Method;

use crate::api::{self, parse_body, parse_query, LimitQuery};
use crate::database;
use crate::error::AppError;
use crate::media;
use crate::media::handlers::{read_limited_body, MAX_UPLOAD_SIZE};
use crate::media::UploadStore;
use crate::messages::api::MessageListReturn;
use crate::messages::Message;
use crate::users::api::{Profile, ProfileEdit, ProfileReturn, UploadQuery, UserListReturn};
use crate::users::User;

async fn find_user(username: &str) -> Result<User, AppError> {
    let db = database::get().await;
    User::get_by_username(&db, username)?.ok_or(AppError::NotFound("user"))
}

async fn list() -> api::Result {
    let db = database::get().await;
    let users = User::all(&db)?;
    api::Return::new(UserListReturn { users }).build()
}

async fn profile(username: &str) -> api::Result {
    let db = database::get().await;
    let user = User::get_by_username(&db, username)?.ok_or(AppError::NotFound("user"))?;
    let stats = User::stats(&db, user.id)?;
    api::Return::new(ProfileReturn {
        profile: Profile { user, stats },
    })
    .build()
}

async fn edit(req: api::Request, username: &str) -> api::Result {
    let patch: ProfileEdit = parse_body(req).await?;
    let db = database::get().await;
    let user = User::get_by_username(&db, username)?.ok_or(AppError::NotFound("user"))?;
    let updated = User::update_profile(&db, user.id, &patch)?.ok_or_else(|| {
        AppError::BadRequest("The profile update contained no recognized fields".to_string())
    })?;
    let stats = User::stats(&db, updated.id)?;
    api::Return::new(ProfileReturn {
        profile: Profile { user: updated, stats },
    })
    .build()
}

/// Deletes a replaced or removed image when it lives in our own store.
/// External URLs and already-missing files are left alone.
async fn discard_stored_image(url: Option<String>) {
    if let Some(url) = url {
        if media::store().path_for(&url).is_some() {
            if let Err(e) = media::store().delete(&url).await {
                log::warn!("Failed to delete the replaced image {}: {}", url, e);
            }
        }
    }
}

async fn upload_image(req: api::Request, username: &str, banner: bool) -> api::Result {
    let UploadQuery { filename, mime_type } = parse_query(req.uri())?;
    if let Some(ref mime_type) = mime_type {
        if !mime_type.starts_with("image/") {
            return Err(AppError::ValidationFail(format!(
                "Profile images must be images, got {}",
                mime_type
            )));
        }
    }
    let user = find_user(username).await?;
    let bytes = read_limited_body(req.into_body(), MAX_UPLOAD_SIZE).await?;
    let url = media::store().store(&filename, &bytes).await?;

    let old = if banner {
        user.banner_url.clone()
    } else {
        user.avatar_url.clone()
    };
    let patch = if banner {
        ProfileEdit {
            banner_url: Some(url),
            ..Default::default()
        }
    } else {
        ProfileEdit {
            avatar_url: Some(url),
            ..Default::default()
        }
    };
    let (updated, stats) = {
        let db = database::get().await;
        let updated =
            User::update_profile(&db, user.id, &patch)?.ok_or(AppError::NotFound("user"))?;
        let stats = User::stats(&db, updated.id)?;
        (updated, stats)
    };
    discard_stored_image(old).await;
    api::Return::new(ProfileReturn {
        profile: Profile { user: updated, stats },
    })
    .build()
}

async fn remove_image(username: &str, banner: bool) -> api::Result {
    let user = find_user(username).await?;
    let old = if banner {
        user.banner_url.clone()
    } else {
        user.avatar_url.clone()
    };
    let (updated, stats) = {
        let db = database::get().await;
        let updated = User::clear_image(&db, user.id, banner)?.ok_or(AppError::NotFound("user"))?;
        let stats = User::stats(&db, updated.id)?;
        (updated, stats)
    };
    discard_stored_image(old).await;
    api::Return::new(ProfileReturn {
        profile: Profile { user: updated, stats },
    })
    .build()
}

async fn user_messages(req: api::Request, username: &str) -> api::Result {
    let LimitQuery { limit } = parse_query(req.uri())?;
    let limit = limit.unwrap_or(50).clamp(1, 200);
    let db = database::get().await;
    User::get_by_username(&db, username)?.ok_or(AppError::NotFound("user"))?;
    let messages = Message::by_user(&db, username, limit)?;
    api::Return::new(MessageListReturn {
        count: messages.len(),
        messages,
    })
    .build()
}

pub async fn router(req: api::Request, path: &str) -> api::Result {
    if path.is_empty() || path == "/" {
        return match req.method().clone() {
            Method::GET => list().await,
            _ => Err(AppError::MethodNotAllowed),
        };
    }
    let rest = path.trim_start_matches('/');
    let (username, action) = match rest.split_once('/') {
        Some((username, action)) => (username, Some(action)),
        None => (rest, None),
    };
    let username = username.to_string();
    match (action, req.method().clone()) {
        (None, Method::GET) => profile(&username).await,
        (None, Method::PUT) => edit(req, &username).await,
        (Some("avatar"), Method::POST) => upload_image(req, &username, false).await,
        (Some("avatar"), Method::DELETE) => remove_image(&username, false).await,
        (Some("banner"), Method::POST) => upload_image(req, &username, true).await,
        (Some("banner"), Method::DELETE) => remove_image(&username, true).await,
        (Some("messages"), Method::GET) => user_messages(req, &username).await,
        _ => Err(AppError::missing()),
    }
}
