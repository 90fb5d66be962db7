use serde::{Deserialize, Serialize};

use super::{User, UserStats};

/// Typed partial profile update. Only these fields can ever be written from
/// a profile edit; anything else a client sends is dropped during parsing.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileEdit {
    pub display_name: Option<String>,
    pub pronouns: Option<String>,
    pub bio: Option<String>,
    pub status_text: Option<String>,
    pub custom_color: Option<String>,
    pub timezone: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
}

impl ProfileEdit {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.pronouns.is_none()
            && self.bio.is_none()
            && self.status_text.is_none()
            && self.custom_color.is_none()
            && self.timezone.is_none()
            && self.avatar_url.is_none()
            && self.banner_url.is_none()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    #[serde(flatten)]
    pub stats: UserStats,
}

#[derive(Debug, Serialize)]
pub struct ProfileReturn {
    pub profile: Profile,
}

#[derive(Debug, Serialize)]
pub struct UserListReturn {
    pub users: Vec<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub filename: String,
    pub mime_type: Option<String>,
}
