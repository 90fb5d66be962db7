use chrono::naive::NaiveDateTime;
use chrono::{Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::api::ProfileEdit;
use crate::error::{AppError, ValidationFailed};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Away => "away",
            UserStatus::Busy => "busy",
            UserStatus::Offline => "offline",
        }
    }
}

impl ToSql for UserStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for UserStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "online" => Ok(UserStatus::Online),
            "away" => Ok(UserStatus::Away),
            "busy" => Ok(UserStatus::Busy),
            "offline" => Ok(UserStatus::Offline),
            other => Err(FromSqlError::Other(
                format!("unknown user status: {}", other).into(),
            )),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub pronouns: Option<String>,
    pub bio: Option<String>,
    pub custom_color: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub status: UserStatus,
    pub status_text: Option<String>,
    pub timezone: Option<String>,
    pub dark_mode: bool,
    #[serde(with = "crate::date_format")]
    pub created_at: NaiveDateTime,
    #[serde(with = "crate::date_format")]
    pub last_seen: NaiveDateTime,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub message_count: i64,
    #[serde(with = "crate::date_format::option")]
    pub member_since: Option<NaiveDateTime>,
}

/// Anyone seen within this window counts as present in the roster.
pub fn presence_window() -> Duration {
    Duration::minutes(5)
}

const USER_COLUMNS: &str = "id, username, display_name, pronouns, bio, custom_color, \
     avatar_url, banner_url, status, status_text, timezone, dark_mode, created_at, last_seen";

impl User {
    fn from_row(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get("id")?,
            username: row.get("username")?,
            display_name: row.get("display_name")?,
            pronouns: row.get("pronouns")?,
            bio: row.get("bio")?,
            custom_color: row.get("custom_color")?,
            avatar_url: row.get("avatar_url")?,
            banner_url: row.get("banner_url")?,
            status: row.get("status")?,
            status_text: row.get("status_text")?,
            timezone: row.get("timezone")?,
            dark_mode: row.get("dark_mode")?,
            created_at: row.get("created_at")?,
            last_seen: row.get("last_seen")?,
        })
    }

    /// Creates the row on first sight of a username, otherwise refreshes
    /// avatar, status and `last_seen`. The username itself is immutable.
    pub fn upsert(
        conn: &Connection,
        username: &str,
        avatar_url: Option<&str>,
        status: UserStatus,
    ) -> Result<User, AppError> {
        use crate::validators::USERNAME;
        let username = username.trim();
        USERNAME.run(username).map_err(ValidationFailed)?;

        let now = Utc::now().naive_utc();
        let mut statement = conn.prepare_cached(
            "INSERT INTO users (username, avatar_url, status, created_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(username) DO UPDATE SET
                 avatar_url = COALESCE(?2, avatar_url),
                 status = ?3,
                 last_seen = ?4",
        )?;
        statement.execute(rusqlite::params![username, avatar_url, status, now])?;
        User::get_by_username(conn, username)?.ok_or(AppError::NotFound("user"))
    }

    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<User>, AppError> {
        let mut statement =
            conn.prepare_cached(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))?;
        let user = statement.query_row([id], User::from_row).optional()?;
        Ok(user)
    }

    pub fn get_by_username(conn: &Connection, username: &str) -> Result<Option<User>, AppError> {
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {} FROM users WHERE username = ?1",
            USER_COLUMNS
        ))?;
        let user = statement.query_row([username], User::from_row).optional()?;
        Ok(user)
    }

    pub fn all(conn: &Connection) -> Result<Vec<User>, AppError> {
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {} FROM users ORDER BY last_seen DESC",
            USER_COLUMNS
        ))?;
        let users = statement
            .query_map([], User::from_row)?
            .collect::<rusqlite::Result<Vec<User>>>()?;
        Ok(users)
    }

    /// Who is online, approximately: anyone seen within the window,
    /// most recent first. A heuristic, not a live connection count.
    pub fn get_active_since(conn: &Connection, window: Duration) -> Result<Vec<User>, AppError> {
        let cutoff = Utc::now().naive_utc() - window;
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {} FROM users WHERE last_seen > ?1 ORDER BY last_seen DESC",
            USER_COLUMNS
        ))?;
        let users = statement
            .query_map([cutoff], User::from_row)?
            .collect::<rusqlite::Result<Vec<User>>>()?;
        Ok(users)
    }

    pub fn update_status(conn: &Connection, id: i64, status: UserStatus) -> Result<(), AppError> {
        let now = Utc::now().naive_utc();
        let mut statement =
            conn.prepare_cached("UPDATE users SET status = ?1, last_seen = ?2 WHERE id = ?3")?;
        statement.execute(rusqlite::params![status, now, id])?;
        Ok(())
    }

    pub fn set_offline(conn: &Connection, id: i64) -> Result<(), AppError> {
        User::update_status(conn, id, UserStatus::Offline)
    }

    /// Applies a typed partial update. Every recognized field maps to a fixed
    /// column; a patch carrying nothing recognized is a no-op returning `None`.
    /// Any applied patch also bumps `last_seen`.
    pub fn update_profile(
        conn: &Connection,
        id: i64,
        patch: &ProfileEdit,
    ) -> Result<Option<User>, AppError> {
        use crate::validators::{BIO, CUSTOM_COLOR, DISPLAY_NAME, STATUS_TEXT};
        if patch.is_empty() {
            return Ok(None);
        }
        if let Some(ref display_name) = patch.display_name {
            DISPLAY_NAME.run(display_name.trim()).map_err(ValidationFailed)?;
        }
        if let Some(ref bio) = patch.bio {
            BIO.run(bio).map_err(ValidationFailed)?;
        }
        if let Some(ref status_text) = patch.status_text {
            STATUS_TEXT.run(status_text).map_err(ValidationFailed)?;
        }
        if let Some(ref custom_color) = patch.custom_color {
            CUSTOM_COLOR.run(custom_color).map_err(ValidationFailed)?;
        }

        let mut assignments: Vec<&'static str> = Vec::new();
        let mut values: Vec<&dyn ToSql> = Vec::new();
        let pairs: [(&'static str, &Option<String>); 8] = [
            ("display_name = ?", &patch.display_name),
            ("pronouns = ?", &patch.pronouns),
            ("bio = ?", &patch.bio),
            ("status_text = ?", &patch.status_text),
            ("custom_color = ?", &patch.custom_color),
            ("timezone = ?", &patch.timezone),
            ("avatar_url = ?", &patch.avatar_url),
            ("banner_url = ?", &patch.banner_url),
        ];
        for (assignment, value) in pairs.iter() {
            if let Some(value) = value {
                assignments.push(assignment);
                values.push(value);
            }
        }

        let now = Utc::now().naive_utc();
        values.push(&now);
        values.push(&id);
        let sql = format!(
            "UPDATE users SET {}, last_seen = ? WHERE id = ?",
            assignments.join(", ")
        );
        conn.prepare_cached(&sql)?.execute(&values[..])?;
        Ok(User::get_by_id(conn, id)?)
    }

    /// Clears a stored image URL column. `column` is one of the fixed names.
    pub fn clear_image(conn: &Connection, id: i64, banner: bool) -> Result<Option<User>, AppError> {
        let sql = if banner {
            "UPDATE users SET banner_url = NULL WHERE id = ?1"
        } else {
            "UPDATE users SET avatar_url = NULL WHERE id = ?1"
        };
        conn.prepare_cached(sql)?.execute([id])?;
        Ok(User::get_by_id(conn, id)?)
    }

    /// Message count and membership age. An absent user yields zero-valued
    /// stats instead of an error.
    pub fn stats(conn: &Connection, id: i64) -> Result<UserStats, AppError> {
        let mut statement = conn
            .prepare_cached("SELECT COUNT(*) FROM messages WHERE user_id = ?1 AND deleted = 0")?;
        let message_count: i64 = statement.query_row([id], |row| row.get(0))?;
        let member_since = User::get_by_id(conn, id)?.map(|user| user.created_at);
        Ok(UserStats {
            message_count,
            member_since,
        })
    }

    /// Removes rows not seen for the given number of days. Operator-only.
    pub fn cleanup_inactive(conn: &Connection, days: i64) -> Result<usize, AppError> {
        let cutoff = Utc::now().naive_utc() - Duration::days(days);
        let mut statement = conn.prepare_cached("DELETE FROM users WHERE last_seen < ?1")?;
        let removed = statement.execute([cutoff])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test;

    #[test]
    fn upsert_is_idempotent() {
        let conn = open_test();
        let alice = User::upsert(&conn, "alice", None, UserStatus::Online).unwrap();
        let again = User::upsert(&conn, "alice", Some("/u/a.png"), UserStatus::Away).unwrap();
        assert_eq!(alice.id, again.id);
        assert_eq!(again.status, UserStatus::Away);
        assert_eq!(again.avatar_url.as_deref(), Some("/u/a.png"));
        // A later upsert without an avatar keeps the stored one.
        let third = User::upsert(&conn, "alice", None, UserStatus::Online).unwrap();
        assert_eq!(third.avatar_url.as_deref(), Some("/u/a.png"));
    }

    #[test]
    fn rejects_bad_username() {
        let conn = open_test();
        assert!(User::upsert(&conn, "not a name", None, UserStatus::Online).is_err());
        assert!(User::upsert(&conn, "", None, UserStatus::Online).is_err());
    }

    #[test]
    fn presence_window() {
        let conn = open_test();
        let alice = User::upsert(&conn, "alice", None, UserStatus::Online).unwrap();
        let active = User::get_active_since(&conn, Duration::minutes(5)).unwrap();
        assert_eq!(active.len(), 1);

        let stale = Utc::now().naive_utc() - Duration::minutes(10);
        conn.execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            rusqlite::params![stale, alice.id],
        )
        .unwrap();
        let active = User::get_active_since(&conn, Duration::minutes(5)).unwrap();
        assert!(active.is_empty());
    }

    #[test]
    fn profile_whitelist() {
        let conn = open_test();
        let alice = User::upsert(&conn, "alice", None, UserStatus::Online).unwrap();

        let nothing = User::update_profile(&conn, alice.id, &ProfileEdit::default()).unwrap();
        assert!(nothing.is_none());

        // Unknown keys vanish at parse time; what remains is an empty patch.
        let patch: ProfileEdit =
            serde_json::from_str(r#"{"notARealField": "x", "isAdmin": true}"#).unwrap();
        assert!(User::update_profile(&conn, alice.id, &patch).unwrap().is_none());

        let before = User::get_by_id(&conn, alice.id).unwrap().unwrap();
        let patch = ProfileEdit {
            bio: Some("hi".to_string()),
            ..Default::default()
        };
        let updated = User::update_profile(&conn, alice.id, &patch).unwrap().unwrap();
        assert_eq!(updated.bio.as_deref(), Some("hi"));
        assert_eq!(updated.display_name, before.display_name);
        assert!(updated.last_seen >= before.last_seen);
    }

    #[test]
    fn stats_for_absent_user_are_zero() {
        let conn = open_test();
        let stats = User::stats(&conn, 999).unwrap();
        assert_eq!(stats.message_count, 0);
        assert!(stats.member_since.is_none());
    }

    #[test]
    fn status_round_trip() {
        let conn = open_test();
        let alice = User::upsert(&conn, "alice", None, UserStatus::Online).unwrap();
        User::update_status(&conn, alice.id, UserStatus::Busy).unwrap();
        let alice = User::get_by_id(&conn, alice.id).unwrap().unwrap();
        assert_eq!(alice.status, UserStatus::Busy);
        User::set_offline(&conn, alice.id).unwrap();
        let alice = User::get_by_id(&conn, alice.id).unwrap().unwrap();
        assert_eq!(alice.status, UserStatus::Offline);
    }
}
