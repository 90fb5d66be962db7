use chrono::naive::NaiveDateTime;
use chrono::{Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::api::NewMessage;
use crate::error::{AppError, ValidationFailed};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Gif,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
            AttachmentKind::Gif => "gif",
        }
    }
}

impl ToSql for AttachmentKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttachmentKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "image" => Ok(AttachmentKind::Image),
            "video" => Ok(AttachmentKind::Video),
            "gif" => Ok(AttachmentKind::Gif),
            other => Err(FromSqlError::Other(
                format!("unknown attachment type: {}", other).into(),
            )),
        }
    }
}

/// A child attachment row, kept in insertion order.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub name: Option<String>,
}

/// A message hydrated with its author's display fields and attachments.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub custom_color: Option<String>,
    pub avatar_url: Option<String>,
    pub text: String,
    pub has_markdown: bool,
    pub edited: bool,
    #[serde(with = "crate::date_format::option")]
    pub edited_at: Option<NaiveDateTime>,
    pub deleted: bool,
    pub deleted_by: Option<String>,
    #[serde(with = "crate::date_format::option")]
    pub deleted_at: Option<NaiveDateTime>,
    pub attachment_type: Option<AttachmentKind>,
    pub attachment_url: Option<String>,
    #[serde(with = "crate::date_format::option")]
    pub attachment_expires_at: Option<NaiveDateTime>,
    #[serde(with = "crate::date_format")]
    pub created_at: NaiveDateTime,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopAuthor {
    pub username: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total_messages: i64,
    pub top_users: Vec<TopAuthor>,
}

const MESSAGE_COLUMNS: &str = "m.id, m.user_id, u.username, u.display_name, u.custom_color, \
     u.avatar_url, m.text, m.has_markdown, m.edited, m.edited_at, m.deleted, m.deleted_by, \
     m.deleted_at, m.attachment_type, m.attachment_url, m.attachment_expires_at, m.created_at";

const MESSAGE_JOIN: &str = "FROM messages m JOIN users u ON m.user_id = u.id";

fn like_escape(query: &str) -> String {
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

impl Message {
    fn from_row(row: &Row) -> rusqlite::Result<Message> {
        Ok(Message {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            username: row.get("username")?,
            display_name: row.get("display_name")?,
            custom_color: row.get("custom_color")?,
            avatar_url: row.get("avatar_url")?,
            text: row.get("text")?,
            has_markdown: row.get("has_markdown")?,
            edited: row.get("edited")?,
            edited_at: row.get("edited_at")?,
            deleted: row.get("deleted")?,
            deleted_by: row.get("deleted_by")?,
            deleted_at: row.get("deleted_at")?,
            attachment_type: row.get("attachment_type")?,
            attachment_url: row.get("attachment_url")?,
            attachment_expires_at: row.get("attachment_expires_at")?,
            created_at: row.get("created_at")?,
            attachments: Vec::new(),
        })
    }

    fn load_attachments(conn: &Connection, message_id: i64) -> rusqlite::Result<Vec<Attachment>> {
        let mut statement = conn.prepare_cached(
            "SELECT type, url, name FROM attachments WHERE message_id = ?1 ORDER BY id ASC",
        )?;
        let attachments = statement
            .query_map([message_id], |row| {
                Ok(Attachment {
                    kind: row.get(0)?,
                    url: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<Attachment>>>()?;
        Ok(attachments)
    }

    fn hydrate(conn: &Connection, mut message: Message) -> rusqlite::Result<Message> {
        message.attachments = Message::load_attachments(conn, message.id)?;
        Ok(message)
    }

    /// Inserts the message and its child attachments in one transaction;
    /// a failing attachment insert rolls the whole message back.
    pub fn create(conn: &mut Connection, author_id: i64, new: &NewMessage) -> Result<Message, AppError> {
        if new.text.trim().is_empty() && new.attachment.is_none() && new.attachments.is_empty() {
            return Err(ValidationFailed("Message text is empty.").into());
        }

        let now = Utc::now().naive_utc();
        let transaction = conn.transaction()?;
        {
            let mut statement = transaction.prepare_cached(
                "INSERT INTO messages (user_id, text, has_markdown, attachment_type, \
                 attachment_url, attachment_expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let inline = new.attachment.as_ref();
            statement.execute(rusqlite::params![
                author_id,
                new.text,
                new.has_markdown,
                inline.map(|a| a.kind),
                inline.map(|a| a.url.as_str()),
                inline.and_then(|a| a.expires_at),
                now,
            ])?;
        }
        let message_id = transaction.last_insert_rowid();
        {
            let mut statement = transaction.prepare_cached(
                "INSERT INTO attachments (message_id, type, url, name, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for attachment in &new.attachments {
                statement.execute(rusqlite::params![
                    message_id,
                    attachment.kind,
                    attachment.url,
                    attachment.name,
                    now,
                ])?;
            }
        }
        transaction.commit()?;
        Message::get_by_id(conn, message_id)?.ok_or(AppError::NotFound("message"))
    }

    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Message>, AppError> {
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {} {} WHERE m.id = ?1",
            MESSAGE_COLUMNS, MESSAGE_JOIN
        ))?;
        let message = statement.query_row([id], Message::from_row).optional()?;
        match message {
            Some(message) => Ok(Some(Message::hydrate(conn, message)?)),
            None => Ok(None),
        }
    }

    /// The most recent `limit` messages, oldest first, for initial sync.
    pub fn get_history(conn: &Connection, limit: i64) -> Result<Vec<Message>, AppError> {
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {} {} ORDER BY m.created_at DESC, m.id DESC LIMIT ?1",
            MESSAGE_COLUMNS, MESSAGE_JOIN
        ))?;
        let mut messages = statement
            .query_map([limit], Message::from_row)?
            .collect::<rusqlite::Result<Vec<Message>>>()?;
        messages.reverse();
        messages
            .into_iter()
            .map(|m| Message::hydrate(conn, m).map_err(Into::into))
            .collect()
    }

    /// Replaces the text when, and only when, `author_id` owns the message.
    /// Returns `None` otherwise; the caller decides how to reject.
    pub fn edit(
        conn: &Connection,
        id: i64,
        author_id: i64,
        text: &str,
    ) -> Result<Option<Message>, AppError> {
        if text.trim().is_empty() {
            return Err(ValidationFailed("Message text is empty.").into());
        }
        let now = Utc::now().naive_utc();
        let mut statement = conn.prepare_cached(
            "UPDATE messages SET text = ?1, edited = 1, edited_at = ?2 \
             WHERE id = ?3 AND user_id = ?4 AND deleted = 0",
        )?;
        let changed = statement.execute(rusqlite::params![text, now, id, author_id])?;
        if changed == 0 {
            return Ok(None);
        }
        Message::get_by_id(conn, id)
    }

    /// Author-owned soft delete. The row stays; only the flags change.
    pub fn delete(
        conn: &Connection,
        id: i64,
        author_id: i64,
        deleted_by: &str,
    ) -> Result<Option<Message>, AppError> {
        let now = Utc::now().naive_utc();
        let mut statement = conn.prepare_cached(
            "UPDATE messages SET deleted = 1, deleted_by = ?1, deleted_at = ?2 \
             WHERE id = ?3 AND user_id = ?4",
        )?;
        let changed = statement.execute(rusqlite::params![deleted_by, now, id, author_id])?;
        if changed == 0 {
            return Ok(None);
        }
        Message::get_by_id(conn, id)
    }

    /// Case-insensitive substring search, tombstones excluded.
    pub fn search(conn: &Connection, query: &str, limit: i64) -> Result<Vec<Message>, AppError> {
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {} {} WHERE m.text LIKE ?1 ESCAPE '\\' AND m.deleted = 0 \
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?2",
            MESSAGE_COLUMNS, MESSAGE_JOIN
        ))?;
        let messages = statement
            .query_map(rusqlite::params![like_escape(query), limit], Message::from_row)?
            .collect::<rusqlite::Result<Vec<Message>>>()?;
        messages
            .into_iter()
            .map(|m| Message::hydrate(conn, m).map_err(Into::into))
            .collect()
    }

    pub fn by_user(conn: &Connection, username: &str, limit: i64) -> Result<Vec<Message>, AppError> {
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {} {} WHERE u.username = ?1 AND m.deleted = 0 \
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?2",
            MESSAGE_COLUMNS, MESSAGE_JOIN
        ))?;
        let mut messages = statement
            .query_map(rusqlite::params![username, limit], Message::from_row)?
            .collect::<rusqlite::Result<Vec<Message>>>()?;
        messages.reverse();
        messages
            .into_iter()
            .map(|m| Message::hydrate(conn, m).map_err(Into::into))
            .collect()
    }

    /// Hard retention sweep, operator-triggered only.
    pub fn cleanup_old(conn: &Connection, days: i64) -> Result<usize, AppError> {
        let cutoff = Utc::now().naive_utc() - Duration::days(days);
        let mut statement = conn.prepare_cached("DELETE FROM messages WHERE created_at < ?1")?;
        let removed = statement.execute([cutoff])?;
        Ok(removed)
    }

    /// Clears expired inline attachments: the columns are nulled while the
    /// message text survives, and the stored URLs are handed back so the
    /// caller can delete the files afterwards (the database is the source of
    /// truth, absence on disk is tolerated). Idempotent: a second sweep
    /// finds nothing.
    pub fn clean_expired_attachments(conn: &Connection) -> Result<(usize, Vec<String>), AppError> {
        let now = Utc::now().naive_utc();
        let mut statement = conn.prepare_cached(
            "SELECT attachment_url FROM messages \
             WHERE attachment_expires_at IS NOT NULL AND attachment_expires_at < ?1 \
             AND attachment_url IS NOT NULL",
        )?;
        let expired = statement
            .query_map([now], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        let mut statement = conn.prepare_cached(
            "UPDATE messages \
             SET attachment_type = NULL, attachment_url = NULL, attachment_expires_at = NULL \
             WHERE attachment_expires_at IS NOT NULL AND attachment_expires_at < ?1",
        )?;
        let cleared = statement.execute([now])?;
        Ok((cleared, expired))
    }

    pub fn stats(conn: &Connection) -> Result<MessageStats, AppError> {
        let total_messages: i64 = conn
            .prepare_cached("SELECT COUNT(*) FROM messages")?
            .query_row([], |row| row.get(0))?;
        let mut statement = conn.prepare_cached(
            "SELECT u.username, COUNT(*) AS count FROM messages m \
             JOIN users u ON m.user_id = u.id WHERE m.deleted = 0 \
             GROUP BY u.username ORDER BY count DESC LIMIT 10",
        )?;
        let top_users = statement
            .query_map([], |row| {
                Ok(TopAuthor {
                    username: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<TopAuthor>>>()?;
        Ok(MessageStats {
            total_messages,
            top_users,
        })
    }

    pub fn count(conn: &Connection) -> Result<i64, AppError> {
        let count = conn
            .prepare_cached("SELECT COUNT(*) FROM messages")?
            .query_row([], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test;
    use crate::media::tests::RecordingStore;
    use crate::messages::api::{InlineAttachment, NewAttachment};
    use crate::users::{User, UserStatus};

    fn new_message(text: &str) -> NewMessage {
        NewMessage {
            text: text.to_string(),
            has_markdown: false,
            attachment: None,
            attachments: Vec::new(),
        }
    }

    fn alice(conn: &Connection) -> User {
        User::upsert(conn, "alice", None, UserStatus::Online).unwrap()
    }

    #[test]
    fn create_round_trip() {
        let mut conn = open_test();
        let alice = alice(&conn);
        let mut new = new_message("hello");
        new.attachments = vec![
            NewAttachment {
                kind: AttachmentKind::Image,
                url: "/u/one.png".to_string(),
                name: Some("one.png".to_string()),
            },
            NewAttachment {
                kind: AttachmentKind::Video,
                url: "/u/two.mp4".to_string(),
                name: None,
            },
        ];
        let message = Message::create(&mut conn, alice.id, &new).unwrap();
        let fetched = Message::get_by_id(&conn, message.id).unwrap().unwrap();
        assert_eq!(fetched.text, "hello");
        assert_eq!(fetched.username, "alice");
        assert!(!fetched.edited);
        assert!(!fetched.deleted);
        assert_eq!(fetched.attachments.len(), 2);
        assert_eq!(fetched.attachments[0].url, "/u/one.png");
        assert_eq!(fetched.attachments[1].url, "/u/two.mp4");
    }

    #[test]
    fn history_is_chronological() {
        let mut conn = open_test();
        let alice = alice(&conn);
        for text in ["one", "two", "three"] {
            Message::create(&mut conn, alice.id, &new_message(text)).unwrap();
        }
        let history = Message::get_history(&conn, 10).unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);

        let trimmed = Message::get_history(&conn, 2).unwrap();
        let texts: Vec<&str> = trimmed.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn only_the_author_edits() {
        let mut conn = open_test();
        let alice = alice(&conn);
        let bob = User::upsert(&conn, "bob", None, UserStatus::Online).unwrap();
        let message = Message::create(&mut conn, alice.id, &new_message("hello")).unwrap();

        assert!(Message::edit(&conn, message.id, bob.id, "hacked").unwrap().is_none());
        let unchanged = Message::get_by_id(&conn, message.id).unwrap().unwrap();
        assert_eq!(unchanged.text, "hello");
        assert!(!unchanged.edited);

        let edited = Message::edit(&conn, message.id, alice.id, "hi there").unwrap().unwrap();
        assert_eq!(edited.text, "hi there");
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());
    }

    #[test]
    fn soft_delete_keeps_the_row() {
        let mut conn = open_test();
        let alice = alice(&conn);
        let bob = User::upsert(&conn, "bob", None, UserStatus::Online).unwrap();
        let message = Message::create(&mut conn, alice.id, &new_message("hello")).unwrap();

        assert!(Message::delete(&conn, message.id, bob.id, "bob").unwrap().is_none());

        let deleted = Message::delete(&conn, message.id, alice.id, "alice").unwrap().unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.deleted_by.as_deref(), Some("alice"));

        let still_there = Message::get_by_id(&conn, message.id).unwrap().unwrap();
        assert!(still_there.deleted);
        assert_eq!(still_there.text, "hello");
    }

    #[test]
    fn search_skips_tombstones() {
        let mut conn = open_test();
        let alice = alice(&conn);
        let kept = Message::create(&mut conn, alice.id, &new_message("Hello World")).unwrap();
        let gone = Message::create(&mut conn, alice.id, &new_message("hello again")).unwrap();
        Message::create(&mut conn, alice.id, &new_message("unrelated")).unwrap();
        Message::delete(&conn, gone.id, alice.id, "alice").unwrap();

        let found = Message::search(&conn, "hello", 50).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, kept.id);

        // LIKE wildcards in user input stay literal.
        assert!(Message::search(&conn, "%", 50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_attachments_are_cleared_once() {
        let mut conn = open_test();
        let alice = alice(&conn);
        let mut new = new_message("look at this");
        new.attachment = Some(InlineAttachment {
            kind: AttachmentKind::Image,
            url: "/u/x.png".to_string(),
            expires_at: Some(Utc::now().naive_utc() - Duration::seconds(1)),
        });
        let message = Message::create(&mut conn, alice.id, &new).unwrap();

        let mut fresh = new_message("still fresh");
        fresh.attachment = Some(InlineAttachment {
            kind: AttachmentKind::Image,
            url: "/u/keep.png".to_string(),
            expires_at: Some(Utc::now().naive_utc() + Duration::hours(1)),
        });
        let fresh = Message::create(&mut conn, alice.id, &fresh).unwrap();

        let store = RecordingStore::default();
        let (cleared, urls) = Message::clean_expired_attachments(&conn).unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(urls, vec!["/u/x.png".to_string()]);
        crate::media::discard_stored(&store, &urls).await;
        assert_eq!(store.deleted(), vec!["/u/x.png".to_string()]);

        let message = Message::get_by_id(&conn, message.id).unwrap().unwrap();
        assert!(message.attachment_url.is_none());
        assert!(message.attachment_type.is_none());
        assert_eq!(message.text, "look at this");

        let untouched = Message::get_by_id(&conn, fresh.id).unwrap().unwrap();
        assert_eq!(untouched.attachment_url.as_deref(), Some("/u/keep.png"));

        // No new expirations: the second sweep is a no-op.
        let (cleared, urls) = Message::clean_expired_attachments(&conn).unwrap();
        assert_eq!(cleared, 0);
        assert!(urls.is_empty());
        crate::media::discard_stored(&store, &urls).await;
        assert_eq!(store.deleted().len(), 1);
    }

    #[test]
    fn stats_ignore_tombstones() {
        let mut conn = open_test();
        let alice = alice(&conn);
        let bob = User::upsert(&conn, "bob", None, UserStatus::Online).unwrap();
        for _ in 0..3 {
            Message::create(&mut conn, alice.id, &new_message("hi")).unwrap();
        }
        let doomed = Message::create(&mut conn, bob.id, &new_message("bye")).unwrap();
        Message::delete(&conn, doomed.id, bob.id, "bob").unwrap();

        let stats = Message::stats(&conn).unwrap();
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.top_users.len(), 1);
        assert_eq!(stats.top_users[0].username, "alice");
        assert_eq!(stats.top_users[0].count, 3);
    }

    #[test]
    fn retention_sweep() {
        let mut conn = open_test();
        let alice = alice(&conn);
        let old = Message::create(&mut conn, alice.id, &new_message("ancient")).unwrap();
        Message::create(&mut conn, alice.id, &new_message("recent")).unwrap();
        let long_ago = Utc::now().naive_utc() - Duration::days(100);
        conn.execute(
            "UPDATE messages SET created_at = ?1 WHERE id = ?2",
            rusqlite::params![long_ago, old.id],
        )
        .unwrap();

        let removed = Message::cleanup_old(&conn, 90).unwrap();
        assert_eq!(removed, 1);
        assert!(Message::get_by_id(&conn, old.id).unwrap().is_none());
    }
}
