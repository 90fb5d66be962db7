//! Persistence gateway: owns the embedded SQLite handle and the schema.
//!
//! All access is serialized through one shared connection; statement reuse
//! goes through `prepare_cached`. Schema setup is idempotent: tables are
//! created if absent, and columns added in later versions are detected with
//! `PRAGMA table_info` before an `ALTER TABLE` is issued.
use once_cell::sync::OnceCell;
use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};

use crate::context;

static DATABASE: OnceCell<Mutex<Connection>> = OnceCell::new();

pub async fn get() -> MutexGuard<'static, Connection> {
    DATABASE
        .get()
        .expect("The database is not initialized")
        .lock()
        .await
}

/// Opens the database file and applies pending migrations.
///
/// Schema errors here are fatal: the server must not start half-initialized.
pub fn init() -> Result<(), rusqlite::Error> {
    let path = context::database_path();
    if let Some(dir) = std::path::Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).expect("Failed to create the database directory");
        }
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    migrate(&conn)?;
    log::info!("Database ready at {}", path);
    DATABASE.set(Mutex::new(conn)).ok();
    Ok(())
}

/// Closes the shared handle. Called on shutdown; a no-op when never opened.
pub async fn close() {
    if let Some(db) = DATABASE.get() {
        // rusqlite flushes on drop; taking the lock waits out in-flight writes.
        let _guard = db.lock().await;
        log::info!("Database connection released");
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut statement = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

const CREATE_USERS: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    display_name TEXT,
    pronouns TEXT,
    bio TEXT,
    custom_color TEXT,
    avatar_url TEXT,
    banner_url TEXT,
    status TEXT NOT NULL DEFAULT 'offline',
    status_text TEXT,
    timezone TEXT DEFAULT 'UTC',
    dark_mode INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    last_seen TEXT NOT NULL
)";

const CREATE_MESSAGES: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    has_markdown INTEGER DEFAULT 0,
    edited INTEGER DEFAULT 0,
    edited_at TEXT,
    deleted INTEGER DEFAULT 0,
    deleted_by TEXT,
    deleted_at TEXT,
    attachment_type TEXT,
    attachment_url TEXT,
    attachment_expires_at TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
)";

const CREATE_ATTACHMENTS: &str = "
CREATE TABLE IF NOT EXISTS attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    url TEXT NOT NULL,
    name TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
)";

// Columns added after the first released schema, checked one by one so
// upgrading an old database file is a sequence of additive ALTERs.
const USER_UPGRADES: &[(&str, &str)] = &[
    ("display_name", "TEXT"),
    ("pronouns", "TEXT"),
    ("bio", "TEXT"),
    ("custom_color", "TEXT"),
    ("avatar_url", "TEXT"),
    ("banner_url", "TEXT"),
    ("status_text", "TEXT"),
    ("timezone", "TEXT DEFAULT 'UTC'"),
    ("dark_mode", "INTEGER DEFAULT 0"),
];

const MESSAGE_UPGRADES: &[(&str, &str)] = &[
    ("has_markdown", "INTEGER DEFAULT 0"),
    ("edited", "INTEGER DEFAULT 0"),
    ("edited_at", "TEXT"),
    ("deleted", "INTEGER DEFAULT 0"),
    ("deleted_by", "TEXT"),
    ("deleted_at", "TEXT"),
    ("attachment_type", "TEXT"),
    ("attachment_url", "TEXT"),
    ("attachment_expires_at", "TEXT"),
];

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", &"ON")?;
    conn.execute(CREATE_USERS, [])?;
    conn.execute(CREATE_MESSAGES, [])?;
    conn.execute(CREATE_ATTACHMENTS, [])?;

    for (table, upgrades) in [("users", USER_UPGRADES), ("messages", MESSAGE_UPGRADES)] {
        for (column, kind) in upgrades {
            if !has_column(conn, table, column)? {
                log::info!("Adding column {}.{}", table, column);
                conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, kind), [])?;
            }
        }
    }

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
         CREATE INDEX IF NOT EXISTS idx_messages_user_id ON messages(user_id);
         CREATE INDEX IF NOT EXISTS idx_messages_expires ON messages(attachment_expires_at);
         CREATE INDEX IF NOT EXISTS idx_attachments_message_id ON attachments(message_id);",
    )?;
    Ok(())
}

#[cfg(test)]
pub fn open_test() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let conn = open_test();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert!(has_column(&conn, "messages", "attachment_expires_at").unwrap());
        assert!(!has_column(&conn, "users", "password_hash").unwrap());
    }

    #[test]
    fn upgrades_old_schema() {
        let conn = Connection::open_in_memory().unwrap();
        // A first-generation database: bare users table, no messages yet.
        conn.execute(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                status TEXT NOT NULL DEFAULT 'offline',
                created_at TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )",
            [],
        )
        .unwrap();
        migrate(&conn).unwrap();
        assert!(has_column(&conn, "users", "pronouns").unwrap());
        assert!(has_column(&conn, "messages", "deleted_by").unwrap());
    }
}
