use std::env;

use once_cell::sync::OnceCell;

static DEBUG: OnceCell<bool> = OnceCell::new();
static DATABASE_PATH: OnceCell<String> = OnceCell::new();
static UPLOADS_DIR: OnceCell<String> = OnceCell::new();

fn env_bool<T: AsRef<str>>(s: T) -> bool {
    let s = s.as_ref().trim();
    !(s.is_empty() || s == "0" || s.to_ascii_lowercase() == "false")
}

pub fn debug() -> bool {
    *DEBUG.get_or_init(|| env::var("DEBUG").map(env_bool).unwrap_or(false))
}

pub fn port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001)
}

pub fn database_path() -> &'static str {
    DATABASE_PATH.get_or_init(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "data/chat.db".to_string()))
}

pub fn uploads_dir() -> &'static str {
    UPLOADS_DIR.get_or_init(|| env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string()))
}

pub fn giphy_api_key() -> Option<String> {
    env::var("GIPHY_API_KEY").ok()
}
