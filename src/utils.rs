macro_rules! regex {
    ($pattern: expr) => {{
        use once_cell::sync::OnceCell;
        use regex::Regex;
        static CELL: OnceCell<Regex> = OnceCell::new();
        CELL.get_or_init(|| Regex::new($pattern).unwrap())
    }};
}

/// Milliseconds since the Unix epoch.
pub fn timestamp() -> i64 {
    use std::time::SystemTime;
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH!");
    now.as_millis() as i64
}

pub fn sha1(data: &[u8]) -> impl AsRef<[u8]> {
    use ring::digest;
    digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data)
}
