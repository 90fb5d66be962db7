//! A thin proxy to the Giphy REST API so the client never sees the API key.
//!
//! The provider is best-effort: when the upstream call fails, or no key is
//! configured, the endpoints answer with an empty result set instead of
//! turning a chat room into an outage.
use hyper::Method;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::api::{self, parse_query};
use crate::context;
use crate::error::AppError;

const GIPHY_API: &str = "https://api.giphy.com/v1/gifs";
const DEFAULT_LIMIT: i64 = 24;

static CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

#[derive(Debug, Deserialize)]
pub struct GifQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GifListReturn {
    pub gifs: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GiphyPage {
    #[serde(default)]
    data: serde_json::Value,
}

async fn fetch(url: &str) -> Result<serde_json::Value, AppError> {
    let page: GiphyPage = CLIENT
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?
        .error_for_status()
        .map_err(|e| AppError::Upstream(e.to_string()))?
        .json()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    Ok(page.data)
}

async fn fetch_or_empty(url: String) -> serde_json::Value {
    match fetch(&url).await {
        Ok(data) => data,
        Err(e) => {
            log::warn!("The GIF provider is unavailable: {}", e);
            serde_json::Value::Array(Vec::new())
        }
    }
}

fn empty() -> api::Result {
    api::Return::new(GifListReturn {
        gifs: serde_json::Value::Array(Vec::new()),
    })
    .build()
}

async fn search(req: api::Request) -> api::Result {
    let GifQuery { q, limit, offset } = parse_query(req.uri())?;
    let q = q.unwrap_or_default();
    if q.trim().is_empty() {
        return Err(AppError::BadRequest("The search query is empty".to_string()));
    }
    let key = match context::giphy_api_key() {
        Some(key) => key,
        None => return empty(),
    };
    let url = format!(
        "{}/search?api_key={}&q={}&limit={}&offset={}",
        GIPHY_API,
        key,
        percent_encoding::utf8_percent_encode(&q, percent_encoding::NON_ALPHANUMERIC),
        limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 50),
        offset.unwrap_or(0).max(0),
    );
    let gifs = fetch_or_empty(url).await;
    api::Return::new(GifListReturn { gifs }).build()
}

async fn trending(req: api::Request) -> api::Result {
    let GifQuery { limit, offset, .. } = parse_query(req.uri())?;
    let key = match context::giphy_api_key() {
        Some(key) => key,
        None => return empty(),
    };
    let url = format!(
        "{}/trending?api_key={}&limit={}&offset={}",
        GIPHY_API,
        key,
        limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 50),
        offset.unwrap_or(0).max(0),
    );
    let gifs = fetch_or_empty(url).await;
    api::Return::new(GifListReturn { gifs }).build()
}

pub async fn router(req: api::Request, path: &str) -> api::Result {
    match (path, req.method().clone()) {
        ("/search", Method::GET) => search(req).await,
        ("/trending", Method::GET) => trending(req).await,
        _ => Err(AppError::missing()),
    }
}
