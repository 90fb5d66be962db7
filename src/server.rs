use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use serde::Serialize;

#[macro_use]
mod utils;
#[macro_use]
mod error;
mod api;
mod context;
mod cors;
mod database;
mod date_format;
mod events;
mod giphy;
mod logger;
mod media;
mod messages;
mod users;
mod validators;
mod websocket;

use error::AppError;
use events::Hub;

#[derive(Serialize)]
struct HealthReturn {
    status: &'static str,
    users: usize,
    messages: i64,
}

async fn health() -> api::Result {
    let db = database::get().await;
    let users = users::User::get_active_since(&db, users::presence_window())?.len();
    let messages = messages::Message::count(&db)?;
    api::Return::new(HealthReturn {
        status: "ok",
        users,
        messages,
    })
    .build()
}

/// Splits off a route prefix; the remainder has to be empty or a new path
/// segment, so `/api/usersX` never reaches the users router.
fn route_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

async fn router(req: Request<Body>, hub: Arc<Hub>) -> api::Result {
    let path = req.uri().path().to_string();

    if path == "/health" && req.method() == Method::GET {
        return health().await;
    }
    if path == "/api/stats" && req.method() == Method::GET {
        return messages::handlers::stats().await;
    }
    if let Some(rest) = route_prefix(&path, "/api/users") {
        return users::handlers::router(req, rest).await;
    }
    if let Some(rest) = route_prefix(&path, "/api/messages") {
        return messages::handlers::router(req, rest).await;
    }
    if let Some(rest) = route_prefix(&path, "/api/giphy") {
        return giphy::router(req, rest).await;
    }
    if let Some(rest) = route_prefix(&path, "/events") {
        return events::handlers::router(req, rest, &hub).await;
    }
    if path.starts_with("/uploads/") {
        return media::handlers::serve(req).await;
    }
    Err(AppError::missing())
}

async fn handler(req: Request<Body>, hub: Arc<Hub>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    if method == Method::OPTIONS {
        return Ok(cors::preflight_requests(req));
    }
    let response = router(req, hub)
        .await
        .unwrap_or_else(|e| api::error_response(&e));
    let response = cors::allow_origin(response);
    log::debug!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    Ok(response)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    logger::setup_logger(context::debug()).expect("Failed to initialize the logger");

    if let Err(e) = database::init() {
        log::error!("Failed to initialize the database: {}", e);
        std::process::exit(1);
    }
    media::init();

    let hub = Arc::new(Hub::new());
    events::tasks::start(hub.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], context::port()));
    let make_svc = make_service_fn(move |_: &AddrStream| {
        let hub = hub.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| handler(req, hub.clone())))
        }
    });
    let server = Server::bind(&addr).serve(make_svc);
    log::info!("Listening on {}", addr);

    let graceful = server.with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Shutting down");
    });
    if let Err(e) = graceful.await {
        log::error!("Server error: {}", e);
    }
    database::close().await;
}

#[cfg(test)]
mod tests {
    use super::route_prefix;

    #[test]
    fn prefixes_match_whole_segments() {
        assert_eq!(route_prefix("/api/users", "/api/users"), Some(""));
        assert_eq!(route_prefix("/api/users/alice", "/api/users"), Some("/alice"));
        assert_eq!(route_prefix("/api/usersX", "/api/users"), None);
        assert_eq!(route_prefix("/api/message", "/api/messages"), None);
    }
}
