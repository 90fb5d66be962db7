//! Types and functions to help building the JSON API surface.
//!
//! Every endpoint answers with an envelope: `{"success": true, ...}` on the
//! happy path, `{"success": false, "error": ...}` otherwise.
use std::result::Result as StdResult;

use hyper::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub type Request = hyper::Request<hyper::Body>;
pub type Result = std::result::Result<hyper::Response<hyper::Body>, AppError>;

#[derive(Serialize, Debug)]
pub struct Return<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    value: T,
    #[serde(skip)]
    status_code: u16,
}

#[derive(Serialize, Debug)]
pub struct ErrorReturn {
    success: bool,
    error: String,
    code: &'static str,
}

impl<T: Serialize> Return<T> {
    pub fn new(value: T) -> Return<T> {
        Return {
            success: true,
            value,
            status_code: 200,
        }
    }

    pub fn status(self, s: StatusCode) -> Return<T> {
        let status_code = s.as_u16();
        Return { status_code, ..self }
    }

    pub fn build(&self) -> Result {
        let bytes = serde_json::to_vec(self).map_err(unexpected!())?;
        json_response(bytes, StatusCode::from_u16(self.status_code).map_err(unexpected!())?)
    }
}

pub fn error_response(e: &AppError) -> Response<Body> {
    let body = ErrorReturn {
        success: false,
        error: e.to_string(),
        code: e.error_code(),
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{\"success\":false}".to_vec());
    Response::builder()
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .status(e.status_code())
        .body(Body::from(bytes))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn json_response(bytes: Vec<u8>, status: StatusCode) -> Result {
    Response::builder()
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .status(status)
        .body(Body::from(bytes))
        .map_err(unexpected!())
}

pub fn parse_query<T>(uri: &hyper::http::Uri) -> StdResult<T, AppError>
where
    for<'de> T: Deserialize<'de>,
{
    let query = uri.query().unwrap_or("");
    serde_urlencoded::from_str(query).map_err(|e| {
        let message = format!("Failed to parse the query in the URI ({})", uri);
        log::debug!("{}: {}", message, e);
        AppError::BadRequest(message)
    })
}

pub async fn parse_body<T>(req: hyper::Request<Body>) -> StdResult<T, AppError>
where
    for<'de> T: Deserialize<'de>,
{
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|_| AppError::BadRequest("Failed to read the request body".to_string()))?;
    serde_json::from_slice(&body).map_err(|_| AppError::BadRequest("Failed to parse the request body".to_string()))
}

#[derive(Deserialize, Debug, Eq, PartialEq)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        #[derive(Serialize)]
        struct Payload {
            users: Vec<String>,
        }
        let r = Return::new(Payload { users: vec!["alice".to_string()] });
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["users"][0], "alice");

        let e = error_response(&AppError::NotFound("user"));
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn parse_limit_query() {
        let uri: hyper::http::Uri = "/api/messages?limit=42".parse().unwrap();
        let q: LimitQuery = parse_query(&uri).unwrap();
        assert_eq!(q.limit, Some(42));
        let uri: hyper::http::Uri = "/api/messages".parse().unwrap();
        let q: LimitQuery = parse_query(&uri).unwrap();
        assert_eq!(q.limit, None);
    }
}
