use hyper::header::{self, HeaderValue};
use hyper::{Body, StatusCode};

use super::store::URL_PREFIX;
use crate::api::{self, parse_query};
use crate::error::AppError;
use crate::media::UploadStore;
use crate::messages::api::AttachmentUploadReturn;
use crate::messages::AttachmentKind;
use crate::users::api::UploadQuery;

// Matches the maximum inbound event payload.
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

pub async fn read_limited_body(body: Body, max_size: usize) -> Result<Vec<u8>, AppError> {
    use futures::StreamExt;
    let mut body = body;
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(bytes) = body.next().await {
        let bytes = bytes?;
        if buffer.len() + bytes.len() > max_size {
            return Err(AppError::BadRequest(
                "The maximum file size has been exceeded.".to_string(),
            ));
        }
        buffer.extend_from_slice(&bytes);
    }
    Ok(buffer)
}

fn get_content_type(headers: &header::HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_TYPE)?;
    value.to_str().ok().map(|s| s.to_string())
}

fn attachment_kind(mime_type: &str) -> Result<AttachmentKind, AppError> {
    if mime_type == "image/gif" {
        Ok(AttachmentKind::Gif)
    } else if mime_type.starts_with("image/") {
        Ok(AttachmentKind::Image)
    } else if mime_type.starts_with("video/") {
        Ok(AttachmentKind::Video)
    } else {
        Err(AppError::ValidationFail(format!(
            "Unsupported attachment type: {}",
            mime_type
        )))
    }
}

/// `POST /api/messages/attachment` — raw body in, stored URL out.
pub async fn upload_attachment(req: api::Request) -> api::Result {
    let UploadQuery { filename, mime_type } = parse_query(req.uri())?;
    if filename.len() > 200 {
        return Err(AppError::ValidationFail("The filename is too long".to_string()));
    }
    let mime_type = mime_type
        .or_else(|| get_content_type(req.headers()))
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
    let kind = attachment_kind(&mime_type)?;

    let bytes = read_limited_body(req.into_body(), MAX_UPLOAD_SIZE).await?;
    let attachment_url = super::store().store(&filename, &bytes).await?;
    api::Return::new(AttachmentUploadReturn {
        attachment_url,
        kind,
        filename,
    })
    .status(StatusCode::CREATED)
    .build()
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

fn content_disposition(filename: &str) -> HeaderValue {
    use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
    const SET: &AsciiSet = &CONTROLS.add(b'"').add(b' ');
    let filename = utf8_percent_encode(filename, SET).to_string();
    HeaderValue::from_str(&format!("inline; filename*=utf-8''{}", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"))
}

/// `GET /uploads/<name>` — serves a stored file.
pub async fn serve(req: api::Request) -> api::Result {
    let path = req.uri().path();
    if !path.starts_with(URL_PREFIX) || req.method() != hyper::Method::GET {
        return Err(AppError::missing());
    }
    let file_path = super::store()
        .path_for(path)
        .ok_or(AppError::NotFound("file"))?;
    let bytes = tokio::fs::read(&file_path)
        .await
        .map_err(|_| AppError::NotFound("file"))?;
    let name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    hyper::Response::builder()
        .header(header::CONTENT_TYPE, content_type_for(&file_path))
        .header(header::CONTENT_DISPOSITION, content_disposition(&name))
        .header(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()))
        .header(header::ACCEPT_RANGES, HeaderValue::from_static("none"))
        .body(Body::from(bytes))
        .map_err(unexpected!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_mime() {
        assert_eq!(attachment_kind("image/png").unwrap(), AttachmentKind::Image);
        assert_eq!(attachment_kind("image/gif").unwrap(), AttachmentKind::Gif);
        assert_eq!(attachment_kind("video/mp4").unwrap(), AttachmentKind::Video);
        assert!(attachment_kind("application/pdf").is_err());
    }

    #[tokio::test]
    async fn body_size_cap() {
        let body = Body::from(vec![0u8; 32]);
        assert!(read_limited_body(body, 16).await.is_err());
        let body = Body::from(vec![0u8; 8]);
        assert_eq!(read_limited_body(body, 16).await.unwrap().len(), 8);
    }
}
