use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use drive_blob::{ByteRange, OwnerId, TransferCtx};

use crate::{DriveAxumError, TransferState};

pub const OWNER_HEADER: &str = "x-owner-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const FILE_NAME_HEADER: &str = "x-file-name";
pub const FOLDER_HEADER: &str = "x-folder-id";

/// Caller identity plus a request-scoped transfer context.
///
/// Rejects with 401 when the identity header is missing.
#[derive(Debug, Clone)]
pub struct RequestCtx(pub TransferCtx);

impl FromRequestParts<TransferState> for RequestCtx {
    type Rejection = DriveAxumError;

    async fn from_request_parts(parts: &mut Parts, state: &TransferState) -> Result<Self, Self::Rejection> {
        let owner = header_str(&parts.headers, OWNER_HEADER)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DriveAxumError::not_authenticated("Missing x-owner-id header"))?;

        Ok(Self(transfer_ctx(&parts.headers, state, OwnerId::new(owner))))
    }
}

/// Build the transfer context for a request acting as `owner`
pub fn transfer_ctx(headers: &HeaderMap, state: &TransferState, owner: OwnerId) -> TransferCtx {
    let mut ctx = TransferCtx::new(owner).with_cancellation(state.shutdown.child_token());
    if let Some(id) = header_str(headers, REQUEST_ID_HEADER) {
        ctx = ctx.with_request_id(id.to_string());
    }
    if let Some(timeout) = state.adapter.config().request_timeout {
        ctx = ctx.with_timeout(timeout);
    }
    ctx
}

/// Requested byte range, if the `Range` header parses
pub fn range_from_headers(headers: &HeaderMap) -> Option<ByteRange> {
    header_str(headers, header::RANGE.as_str()).and_then(ByteRange::parse_header)
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `attachment; filename="..."` with quotes and control characters dropped
pub fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn range_header_is_optional_and_permissive() {
        let mut headers = HeaderMap::new();
        assert_eq!(range_from_headers(&headers), None);

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=10-"));
        assert_eq!(range_from_headers(&headers), Some(ByteRange::from_start(10)));

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=oops"));
        assert_eq!(range_from_headers(&headers), None);
    }

    #[test]
    fn disposition_strips_quotes() {
        assert_eq!(content_disposition("a\"b.txt"), "attachment; filename=\"ab.txt\"");
    }
}
