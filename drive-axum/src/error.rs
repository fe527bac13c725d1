use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use drive_blob::{ResolvedRange, TransferError};
use serde_json::json;

/// Feathers-style error classes the HTTP boundary can answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotAuthenticated,
    Forbidden,
    NotFound,
    Timeout,
    Conflict,
    RangeNotSatisfiable,
    GeneralError,
    GatewayTimeout,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::RangeNotSatisfiable => 416,
            ErrorKind::GeneralError => 500,
            ErrorKind::GatewayTimeout => 504,
        }
    }

    /// Feathers error `name`
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotAuthenticated => "NotAuthenticated",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::RangeNotSatisfiable => "RangeNotSatisfiable",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::GatewayTimeout => "GatewayTimeout",
        }
    }

    /// Feathers error `className`
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotAuthenticated => "not-authenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RangeNotSatisfiable => "range-not-satisfiable",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::GatewayTimeout => "gateway-timeout",
        }
    }
}

/// Error returned by every handler; renders as
/// `{name, message, code, className}`.
#[derive(Debug)]
pub struct DriveAxumError {
    pub kind: ErrorKind,
    pub message: String,
    /// Total size, for `Content-Range: bytes */size` on 416
    pub unsatisfied_size: Option<u64>,
}

impl DriveAxumError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            unsatisfied_size: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthenticated, message)
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "name": self.kind.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.kind.class_name(),
        })
    }
}

impl From<TransferError> for DriveAxumError {
    fn from(err: TransferError) -> Self {
        let kind = match &err {
            TransferError::Invalid { .. } => ErrorKind::BadRequest,
            TransferError::SessionNotFound { .. } | TransferError::NotFound { .. } => ErrorKind::NotFound,
            TransferError::PermissionDenied { .. } => ErrorKind::Forbidden,
            TransferError::SessionClosed { .. } | TransferError::NotReady { .. } => ErrorKind::Conflict,
            TransferError::RangeNotSatisfiable { size } => {
                let mut out = Self::new(ErrorKind::RangeNotSatisfiable, err.to_string());
                out.unsatisfied_size = Some(*size);
                return out;
            }
            TransferError::Cancelled => ErrorKind::Timeout,
            TransferError::DeadlineExceeded => ErrorKind::GatewayTimeout,
            TransferError::Unavailable { .. }
            | TransferError::Metadata { .. }
            | TransferError::IncompleteStream { .. } => {
                // backend details stay in the logs
                tracing::error!(error = %err, "transfer failed");
                return Self::new(ErrorKind::GeneralError, "Storage backend unavailable");
            }
        };
        Self::new(kind, err.to_string())
    }
}

impl From<anyhow::Error> for DriveAxumError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TransferError>() {
            Ok(transfer) => transfer.into(),
            Err(other) => {
                tracing::error!(error = %other, "request failed");
                Self::new(ErrorKind::GeneralError, "Internal error")
            }
        }
    }
}

impl std::fmt::Display for DriveAxumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind.name(), self.code(), self.message)
    }
}

impl std::error::Error for DriveAxumError {}

impl IntoResponse for DriveAxumError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.to_json())).into_response();

        if let Some(size) = self.unsatisfied_size {
            if let Ok(value) = HeaderValue::from_str(&ResolvedRange::unsatisfied_content_range(size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
                .headers_mut()
                .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_map_to_statuses() {
        let cases = [
            (TransferError::invalid("x"), 400),
            (TransferError::session_not_found("t"), 404),
            (TransferError::not_found("k"), 404),
            (TransferError::permission_denied("no"), 403),
            (TransferError::session_closed("t"), 409),
            (TransferError::NotReady { file_id: "f".into() }, 409),
            (TransferError::RangeNotSatisfiable { size: 10 }, 416),
            (TransferError::Cancelled, 408),
            (TransferError::DeadlineExceeded, 504),
            (TransferError::unavailable(std::io::Error::other("disk")), 500),
        ];
        for (err, code) in cases {
            assert_eq!(DriveAxumError::from(err).code(), code);
        }
    }

    #[test]
    fn backend_details_are_not_leaked() {
        let err = DriveAxumError::from(TransferError::unavailable(std::io::Error::other("secret path /var/x")));
        assert!(!err.message.contains("secret"));
        assert_eq!(err.to_json()["className"], "general-error");
    }

    #[test]
    fn unsatisfiable_response_carries_content_range() {
        let response = DriveAxumError::from(TransferError::RangeNotSatisfiable { size: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */42");
    }
}
