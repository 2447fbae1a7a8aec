use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use engine::{EngineError, ErrorKind};
use serde::Serialize;

/// The error envelope every endpoint returns:
/// `{"error": {"kind", "message", "provider?", "model?", "request_id"}}`.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorDetails {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub request_id: String,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    inner: EngineError,
    request_id: String,
}

impl ApiError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::from(EngineError::new(kind, message))
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub(crate) fn status_code(&self) -> StatusCode {
        status_for(self.inner.kind)
    }

    pub(crate) fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetails {
                kind: self.inner.kind.as_str(),
                message: self.inner.message.clone(),
                provider: self.inner.provider.clone(),
                model: self.inner.model.clone(),
                request_id: self.request_id.clone(),
            },
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(inner: EngineError) -> Self {
        Self {
            inner,
            request_id: format!("req_{}", uuid_like()),
        }
    }
}

impl From<store::StoreError> for ApiError {
    fn from(error: store::StoreError) -> Self {
        match &error {
            store::StoreError::VersionNotFound(_) => Self::new(ErrorKind::InvalidRequest, error.to_string()),
            _ => Self::new(ErrorKind::Internal, error.to_string()),
        }
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest
        | ErrorKind::MissingInput
        | ErrorKind::TemplateInvalid
        | ErrorKind::ContextWindowExceeded => StatusCode::BAD_REQUEST,
        ErrorKind::AuthFailed => StatusCode::UNAUTHORIZED,
        ErrorKind::ContentFiltered => StatusCode::FORBIDDEN,
        ErrorKind::UnknownModel | ErrorKind::UnknownDeployment => StatusCode::NOT_FOUND,
        ErrorKind::RateLimited | ErrorKind::ToolBudgetExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ProviderUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            log::error!("request failed: {}", self.inner);
        } else {
            log::debug!("request rejected: {}", self.inner);
        }

        (status, Json(self.body())).into_response()
    }
}

/// Short random hex id for correlating error reports with logs. Not a run
/// id; those come from the engine.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();

    format!("{:08x}{:04x}", nanos, std::process::id() as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_sensible_statuses() {
        assert_eq!(status_for(ErrorKind::InvalidRequest), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::MissingInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::AuthFailed), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::UnknownModel), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::UnknownDeployment), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::ProviderUnavailable), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn body_carries_the_stable_kind_string() {
        let error = ApiError::new(ErrorKind::TemplateInvalid, "unterminated tag");
        let body = serde_json::to_value(error.body()).unwrap();

        assert_eq!(body["error"]["kind"], serde_json::json!("template_invalid"));
        assert_eq!(body["error"]["message"], serde_json::json!("unterminated tag"));
        assert!(body["error"]["request_id"].as_str().unwrap().starts_with("req_"));
    }
}
