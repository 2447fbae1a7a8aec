use llm::{ProviderError, ProviderErrorKind};
use serde::Serialize;
use thiserror::Error;

/// The stable error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    MissingInput,
    TemplateInvalid,
    UnknownModel,
    UnknownDeployment,
    AuthFailed,
    RateLimited,
    ContextWindowExceeded,
    ContentFiltered,
    ProviderUnavailable,
    ToolBudgetExceeded,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::MissingInput => "missing_input",
            ErrorKind::TemplateInvalid => "template_invalid",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::UnknownDeployment => "unknown_deployment",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ContextWindowExceeded => "context_window_exceeded",
            ErrorKind::ContentFiltered => "content_filtered",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ToolBudgetExceeded => "tool_budget_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed run, with enough context for the error envelope the boundary
/// sends back.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            model: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// A terminal provider failure, surfaced under the matching stable kind.
    pub fn from_terminal_provider_error(error: &ProviderError) -> Self {
        let kind = match error.kind {
            ProviderErrorKind::BadRequest => ErrorKind::InvalidRequest,
            ProviderErrorKind::AuthFailed => ErrorKind::AuthFailed,
            ProviderErrorKind::ContextWindowExceeded => ErrorKind::ContextWindowExceeded,
            ProviderErrorKind::ContentFiltered => ErrorKind::ContentFiltered,
            ProviderErrorKind::RateLimited => ErrorKind::RateLimited,
            ProviderErrorKind::Overloaded
            | ProviderErrorKind::Timeout
            | ProviderErrorKind::Network => ErrorKind::ProviderUnavailable,
            ProviderErrorKind::Internal => ErrorKind::Internal,
        };

        Self::new(kind, error.message.clone()).with_provider(error.provider.clone())
    }
}

impl From<template::TemplateError> for EngineError {
    fn from(error: template::TemplateError) -> Self {
        Self::new(ErrorKind::TemplateInvalid, error.to_string())
    }
}

impl From<router::PlanError> for EngineError {
    fn from(error: router::PlanError) -> Self {
        match &error {
            router::PlanError::UnknownModel(model) => {
                Self::new(ErrorKind::UnknownModel, error.to_string()).with_model(model.clone())
            }
            router::PlanError::NoCapableProvider { model, .. } => {
                Self::new(ErrorKind::ProviderUnavailable, error.to_string()).with_model(model.clone())
            }
        }
    }
}
