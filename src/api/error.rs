use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, error};
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::DbError;
use crate::models::requests::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    DuplicateTable,
    Programming,
    TypeMismatch,
    InvalidDefault,
    InvalidTypeOption,
    InvalidTypeCast,
    UndefinedFunction,
    DynamicDefault,
    Api,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::DuplicateTable => "DuplicateTableError",
            ErrorKind::Programming => "ProgrammingError",
            ErrorKind::TypeMismatch => "TypeMismatchError",
            ErrorKind::InvalidDefault => "InvalidDefaultError",
            ErrorKind::InvalidTypeOption => "InvalidTypeOptionError",
            ErrorKind::InvalidTypeCast => "InvalidTypeCastError",
            ErrorKind::UndefinedFunction => "UndefinedFunctionError",
            ErrorKind::DynamicDefault => "DynamicDefaultError",
            ErrorKind::Api => "APIError",
        }
    }

    pub fn default_status(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Api => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// One entry of an error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    pub field: Option<String>,
    pub detail: Value,
}

#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    status: StatusCode,
    message: String,
    field: Option<String>,
    detail: Value,
    field_errors: Vec<FieldError>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            message: message.into(),
            field: None,
            detail: json!({}),
            field_errors: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    /// A malformed request payload, one entry per offending field.
    pub fn validation(errors: Vec<FieldError>) -> Self {
        let message = errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "Invalid request.".to_string());
        Self {
            field_errors: errors,
            ..Self::new(ErrorKind::Validation, message)
        }
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, "Not found.")
    }

    /// An unclassified database execution failure.
    pub fn programming(err: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Programming, err.to_string())
    }

    /// The catch-all for failures no operation expects.
    pub fn unexpected(err: DbError) -> Self {
        error!("unexpected failure: {}", err);
        Self::new(ErrorKind::Api, "An unexpected error occurred.")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    fn into_body(self) -> Vec<ErrorResponse> {
        let code = self.kind.code();
        if self.field_errors.is_empty() {
            return vec![ErrorResponse {
                code,
                message: self.message,
                field: self.field,
                detail: self.detail,
            }];
        }
        self.field_errors
            .into_iter()
            .map(|e| ErrorResponse {
                code,
                message: e.message,
                field: e.field,
                detail: json!({}),
            })
            .collect()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        if status.is_server_error() {
            error!("{} ({})", self, status);
        } else {
            debug!("{} ({})", self, status);
        }
        (status, Json(self.into_body())).into_response()
    }
}
