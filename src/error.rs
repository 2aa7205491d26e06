// [business] Enrollment error taxonomy; only `IntoResponse` below knows about HTTP status codes

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// Status kinds the enrollment flow can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    Conflict,
    Gone,
    LengthRequired,
    ExpectationFailed,
    InternalServerError,
}

impl StatusKind {
    pub const ALL: [StatusKind; 11] = [
        StatusKind::BadRequest,
        StatusKind::Unauthorized,
        StatusKind::Forbidden,
        StatusKind::NotFound,
        StatusKind::MethodNotAllowed,
        StatusKind::NotAcceptable,
        StatusKind::Conflict,
        StatusKind::Gone,
        StatusKind::LengthRequired,
        StatusKind::ExpectationFailed,
        StatusKind::InternalServerError,
    ];

    pub const fn code(self) -> u16 {
        match self {
            StatusKind::BadRequest => 400,
            StatusKind::Unauthorized => 401,
            StatusKind::Forbidden => 403,
            StatusKind::NotFound => 404,
            StatusKind::MethodNotAllowed => 405,
            StatusKind::NotAcceptable => 406,
            StatusKind::Conflict => 409,
            StatusKind::Gone => 410,
            StatusKind::LengthRequired => 411,
            StatusKind::ExpectationFailed => 417,
            StatusKind::InternalServerError => 500,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            StatusKind::BadRequest => "Bad Request",
            StatusKind::Unauthorized => "Unauthorized",
            StatusKind::Forbidden => "Forbidden",
            StatusKind::NotFound => "Not Found",
            StatusKind::MethodNotAllowed => "Method Not Allowed",
            StatusKind::NotAcceptable => "Not Acceptable",
            StatusKind::Conflict => "Conflict",
            StatusKind::Gone => "Gone",
            StatusKind::LengthRequired => "Length Required",
            StatusKind::ExpectationFailed => "Expectation Failed",
            StatusKind::InternalServerError => "Internal Server Error",
        }
    }

    /// Unrecognized codes fall back to 500.
    pub fn from_code(code: u16) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .unwrap_or(StatusKind::InternalServerError)
    }

    pub fn status_code(self) -> StatusCode {
        StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Which short-lived credential an expiry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    AuthorizationCode,
    AccessToken,
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::AuthorizationCode => f.write_str("Authorization code"),
            Credential::AccessToken => f.write_str("Access token"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("Invalid realm configuration: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Authentication required: {reason}")]
    AuthRequired {
        reason: String,
        login_url: Option<String>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("Unknown client: {0}")]
    InvalidClient(String),

    #[error("Redirect URI is not registered for this client")]
    InvalidRedirect,

    #[error("Scope not permitted for this client: {0}")]
    InvalidScope(String),

    #[error("Authorization code already used")]
    CodeAlreadyUsed,

    #[error("{0} has expired")]
    Expired(Credential),

    #[error("Client does not match the authorization code")]
    ClientMismatch,

    #[error("Redirect URI does not match the authorization code")]
    RedirectMismatch,

    #[error("PKCE verification failed")]
    PkceMismatch,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed certificate request: {0}")]
    MalformedRequest(String),

    #[error("Requested subject {requested} does not match {expected}")]
    SubjectMismatch { requested: String, expected: String },

    #[error("Scope {0} is required for certificate issuance")]
    ScopeDenied(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = EnrollError> = std::result::Result<T, E>;

impl EnrollError {
    pub fn auth_required(reason: impl Into<String>) -> Self {
        EnrollError::AuthRequired {
            reason: reason.into(),
            login_url: None,
        }
    }

    pub fn status_kind(&self) -> StatusKind {
        match self {
            EnrollError::Config(_) | EnrollError::Storage(_) | EnrollError::Internal(_) => {
                StatusKind::InternalServerError
            }
            EnrollError::NotFound(_) => StatusKind::NotFound,
            EnrollError::AuthRequired { .. } | EnrollError::InvalidSignature => {
                StatusKind::Unauthorized
            }
            EnrollError::BadRequest(_)
            | EnrollError::InvalidClient(_)
            | EnrollError::InvalidRedirect
            | EnrollError::InvalidScope(_)
            | EnrollError::ClientMismatch
            | EnrollError::RedirectMismatch
            | EnrollError::PkceMismatch
            | EnrollError::MalformedRequest(_) => StatusKind::BadRequest,
            EnrollError::CodeAlreadyUsed => StatusKind::Conflict,
            EnrollError::Expired(Credential::AuthorizationCode) => StatusKind::Gone,
            EnrollError::Expired(Credential::AccessToken) => StatusKind::Unauthorized,
            EnrollError::SubjectMismatch { .. } | EnrollError::ScopeDenied(_) => {
                StatusKind::Forbidden
            }
        }
    }

    /// Message safe to show to the caller; server faults stay generic.
    pub fn public_message(&self) -> String {
        match self.status_kind() {
            StatusKind::InternalServerError => StatusKind::InternalServerError
                .reason()
                .to_string(),
            _ => self.to_string(),
        }
    }

    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            EnrollError::InvalidSignature
                | EnrollError::CodeAlreadyUsed
                | EnrollError::SubjectMismatch { .. }
        )
    }
}

impl From<sqlx::Error> for EnrollError {
    fn from(err: sqlx::Error) -> Self {
        EnrollError::Storage(err.to_string())
    }
}

impl From<rcgen::Error> for EnrollError {
    fn from(err: rcgen::Error) -> Self {
        EnrollError::Internal(format!("certificate signing failed: {}", err))
    }
}

impl IntoResponse for EnrollError {
    fn into_response(self) -> Response {
        let kind = self.status_kind();
        if kind == StatusKind::InternalServerError {
            error!(error = ?self, "Request failed");
        } else if self.is_security_event() {
            warn!(target: "security", error = %self, "Request rejected");
        }

        if let EnrollError::AuthRequired {
            login_url: Some(location),
            ..
        } = &self
        {
            return (
                StatusCode::FOUND,
                [(header::LOCATION, location.clone())],
                format!("302 Found\r\n\r\n{}\r\n", location),
            )
                .into_response();
        }

        let body = format!("{}\r\n\r\n{}\r\n", kind, self.public_message());
        (
            kind.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
