use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use derive_more::Display;
use diesel::r2d2;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::convert::From;

use crate::api::ApiResponse;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Display)]
pub enum Error {
    /// Malformed or missing input.
    #[display(fmt = "{}", _0)]
    Validation(String),

    /// No session, round, drink or user matched.
    #[display(fmt = "{} not found", _0)]
    NotFound(&'static str),

    /// A state machine precondition was violated.
    #[display(fmt = "{}", _0)]
    InvalidTransition(String),

    #[display(fmt = "round {} is not active", _0)]
    RoundNotActive(i32),

    #[display(fmt = "user {} is not a participant of session {}", user_id, session_id)]
    NotAParticipant { session_id: i32, user_id: i32 },

    #[display(fmt = "session {} is already completed", _0)]
    SessionClosed(i32),

    /// Subscription to a channel was refused.
    #[display(fmt = "not allowed to subscribe to {}", _0)]
    Forbidden(String),

    /// The request did not identify the acting user.
    #[display(fmt = "missing or invalid actor")]
    Unauthenticated,

    /// A unique or foreign-key constraint rejected the write.
    #[display(fmt = "constraint violated: {}", _0)]
    Constraint(String),

    #[display(fmt = "configuration error: {}", _0)]
    Config(String),

    #[display(fmt = "migration failed: {}", _0)]
    Migration(String),

    #[display(fmt = "database error: {}", _0)]
    DieselError(DieselError),

    #[display(fmt = "connection pool error: {}", _0)]
    PoolError(r2d2::PoolError),

    #[display(fmt = "blocking task was canceled")]
    Canceled,

    #[display(fmt = "{}", _0)]
    Internal(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DieselError(e) => Some(e),
            Self::PoolError(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    pub fn validation<S: Into<String>>(msg: S) -> Error {
        Error::Validation(msg.into())
    }

    pub fn invalid_transition<S: Into<String>>(msg: S) -> Error {
        Error::InvalidTransition(msg.into())
    }

    /// Rejections are the caller's fault; everything else is ours.
    pub fn is_rejection(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition(_)
            | Self::RoundNotActive(_)
            | Self::SessionClosed(_)
            | Self::Constraint(_) => StatusCode::CONFLICT,
            Self::NotAParticipant { .. } | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Config(_)
            | Self::Migration(_)
            | Self::DieselError(_)
            | Self::PoolError(_)
            | Self::Canceled
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = if self.is_rejection() {
            ApiResponse::<()>::rejected(self.to_string())
        } else {
            error!("{}", self);
            ApiResponse::<()>::failed("internal server error")
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<DieselError> for Error {
    fn from(e: DieselError) -> Error {
        match e {
            DieselError::NotFound => Error::NotFound("record"),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
            | DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info)
            | DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                Error::Constraint(info.message().to_owned())
            }
            e => Error::DieselError(e),
        }
    }
}

impl From<r2d2::PoolError> for Error {
    fn from(e: r2d2::PoolError) -> Error {
        Error::PoolError(e)
    }
}

impl From<actix_web::error::BlockingError> for Error {
    fn from(_: actix_web::error::BlockingError) -> Error {
        Error::Canceled
    }
}
