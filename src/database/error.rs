use std::fmt::{self, Display};

use serde::Serialize;
use serde_json::{json, Value};
use warp::{http::StatusCode, reject::Reject};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Conflict,
    NotFound,
    Unauthorized,
    Forbidden,
    MethodNotAllowed,
    InternalServerError,
}

impl ErrorKind {
    pub fn new(self, info: &str) -> Error {
        Error {
            kind: self,
            info: Some(info.to_string()),
            field: None,
        }
    }

    /// Error bound to a single input field, e.g. `cooking_time`.
    pub fn field(self, field: &'static str, info: &str) -> Error {
        Error {
            kind: self,
            info: Some(info.to_string()),
            field: Some(field),
        }
    }

    pub fn default(self) -> Error {
        Error {
            kind: self,
            info: None,
            field: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            // The public API reports relation conflicts as bad requests
            ErrorKind::InvalidRequest | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "Invalid request",
            ErrorKind::Conflict => "Already exists",
            ErrorKind::NotFound => "Not found",
            ErrorKind::Unauthorized => "Authentication credentials were not provided",
            ErrorKind::Forbidden => "You don't have permission to perform this action",
            ErrorKind::MethodNotAllowed => "Method not allowed",
            ErrorKind::InternalServerError => "Internal server error",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub info: Option<String>,
    pub field: Option<&'static str>,
}

impl Error {
    pub fn message(&self) -> &str {
        self.info.as_deref().unwrap_or(self.kind.message())
    }

    /// JSON body sent back to the client.
    pub fn body(&self) -> Value {
        match self.field {
            Some(field) => json!({ "errors": self.message(), "field": field }),
            None => json!({ "errors": self.message() }),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "{:?} ({field}): {}", self.kind, self.message()),
            None => write!(f, "{:?}: {}", self.kind, self.message()),
        }
    }
}

impl std::error::Error for Error {}
impl Reject for Error {}

/// Name of the `CHECK (user_id <> author_id)` constraint on subscriptions.
pub const SELF_SUBSCRIPTION_CONSTRAINT: &str = "subscriptions_no_self";

pub struct QueryError {
    kind: ErrorKind,
    info: String,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self {
            kind: ErrorKind::InternalServerError,
            info,
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Database(e) => {
                let kind = match e.code().as_deref() {
                    // unique_violation
                    Some("23505") => ErrorKind::Conflict,
                    // check_violation
                    Some("23514") if e.constraint() == Some(SELF_SUBSCRIPTION_CONSTRAINT) => {
                        ErrorKind::Conflict
                    }
                    // check_violation, foreign_key_violation
                    Some("23514") | Some("23503") => ErrorKind::InvalidRequest,
                    _ => ErrorKind::InternalServerError,
                };
                Self {
                    kind,
                    info: format!("{e}"),
                }
            }
            sqlx::Error::RowNotFound => Self {
                kind: ErrorKind::NotFound,
                info: String::from("RowNotFound"),
            },
            sqlx::Error::Configuration(e) => Self::new(format!("{e}")),
            sqlx::Error::Io(e) => Self::new(format!("{e}")),
            sqlx::Error::Tls(e) => Self::new(format!("{e}")),
            sqlx::Error::Protocol(e) => Self::new(e),
            sqlx::Error::ColumnNotFound(e) => Self::new(e),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(format!("Column decode {index} ({source})"))
            }
            sqlx::Error::Decode(e) => Self::new(format!("{e}")),
            sqlx::Error::PoolTimedOut => Self::new(String::from("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(String::from("Pool closed")),
            sqlx::Error::Migrate(e) => Self::new(format!("{e}")),
            e => Self::new(format!("{e}")),
        }
    }
}

impl From<QueryError> for Error {
    fn from(value: QueryError) -> Self {
        if value.kind == ErrorKind::InternalServerError {
            log::error!("Query failed: {}", value.info);
        }
        value.kind.new(&value.info)
    }
}

pub struct CacheError {
    info: String,
}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        Self {
            info: format!("{:?} - {:?}", value.code(), value.detail()),
        }
    }
}

impl From<CacheError> for Error {
    fn from(value: CacheError) -> Self {
        ErrorKind::InternalServerError.new(&value.info)
    }
}

#[derive(Debug)]
pub struct TypeError {
    info: String,
}

impl TypeError {
    pub fn new(info: &str) -> Self {
        Self {
            info: info.to_string(),
        }
    }
}

impl Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.info)
    }
}

impl std::error::Error for TypeError {}

impl From<TypeError> for Error {
    fn from(value: TypeError) -> Self {
        ErrorKind::InvalidRequest.new(&value.info)
    }
}
