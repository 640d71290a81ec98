//! The HTTP-facing error envelope. Every domain error funnels into
//! [`AppError`], which renders a stable `{error, message}` JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use silo_core::adminsql::AdminSqlError;
use silo_core::backup::BackupError;
use silo_core::broker::BrokerError;
use silo_core::crud::CrudError;
use silo_core::crypto::CryptoError;
use silo_core::keys::KeyError;
use silo_core::provision::ProvisionError;
use silo_core::router::RouterError;
use silo_core::scheduler::SchedulerError;
use silo_core::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too many requests")]
    TooManyRequests,

    #[error("cryptographic operation failed")]
    Crypto,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("denied: {0}")]
    Denied(String),

    #[error("request timed out")]
    Timeout,

    #[error("object store upstream error: {0}")]
    UpstreamObjectStore(String),

    #[error("database upstream error: {0}")]
    UpstreamDatabase(String),

    #[error("internal error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(rename = "statusCode")]
    status_code: u16,
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::TooManyRequests => "too_many_requests",
            Self::Crypto => "crypto",
            Self::Schema(_) => "schema",
            Self::Denied(_) => "denied",
            Self::Timeout => "timeout",
            Self::UpstreamObjectStore(_) => "upstream_object_store",
            Self::UpstreamDatabase(_) => "upstream_database",
            Self::Internal => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Schema(_) | Self::Denied(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Crypto
            | Self::UpstreamObjectStore(_)
            | Self::UpstreamDatabase(_)
            | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict { detail } => Self::Conflict(detail),
            StoreError::Database(e) => {
                tracing::error!(error = %e, "store database error");
                Self::UpstreamDatabase(e.to_string())
            }
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        tracing::error!(error = %err, "crypto error");
        Self::Crypto
    }
}

impl From<RouterError> for AppError {
    fn from(err: RouterError) -> Self {
        tracing::error!(error = %err, "router error");
        Self::UpstreamDatabase(err.to_string())
    }
}

impl From<KeyError> for AppError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::NoMatch => Self::Unauthorized,
            KeyError::Store(e) => e.into(),
        }
    }
}

impl From<CrudError> for AppError {
    fn from(err: CrudError) -> Self {
        match err {
            CrudError::InvalidTable(t) => Self::Schema(format!("invalid table: {t}")),
            CrudError::UnknownTable(t) => Self::Schema(format!("unknown table: {t}")),
            CrudError::UnknownColumn { table, column } => {
                Self::Schema(format!("unknown column '{column}' on '{table}'"))
            }
            CrudError::UnsupportedOperator(op) => Self::BadRequest(format!("unsupported operator: {op}")),
            CrudError::LimitOutOfRange { max, got } => {
                Self::BadRequest(format!("limit must be 1..={max}, got {got}"))
            }
            CrudError::UnscopedMutation => {
                Self::BadRequest("update/delete require at least one filter".to_owned())
            }
            CrudError::InsertRowCountOutOfRange { max } => {
                Self::BadRequest(format!("insert accepts 1..={max} rows"))
            }
            CrudError::MalformedRow(reason) => Self::BadRequest(reason),
            CrudError::Database(e) => {
                tracing::error!(error = %e, "crud database error");
                Self::UpstreamDatabase(e.to_string())
            }
        }
    }
}

impl From<AdminSqlError> for AppError {
    fn from(err: AdminSqlError) -> Self {
        match err {
            AdminSqlError::MultipleStatements | AdminSqlError::Empty => {
                Self::BadRequest(err.to_string())
            }
            AdminSqlError::Denied { .. } => Self::Denied(err.to_string()),
            AdminSqlError::Database(e) => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::UnknownLogicalBucket(_) => Self::NotFound,
            BrokerError::InvalidObjectKey(reason) => Self::BadRequest(reason),
            BrokerError::TooLarge { cap } => {
                Self::BadRequest(format!("object exceeds the {cap}-byte cap"))
            }
            BrokerError::Storage(e) => {
                tracing::error!(error = %e, "object store error");
                Self::UpstreamObjectStore(e.to_string())
            }
            BrokerError::Store(e) => e.into(),
        }
    }
}

impl From<ProvisionError> for AppError {
    fn from(err: ProvisionError) -> Self {
        tracing::error!(error = %err, "provisioning error");
        match err {
            ProvisionError::Store(e) => e.into(),
            ProvisionError::Crypto(e) => e.into(),
            ProvisionError::Broker(e) => e.into(),
            ProvisionError::Key(e) => e.into(),
            ProvisionError::DatabaseSetup { .. } => Self::Internal,
        }
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        tracing::error!(error = %err, "backup engine error");
        match err {
            BackupError::Store(e) => e.into(),
            BackupError::Crypto(e) => e.into(),
            BackupError::Router(e) => e.into(),
            BackupError::Storage(e) => Self::UpstreamObjectStore(e.to_string()),
            BackupError::MissingProjectId | BackupError::MissingTableName => {
                Self::BadRequest(err.to_string())
            }
            BackupError::Database(_) | BackupError::Subprocess { .. } | BackupError::Io(_) => {
                Self::Internal
            }
        }
    }
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        tracing::error!(error = %err, "scheduler error");
        match err {
            SchedulerError::Store(e) => e.into(),
            SchedulerError::Crypto(e) => e.into(),
            SchedulerError::InvalidCronExpr { .. } | SchedulerError::InvalidTimezone(_) => {
                Self::BadRequest(err.to_string())
            }
            SchedulerError::UnknownAction(_) | SchedulerError::Http(_) => Self::Internal,
            SchedulerError::MissingProjectId { .. } => Self::BadRequest(err.to_string()),
            SchedulerError::Backup(e) => e.into(),
        }
    }
}
