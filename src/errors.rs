use http::StatusCode;
use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by callers that only care about the outcome
/// category (eg to pick a response status).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotFoundOrUnchanged,
    Conflict,
    Unsupported,
    InvalidArgument,
    /// The file manager could not remove stored files.
    StorageFailure,
    /// Unexpected repository, transaction or serialization error.
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    NotFoundOrUnchanged(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("file storage failure: {0}")]
    StorageFailure(String),

    #[error("sqlx error")]
    SQLXError(#[from] sqlx::Error),
    #[error("sqlx migration error")]
    SQLXMigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("sea-query error")]
    SeaQueryError(#[from] sea_query::error::Error),

    #[error("http error")]
    HTTPError(#[from] http::Error),

    #[error("error serializing to value")]
    SerdeJsonToValueError(#[from] serde_json::Error),
    #[error("config deserialization error")]
    ConfigError(#[from] serde_yaml::Error),
    #[error("io error")]
    IOError(#[from] std::io::Error),

    #[error("aws sdk list objects error")]
    AWSSDKListObjectsV2Error(
        #[from]
        aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error>,
    ),
    #[error("aws sdk delete object error")]
    AWSSDKDeleteObjectError(
        #[from]
        aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::delete_object::DeleteObjectError>,
    ),
    #[error("aws sdk credentials error")]
    AWSSDKCredentialsError(#[from] aws_credential_types::provider::error::CredentialsError),

    // metadata errors
    #[error("PostgresMetadataTx already rolled back or committed")]
    PostgresMetadataTxInactive,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SQLXError(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            Error::NotFoundOrUnchanged(_) => ErrorKind::NotFoundOrUnchanged,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::SQLXError(sqlx::Error::Database(dberr))
                if matches!(dberr.kind(), sqlx::error::ErrorKind::ForeignKeyViolation) =>
            {
                ErrorKind::Conflict
            }
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::InvalidArgument(_) | Error::InvalidDigest(_) => ErrorKind::InvalidArgument,
            Error::StorageFailure(_)
            | Error::AWSSDKListObjectsV2Error(_)
            | Error::AWSSDKDeleteObjectError(_)
            | Error::AWSSDKCredentialsError(_) => ErrorKind::StorageFailure,
            _ => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound | ErrorKind::NotFoundOrUnchanged => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unsupported => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::StorageFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::NotFoundOrUnchanged
        )
    }
}
