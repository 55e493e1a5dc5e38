#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid home id: must be 8 hex characters, got {0:?}")]
    InvalidHomeId(String),

    #[error("unknown home: {0}")]
    HomeNotFound(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token subject does not match the resolved user")]
    SubjectMismatch,
}

pub type Result<T> = std::result::Result<T, Error>;
