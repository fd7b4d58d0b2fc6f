use domain::{DomainError, RegistrationFailure, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}

impl From<RegistrationFailure> for ApplicationError {
    fn from(value: RegistrationFailure) -> Self {
        match value {
            RegistrationFailure::Rejected(err) => ApplicationError::Domain(err),
            RegistrationFailure::Repository(err) => ApplicationError::Repository(err),
        }
    }
}
