use application::{ApplicationError, RateLimitError};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::ValidationErrors;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
            retry_after: None,
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::DomainError;

        match error {
            AppErr::Domain(DomainError::Validation { field, message }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("{}: {}", field, message),
            ),
            AppErr::Domain(DomainError::ProjectNotFound) => {
                ApiError::not_found("PROJECT_NOT_FOUND", "project not found")
            }
            AppErr::Domain(err @ DomainError::CapacityExceeded { .. }) => ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "CAPACITY_EXCEEDED",
                err.to_string(),
            ),
            AppErr::Domain(err @ DomainError::DuplicateRegistration { .. }) => ApiError::new(
                StatusCode::ALREADY_REPORTED,
                "ALREADY_REGISTERED",
                err.to_string(),
            ),
            AppErr::Domain(err @ DomainError::ConflictingRegistration { .. }) => ApiError::new(
                StatusCode::CONFLICT,
                "REGISTERED_ELSEWHERE",
                err.to_string(),
            ),
            AppErr::Domain(err @ DomainError::RegistrationNotFound) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "NO_ACTIVE_REGISTRATION",
                err.to_string(),
            ),
            AppErr::Repository(repo_err) => match repo_err {
                domain::RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                domain::RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "concurrent update, please retry")
                }
                domain::RepositoryError::Storage { message, .. } => {
                    tracing::error!(error = %message, "数据库操作失败");
                    ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "database error",
                    )
                }
            },
            AppErr::Infrastructure(message) => {
                tracing::error!(error = %message, "基础设施错误");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INFRASTRUCTURE_ERROR",
                    "internal error",
                )
            }
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<&str> = field_errors.keys().map(|k| k.as_ref()).collect();
        fields.sort_unstable();
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("invalid fields: {}", fields.join(", ")),
        )
    }
}

impl From<RateLimitError> for ApiError {
    fn from(error: RateLimitError) -> Self {
        let RateLimitError::TooManyRequests { retry_after, .. } = &error;
        let seconds = retry_after.as_secs_f64().ceil().max(1.0) as u64;
        let mut api = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "rate limit exceeded",
        );
        api.retry_after = Some(seconds);
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
