//! 领域模型错误定义
//!
//! 区分调用方可以纠正的业务规则错误与存储层错误，
//! Web 层据此映射到不同的 HTTP 状态码。

use thiserror::Error;

use crate::value_objects::ProjectId;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 输入校验失败，不会重试
    #[error("validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    /// 项目不存在
    #[error("project not found")]
    ProjectNotFound,

    /// 志愿者在该项目下没有有效报名
    #[error("no active registration found for this project")]
    RegistrationNotFound,

    /// 剩余名额不足
    #[error("capacity not available: requested {requested}, remaining {remaining}")]
    CapacityExceeded { requested: i64, remaining: i64 },

    /// 已报名同一个项目
    #[error("volunteer is already registered for project {project_id}")]
    DuplicateRegistration { project_id: ProjectId },

    /// 已报名其他项目
    #[error("volunteer is already registered for a different project {project_id}")]
    ConflictingRegistration { project_id: ProjectId },
}

impl DomainError {
    /// 创建校验错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储层错误
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("entity not found")]
    NotFound,
    #[error("entity conflict")]
    Conflict,
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// 原子报名操作可能的失败：业务规则拒绝或存储故障。
#[derive(Error, Debug)]
pub enum RegistrationFailure {
    #[error(transparent)]
    Rejected(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
