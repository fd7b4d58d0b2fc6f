//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储和邮件 / 短信服务商适配器，实现应用/领域层定义的接口。

pub mod migrations;
pub mod providers;
pub mod repository;

pub use migrations::MIGRATOR;
pub use providers::{ClearstreamSmsSender, MailtrapEmailSender};
pub use repository::{
    create_pg_pool, PgProjectRepository, PgRegistrationRepository, PgStorage,
    PgVolunteerRepository,
};
