//! 志愿服务日报名系统核心领域模型
//!
//! 包含项目、志愿者、报名记录等实体，以及名额准入规则。

pub mod business_rules;
pub mod errors;
pub mod project;
pub mod registration;
pub mod repository;
pub mod value_objects;
pub mod volunteer;

// 重新导出常用类型
pub use business_rules::*;
pub use errors::*;
pub use project::*;
pub use registration::*;
pub use repository::*;
pub use value_objects::*;
pub use volunteer::*;
