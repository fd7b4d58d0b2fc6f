use chrono::NaiveDate;
use futures::future::BoxFuture;

use crate::errors::{RegistrationFailure, RepositoryError};
use crate::project::Project;
use crate::registration::{Admission, NewRegistration, Registration, RegistrationDetails};
use crate::value_objects::{ProjectId, Timestamp, VolunteerEmail, VolunteerId};
use crate::volunteer::Volunteer;

pub type RepositoryResult<T> = Result<T, RepositoryError>;
pub type RepositoryFuture<T> = BoxFuture<'static, RepositoryResult<T>>;
pub type RegistrationFuture = BoxFuture<'static, Result<Admission, RegistrationFailure>>;

pub trait ProjectRepository: Send + Sync {
    fn find_by_id(&self, id: ProjectId) -> RepositoryFuture<Option<Project>>;
    /// 项目当前已占用名额
    fn committed_total(&self, id: ProjectId) -> RepositoryFuture<i64>;
}

pub trait VolunteerRepository: Send + Sync {
    fn create(&self, volunteer: Volunteer) -> RepositoryFuture<Volunteer>;
    fn find_by_id(&self, id: VolunteerId) -> RepositoryFuture<Option<Volunteer>>;
    fn find_by_email(&self, email: VolunteerEmail) -> RepositoryFuture<Option<Volunteer>>;
    fn list_all(&self) -> RepositoryFuture<Vec<Volunteer>>;
}

/// 报名记录存储。`register` 与 `cancel` 是唯一修改报名状态的入口。
pub trait RegistrationRepository: Send + Sync {
    /// 在单个原子单元内完成：锁定项目、按邮箱锁定志愿者、读取已占用名额与有效报名、
    /// 执行 `RegistrationRules::admit`，通过后才新建或更新志愿者并写入报名。
    /// 任何一步失败都不留下部分状态，被拒绝的报名不会改动志愿者记录。
    fn register(&self, registration: NewRegistration) -> RegistrationFuture;
    /// 将志愿者在该项目下的有效报名标记为已取消，没有时返回 `NotFound`。
    fn cancel(
        &self,
        volunteer_id: VolunteerId,
        project_id: ProjectId,
        now: Timestamp,
    ) -> RepositoryFuture<Registration>;
    fn find_active_by_volunteer(
        &self,
        volunteer_id: VolunteerId,
    ) -> RepositoryFuture<Option<Registration>>;
    /// 项目日期为 `event_date` 的所有有效报名
    fn list_active_for_event_date(
        &self,
        event_date: NaiveDate,
    ) -> RepositoryFuture<Vec<RegistrationDetails>>;
}
