use std::sync::Arc;

use domain::{
    Admission, Applicant, ContactDetails, DomainError, GuestCount, NewRegistration, Project,
    ProjectId, ProjectRepository, RegistrationDetails, RegistrationFailure, RegistrationId,
    RegistrationRepository, RepositoryError, VolunteerEmail, VolunteerId, VolunteerRepository,
};
use uuid::Uuid;

use crate::{clock::Clock, error::ApplicationError};

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub project_id: Uuid,
    pub email: String,
    pub contact: ContactDetails,
    pub guest_count: i64,
    pub lead_interest: bool,
}

#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub project_id: Uuid,
    pub email: String,
}

/// 项目详情及当前名额占用
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProjectOverview {
    #[serde(flatten)]
    pub project: Project,
    pub committed: i64,
    pub remaining: i64,
}

pub struct CapacityLedgerDependencies {
    pub project_repository: Arc<dyn ProjectRepository>,
    pub volunteer_repository: Arc<dyn VolunteerRepository>,
    pub registration_repository: Arc<dyn RegistrationRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 名额账本：报名/取消的唯一入口，负责维护
/// "项目占用名额不超过容量" 与 "每人最多一个有效报名" 两条不变量。
pub struct CapacityLedger {
    deps: CapacityLedgerDependencies,
}

impl CapacityLedger {
    pub fn new(deps: CapacityLedgerDependencies) -> Self {
        Self { deps }
    }

    /// 报名。校验或准入失败时不会对存储做任何修改，志愿者记录也只在准入通过后写入。
    pub async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<RegistrationDetails, ApplicationError> {
        let guest_count = GuestCount::parse(request.guest_count)?;
        let email = VolunteerEmail::parse(request.email)?;
        let project_id = ProjectId::from(request.project_id);

        let project = self
            .deps
            .project_repository
            .find_by_id(project_id)
            .await?
            .ok_or(DomainError::ProjectNotFound)?;

        let mut contact = request.contact;
        contact.lead_interest = request.lead_interest;
        let new_registration = NewRegistration {
            id: RegistrationId::from(Uuid::new_v4()),
            project_id,
            applicant: Applicant {
                email,
                contact,
                new_volunteer_id: VolunteerId::from(Uuid::new_v4()),
            },
            guest_count,
            lead_interest: request.lead_interest,
            created_at: self.deps.clock.now(),
        };

        let repo = &self.deps.registration_repository;
        let outcome = match repo.register(new_registration.clone()).await {
            // 同一邮箱的首次报名并发时，另一方已经创建了志愿者，重试一次按已有志愿者处理
            Err(RegistrationFailure::Repository(RepositoryError::Conflict)) => {
                tracing::debug!(project_id = %project_id, "志愿者并发创建，重试报名");
                repo.register(new_registration).await
            }
            other => other,
        };

        let Admission {
            registration,
            volunteer,
        } = outcome.map_err(|failure| {
            tracing::info!(
                project_id = %project_id,
                reason = %failure,
                "报名被拒绝"
            );
            ApplicationError::from(failure)
        })?;

        tracing::info!(
            project_id = %project_id,
            volunteer_id = %volunteer.id,
            registration_id = %registration.id,
            party_size = registration.guest_count.party_size(),
            "报名成功"
        );

        Ok(RegistrationDetails {
            registration,
            volunteer,
            project,
        })
    }

    /// 取消志愿者在该项目下的有效报名
    pub async fn cancel(
        &self,
        request: CancelRequest,
    ) -> Result<RegistrationDetails, ApplicationError> {
        let email = VolunteerEmail::parse(request.email)?;
        let project_id = ProjectId::from(request.project_id);

        let volunteer = self
            .deps
            .volunteer_repository
            .find_by_email(email)
            .await?
            .ok_or(DomainError::RegistrationNotFound)?;

        let registration = match self
            .deps
            .registration_repository
            .cancel(volunteer.id, project_id, self.deps.clock.now())
            .await
        {
            Ok(registration) => registration,
            Err(RepositoryError::NotFound) => return Err(DomainError::RegistrationNotFound.into()),
            Err(err) => return Err(err.into()),
        };

        let project = self
            .deps
            .project_repository
            .find_by_id(project_id)
            .await?
            .ok_or(DomainError::ProjectNotFound)?;

        tracing::info!(
            project_id = %project_id,
            volunteer_id = %volunteer.id,
            registration_id = %registration.id,
            "报名已取消"
        );

        Ok(RegistrationDetails {
            registration,
            volunteer,
            project,
        })
    }

    /// 志愿者当前有效报名所在的项目
    pub async fn has_active_registration(
        &self,
        volunteer_id: VolunteerId,
    ) -> Result<Option<ProjectId>, ApplicationError> {
        let active = self
            .deps
            .registration_repository
            .find_active_by_volunteer(volunteer_id)
            .await?;
        Ok(active.map(|r| r.project_id))
    }

    /// 按邮箱找回有效报名（"继续我的报名"）
    pub async fn find_active_by_email(
        &self,
        email: &str,
    ) -> Result<Option<RegistrationDetails>, ApplicationError> {
        let email = VolunteerEmail::parse(email)?;
        let Some(volunteer) = self
            .deps
            .volunteer_repository
            .find_by_email(email)
            .await?
        else {
            return Ok(None);
        };

        let Some(registration) = self
            .deps
            .registration_repository
            .find_active_by_volunteer(volunteer.id)
            .await?
        else {
            return Ok(None);
        };

        let project = self
            .deps
            .project_repository
            .find_by_id(registration.project_id)
            .await?
            .ok_or(DomainError::ProjectNotFound)?;

        Ok(Some(RegistrationDetails {
            registration,
            volunteer,
            project,
        }))
    }

    pub async fn project_overview(
        &self,
        project_id: Uuid,
    ) -> Result<ProjectOverview, ApplicationError> {
        let project_id = ProjectId::from(project_id);
        let project = self
            .deps
            .project_repository
            .find_by_id(project_id)
            .await?
            .ok_or(DomainError::ProjectNotFound)?;
        let committed = self
            .deps
            .project_repository
            .committed_total(project_id)
            .await?;
        let remaining = project.remaining(committed);

        Ok(ProjectOverview {
            project,
            committed,
            remaining,
        })
    }
}
