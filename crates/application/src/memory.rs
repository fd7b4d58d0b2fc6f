//! 内存存储实现
//!
//! 所有仓储共用一把锁，`register` 在持锁期间完成读取、判断和写入，
//! 与 PostgreSQL 实现中的行锁事务具有相同的线性化语义。用于测试和本地调试。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use domain::{
    Admission, AdmissionSnapshot, DomainError, NewRegistration, Project, ProjectId,
    ProjectRepository, Registration, RegistrationDetails, RegistrationFailure, RegistrationFuture,
    RegistrationRepository, RegistrationRules, RepositoryError, RepositoryFuture, Timestamp,
    Volunteer, VolunteerEmail, VolunteerId, VolunteerRepository,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    projects: HashMap<ProjectId, Project>,
    volunteers: HashMap<VolunteerId, Volunteer>,
    registrations: Vec<Registration>,
}

impl MemoryState {
    fn committed(&self, project_id: ProjectId) -> i64 {
        self.registrations
            .iter()
            .filter(|r| r.project_id == project_id)
            .map(Registration::committed_size)
            .sum()
    }

    fn active_for(&self, volunteer_id: VolunteerId) -> Option<&Registration> {
        self.registrations
            .iter()
            .find(|r| r.volunteer_id == volunteer_id && r.is_active())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_project(&self, project: Project) {
        self.state.lock().await.projects.insert(project.id, project);
    }

    /// 直接写入一条报名记录，绕过准入规则，仅用于准备测试数据
    pub async fn seed_registration(&self, registration: Registration) {
        self.state.lock().await.registrations.push(registration);
    }

    pub async fn registrations(&self) -> Vec<Registration> {
        self.state.lock().await.registrations.clone()
    }

    pub async fn committed(&self, project_id: ProjectId) -> i64 {
        self.state.lock().await.committed(project_id)
    }
}

impl ProjectRepository for InMemoryStore {
    fn find_by_id(&self, id: ProjectId) -> RepositoryFuture<Option<Project>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(state.lock().await.projects.get(&id).cloned()) })
    }

    fn committed_total(&self, id: ProjectId) -> RepositoryFuture<i64> {
        let state = self.state.clone();
        Box::pin(async move { Ok(state.lock().await.committed(id)) })
    }
}

impl VolunteerRepository for InMemoryStore {
    fn create(&self, volunteer: Volunteer) -> RepositoryFuture<Volunteer> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut guard = state.lock().await;
            let email_taken = guard.volunteers.values().any(|v| v.email == volunteer.email);
            if email_taken || guard.volunteers.contains_key(&volunteer.id) {
                return Err(RepositoryError::Conflict);
            }
            guard.volunteers.insert(volunteer.id, volunteer.clone());
            Ok(volunteer)
        })
    }

    fn find_by_id(&self, id: VolunteerId) -> RepositoryFuture<Option<Volunteer>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(state.lock().await.volunteers.get(&id).cloned()) })
    }

    fn find_by_email(&self, email: VolunteerEmail) -> RepositoryFuture<Option<Volunteer>> {
        let state = self.state.clone();
        Box::pin(async move {
            let guard = state.lock().await;
            Ok(guard.volunteers.values().find(|v| v.email == email).cloned())
        })
    }

    fn list_all(&self) -> RepositoryFuture<Vec<Volunteer>> {
        let state = self.state.clone();
        Box::pin(async move {
            let guard = state.lock().await;
            let mut all: Vec<Volunteer> = guard.volunteers.values().cloned().collect();
            all.sort_by_key(|v| v.created_at);
            Ok(all)
        })
    }
}

impl RegistrationRepository for InMemoryStore {
    fn register(&self, registration: NewRegistration) -> RegistrationFuture {
        let state = self.state.clone();
        Box::pin(async move {
            let mut guard = state.lock().await;
            let project = guard
                .projects
                .get(&registration.project_id)
                .ok_or(RegistrationFailure::Rejected(DomainError::ProjectNotFound))?;

            let existing = guard
                .volunteers
                .values()
                .find(|v| v.email == registration.applicant.email)
                .cloned();

            let snapshot = AdmissionSnapshot {
                project_id: project.id,
                capacity: project.capacity,
                committed: guard.committed(project.id),
                active_registration: existing
                    .as_ref()
                    .and_then(|v| guard.active_for(v.id))
                    .map(|r| r.project_id),
            };
            RegistrationRules::admit(&snapshot, registration.guest_count)?;

            // 准入通过后才写入志愿者
            let resolved = registration.resolve_volunteer(existing);
            let volunteer = resolved.volunteer;
            if resolved.changed {
                guard.volunteers.insert(volunteer.id, volunteer.clone());
            }

            let stored = registration.into_registration(volunteer.id);
            guard.registrations.push(stored.clone());
            Ok(Admission {
                registration: stored,
                volunteer,
            })
        })
    }

    fn cancel(
        &self,
        volunteer_id: VolunteerId,
        project_id: ProjectId,
        now: Timestamp,
    ) -> RepositoryFuture<Registration> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut guard = state.lock().await;
            let registration = guard
                .registrations
                .iter_mut()
                .find(|r| r.volunteer_id == volunteer_id && r.project_id == project_id && r.is_active())
                .ok_or(RepositoryError::NotFound)?;
            registration.cancel(now);
            Ok(registration.clone())
        })
    }

    fn find_active_by_volunteer(
        &self,
        volunteer_id: VolunteerId,
    ) -> RepositoryFuture<Option<Registration>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(state.lock().await.active_for(volunteer_id).cloned()) })
    }

    fn list_active_for_event_date(
        &self,
        event_date: NaiveDate,
    ) -> RepositoryFuture<Vec<RegistrationDetails>> {
        let state = self.state.clone();
        Box::pin(async move {
            let guard = state.lock().await;
            let mut due = Vec::new();
            for registration in guard.registrations.iter().filter(|r| r.is_active()) {
                let Some(project) = guard.projects.get(&registration.project_id) else {
                    continue;
                };
                if project.event_date != event_date {
                    continue;
                }
                let Some(volunteer) = guard.volunteers.get(&registration.volunteer_id) else {
                    continue;
                };
                due.push(RegistrationDetails {
                    registration: registration.clone(),
                    volunteer: volunteer.clone(),
                    project: project.clone(),
                });
            }
            due.sort_by_key(|d| d.registration.created_at);
            Ok(due)
        })
    }
}
