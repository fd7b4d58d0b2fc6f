use std::sync::Arc;

use chrono::NaiveDate;
use domain::{
    Admission, AdmissionSnapshot, DomainError, GuestCount, NewRegistration, Project, ProjectId,
    ProjectRepository, Registration, RegistrationDetails, RegistrationFailure, RegistrationFuture,
    RegistrationId, RegistrationRepository, RegistrationRules, RegistrationStatus,
    RepositoryError, RepositoryFuture, Timestamp, Volunteer, VolunteerEmail, VolunteerId,
    VolunteerRepository,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    let unique_violation = matches!(
        &err,
        sqlx::Error::Database(db) if db.is_unique_violation()
    );
    if unique_violation {
        return RepositoryError::Conflict;
    }
    RepositoryError::storage_with_source("database operation failed", err)
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const PROJECT_COLUMNS: &str = "id, title, description, area, location_address, event_date, \
     event_time, capacity, serve_lead_name, serve_lead_email, created_at, updated_at";
const VOLUNTEER_COLUMNS: &str =
    "id, email, first_name, last_name, phone, sms_opt_in, lead_interest, created_at, updated_at";
const REGISTRATION_COLUMNS: &str =
    "id, project_id, volunteer_id, status, guest_count, lead_interest, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ProjectRecord {
    id: Uuid,
    title: String,
    description: String,
    area: String,
    location_address: String,
    event_date: NaiveDate,
    event_time: String,
    capacity: i64,
    serve_lead_name: Option<String>,
    serve_lead_email: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<ProjectRecord> for Project {
    fn from(value: ProjectRecord) -> Self {
        Project {
            id: ProjectId::from(value.id),
            title: value.title,
            description: value.description,
            area: value.area,
            location_address: value.location_address,
            event_date: value.event_date,
            event_time: value.event_time,
            capacity: value.capacity,
            serve_lead_name: value.serve_lead_name,
            serve_lead_email: value.serve_lead_email,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct VolunteerRecord {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    sms_opt_in: bool,
    lead_interest: bool,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<VolunteerRecord> for Volunteer {
    type Error = RepositoryError;

    fn try_from(value: VolunteerRecord) -> Result<Self, Self::Error> {
        let email = VolunteerEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Volunteer {
            id: VolunteerId::from(value.id),
            email,
            first_name: value.first_name,
            last_name: value.last_name,
            phone: value.phone,
            sms_opt_in: value.sms_opt_in,
            lead_interest: value.lead_interest,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RegistrationRecord {
    id: Uuid,
    project_id: Uuid,
    volunteer_id: Uuid,
    status: String,
    guest_count: i64,
    lead_interest: bool,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<RegistrationRecord> for Registration {
    type Error = RepositoryError;

    fn try_from(value: RegistrationRecord) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse::<RegistrationStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;
        let guest_count =
            GuestCount::parse(value.guest_count).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Registration {
            id: RegistrationId::from(value.id),
            project_id: ProjectId::from(value.project_id),
            volunteer_id: VolunteerId::from(value.volunteer_id),
            status,
            guest_count,
            lead_interest: value.lead_interest,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// 提醒查询的联表结果
#[derive(Debug, FromRow)]
struct DueReminderRecord {
    #[sqlx(flatten)]
    registration: RegistrationRecord,
    v_email: String,
    v_first_name: String,
    v_last_name: String,
    v_phone: Option<String>,
    v_sms_opt_in: bool,
    v_lead_interest: bool,
    v_created_at: Timestamp,
    v_updated_at: Timestamp,
    p_title: String,
    p_description: String,
    p_area: String,
    p_location_address: String,
    p_event_date: NaiveDate,
    p_event_time: String,
    p_capacity: i64,
    p_serve_lead_name: Option<String>,
    p_serve_lead_email: Option<String>,
    p_created_at: Timestamp,
    p_updated_at: Timestamp,
}

impl TryFrom<DueReminderRecord> for RegistrationDetails {
    type Error = RepositoryError;

    fn try_from(value: DueReminderRecord) -> Result<Self, Self::Error> {
        let volunteer = Volunteer::try_from(VolunteerRecord {
            id: value.registration.volunteer_id,
            email: value.v_email,
            first_name: value.v_first_name,
            last_name: value.v_last_name,
            phone: value.v_phone,
            sms_opt_in: value.v_sms_opt_in,
            lead_interest: value.v_lead_interest,
            created_at: value.v_created_at,
            updated_at: value.v_updated_at,
        })?;
        let project = Project::from(ProjectRecord {
            id: value.registration.project_id,
            title: value.p_title,
            description: value.p_description,
            area: value.p_area,
            location_address: value.p_location_address,
            event_date: value.p_event_date,
            event_time: value.p_event_time,
            capacity: value.p_capacity,
            serve_lead_name: value.p_serve_lead_name,
            serve_lead_email: value.p_serve_lead_email,
            created_at: value.p_created_at,
            updated_at: value.p_updated_at,
        });
        Ok(RegistrationDetails {
            registration: Registration::try_from(value.registration)?,
            volunteer,
            project,
        })
    }
}

#[derive(Clone)]
pub struct PgProjectRepository {
    pool: PgPool,
}

impl PgProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 写入项目。项目维护不经过名额账本，这里只供初始化数据和测试使用。
    pub async fn insert(&self, project: &Project) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, title, description, area, location_address, event_date,
                                  event_time, capacity, serve_lead_name, serve_lead_email,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::from(project.id))
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.area)
        .bind(&project.location_address)
        .bind(project.event_date)
        .bind(&project.event_time)
        .bind(project.capacity)
        .bind(project.serve_lead_name.as_deref())
        .bind(project.serve_lead_email.as_deref())
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

impl ProjectRepository for PgProjectRepository {
    fn find_by_id(&self, id: ProjectId) -> RepositoryFuture<Option<Project>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, ProjectRecord>(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"
            ))
            .bind(Uuid::from(id))
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;
            Ok(record.map(Project::from))
        })
    }

    fn committed_total(&self, id: ProjectId) -> RepositoryFuture<i64> {
        let pool = self.pool.clone();
        Box::pin(async move { committed_total(&pool, id).await })
    }
}

async fn committed_total<'e, E>(executor: E, id: ProjectId) -> Result<i64, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COALESCE(SUM(1 + guest_count), 0)::BIGINT
        FROM registrations
        WHERE project_id = $1 AND status = 'registered'
        "#,
    )
    .bind(Uuid::from(id))
    .fetch_one(executor)
    .await
    .map_err(map_sqlx_err)
}

#[derive(Clone)]
pub struct PgVolunteerRepository {
    pool: PgPool,
}

impl PgVolunteerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl VolunteerRepository for PgVolunteerRepository {
    fn create(&self, volunteer: Volunteer) -> RepositoryFuture<Volunteer> {
        let pool = self.pool.clone();
        Box::pin(async move { insert_volunteer(&pool, &volunteer).await })
    }

    fn find_by_id(&self, id: VolunteerId) -> RepositoryFuture<Option<Volunteer>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, VolunteerRecord>(&format!(
                "SELECT {VOLUNTEER_COLUMNS} FROM volunteers WHERE id = $1"
            ))
            .bind(Uuid::from(id))
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;
            record.map(Volunteer::try_from).transpose()
        })
    }

    fn find_by_email(&self, email: VolunteerEmail) -> RepositoryFuture<Option<Volunteer>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, VolunteerRecord>(&format!(
                "SELECT {VOLUNTEER_COLUMNS} FROM volunteers WHERE email = $1"
            ))
            .bind(email.as_str())
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;
            record.map(Volunteer::try_from).transpose()
        })
    }

    fn list_all(&self) -> RepositoryFuture<Vec<Volunteer>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let records = sqlx::query_as::<_, VolunteerRecord>(&format!(
                "SELECT {VOLUNTEER_COLUMNS} FROM volunteers ORDER BY created_at, id"
            ))
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx_err)?;
            records.into_iter().map(Volunteer::try_from).collect()
        })
    }
}

async fn insert_volunteer<'e, E>(
    executor: E,
    volunteer: &Volunteer,
) -> Result<Volunteer, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let record = sqlx::query_as::<_, VolunteerRecord>(&format!(
        r#"
        INSERT INTO volunteers (id, email, first_name, last_name, phone, sms_opt_in,
                                lead_interest, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {VOLUNTEER_COLUMNS}
        "#
    ))
    .bind(Uuid::from(volunteer.id))
    .bind(volunteer.email.as_str())
    .bind(&volunteer.first_name)
    .bind(&volunteer.last_name)
    .bind(volunteer.phone.as_deref())
    .bind(volunteer.sms_opt_in)
    .bind(volunteer.lead_interest)
    .bind(volunteer.created_at)
    .bind(volunteer.updated_at)
    .fetch_one(executor)
    .await
    .map_err(map_sqlx_err)?;

    Volunteer::try_from(record)
}

async fn update_volunteer_contact<'e, E>(
    executor: E,
    volunteer: &Volunteer,
) -> Result<Volunteer, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let record = sqlx::query_as::<_, VolunteerRecord>(&format!(
        r#"
        UPDATE volunteers
        SET first_name = $2, last_name = $3, phone = $4, sms_opt_in = $5,
            lead_interest = $6, updated_at = $7
        WHERE id = $1
        RETURNING {VOLUNTEER_COLUMNS}
        "#
    ))
    .bind(Uuid::from(volunteer.id))
    .bind(&volunteer.first_name)
    .bind(&volunteer.last_name)
    .bind(volunteer.phone.as_deref())
    .bind(volunteer.sms_opt_in)
    .bind(volunteer.lead_interest)
    .bind(volunteer.updated_at)
    .fetch_optional(executor)
    .await
    .map_err(map_sqlx_err)?
    .ok_or(RepositoryError::NotFound)?;

    Volunteer::try_from(record)
}

#[derive(Clone)]
pub struct PgRegistrationRepository {
    pool: PgPool,
}

impl PgRegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在一个事务内锁定项目行和志愿者行，读取名额与有效报名，判断后写入。
    ///
    /// 同一项目的并发报名在项目行锁上排队；同一志愿者跨项目的并发报名在志愿者行锁上排队。
    /// 志愿者的新建或联系方式更新只在准入通过后执行，被拒绝的报名不留下任何写入。
    /// 任一步失败时事务在 drop 时回滚。
    async fn register_in_tx(
        pool: PgPool,
        registration: NewRegistration,
    ) -> Result<Admission, RegistrationFailure> {
        let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

        // 1. 锁定项目行
        let capacity = sqlx::query_scalar::<_, i64>(
            "SELECT capacity FROM projects WHERE id = $1 FOR UPDATE",
        )
        .bind(Uuid::from(registration.project_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(DomainError::ProjectNotFound)?;

        // 2. 按邮箱锁定志愿者行（首次报名时不存在）
        let existing = sqlx::query_as::<_, VolunteerRecord>(&format!(
            "SELECT {VOLUNTEER_COLUMNS} FROM volunteers WHERE email = $1 FOR UPDATE"
        ))
        .bind(registration.applicant.email.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .map(Volunteer::try_from)
        .transpose()?;

        // 3. 读取已占用名额与志愿者当前有效报名
        let committed = committed_total(&mut *tx, registration.project_id).await?;
        let active_registration = match &existing {
            Some(volunteer) => sqlx::query_scalar::<_, Uuid>(
                "SELECT project_id FROM registrations \
                 WHERE volunteer_id = $1 AND status = 'registered'",
            )
            .bind(Uuid::from(volunteer.id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .map(ProjectId::from),
            None => None,
        };

        // 4. 准入判断
        RegistrationRules::admit(
            &AdmissionSnapshot {
                project_id: registration.project_id,
                capacity,
                committed,
                active_registration,
            },
            registration.guest_count,
        )?;

        // 5. 写回志愿者
        let resolved = registration.resolve_volunteer(existing);
        let volunteer = if resolved.is_new {
            insert_volunteer(&mut *tx, &resolved.volunteer).await?
        } else if resolved.changed {
            update_volunteer_contact(&mut *tx, &resolved.volunteer).await?
        } else {
            resolved.volunteer
        };

        // 6. 写入报名
        let stored = registration.into_registration(volunteer.id);
        let record = sqlx::query_as::<_, RegistrationRecord>(&format!(
            r#"
            INSERT INTO registrations (id, project_id, volunteer_id, status, guest_count,
                                       lead_interest, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {REGISTRATION_COLUMNS}
            "#
        ))
        .bind(Uuid::from(stored.id))
        .bind(Uuid::from(stored.project_id))
        .bind(Uuid::from(stored.volunteer_id))
        .bind(stored.status.as_str())
        .bind(i64::from(stored.guest_count.value()))
        .bind(stored.lead_interest)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        // 7. 提交事务
        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(Admission {
            registration: Registration::try_from(record)?,
            volunteer,
        })
    }
}

impl RegistrationRepository for PgRegistrationRepository {
    fn register(&self, registration: NewRegistration) -> RegistrationFuture {
        let pool = self.pool.clone();
        Box::pin(Self::register_in_tx(pool, registration))
    }

    fn cancel(
        &self,
        volunteer_id: VolunteerId,
        project_id: ProjectId,
        now: Timestamp,
    ) -> RepositoryFuture<Registration> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RegistrationRecord>(&format!(
                r#"
                UPDATE registrations
                SET status = 'cancelled', updated_at = $3
                WHERE volunteer_id = $1 AND project_id = $2 AND status = 'registered'
                RETURNING {REGISTRATION_COLUMNS}
                "#
            ))
            .bind(Uuid::from(volunteer_id))
            .bind(Uuid::from(project_id))
            .bind(now)
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;

            Registration::try_from(record)
        })
    }

    fn find_active_by_volunteer(
        &self,
        volunteer_id: VolunteerId,
    ) -> RepositoryFuture<Option<Registration>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let record = sqlx::query_as::<_, RegistrationRecord>(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations \
                 WHERE volunteer_id = $1 AND status = 'registered'"
            ))
            .bind(Uuid::from(volunteer_id))
            .fetch_optional(&pool)
            .await
            .map_err(map_sqlx_err)?;
            record.map(Registration::try_from).transpose()
        })
    }

    fn list_active_for_event_date(
        &self,
        event_date: NaiveDate,
    ) -> RepositoryFuture<Vec<RegistrationDetails>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let records = sqlx::query_as::<_, DueReminderRecord>(
                r#"
                SELECT r.id, r.project_id, r.volunteer_id, r.status, r.guest_count,
                       r.lead_interest, r.created_at, r.updated_at,
                       v.email AS v_email, v.first_name AS v_first_name,
                       v.last_name AS v_last_name, v.phone AS v_phone,
                       v.sms_opt_in AS v_sms_opt_in, v.lead_interest AS v_lead_interest,
                       v.created_at AS v_created_at, v.updated_at AS v_updated_at,
                       p.title AS p_title, p.description AS p_description, p.area AS p_area,
                       p.location_address AS p_location_address, p.event_date AS p_event_date,
                       p.event_time AS p_event_time, p.capacity AS p_capacity,
                       p.serve_lead_name AS p_serve_lead_name,
                       p.serve_lead_email AS p_serve_lead_email,
                       p.created_at AS p_created_at, p.updated_at AS p_updated_at
                FROM registrations r
                JOIN volunteers v ON v.id = r.volunteer_id
                JOIN projects p ON p.id = r.project_id
                WHERE r.status = 'registered' AND p.event_date = $1
                ORDER BY r.created_at, r.id
                "#,
            )
            .bind(event_date)
            .fetch_all(&pool)
            .await
            .map_err(map_sqlx_err)?;

            records
                .into_iter()
                .map(RegistrationDetails::try_from)
                .collect()
        })
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub project_repository: Arc<PgProjectRepository>,
    pub volunteer_repository: Arc<PgVolunteerRepository>,
    pub registration_repository: Arc<PgRegistrationRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            project_repository: Arc::new(PgProjectRepository::new(pool.clone())),
            volunteer_repository: Arc::new(PgVolunteerRepository::new(pool.clone())),
            registration_repository: Arc::new(PgRegistrationRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: std::time::Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}
