use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use application::{CancelRequest, ProjectOverview, RegisterRequest};
use domain::{ContactDetails, RegistrationDetails, RegistrationStatus, Timestamp};

use crate::{error::ApiError, rate_limit, state::AppState};

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, max = 100))]
    first_name: String,
    #[validate(length(min = 1, max = 100))]
    last_name: String,
    #[validate(email)]
    email: String,
    #[validate(length(max = 32))]
    phone: Option<String>,
    #[serde(default)]
    sms_opt_in: bool,
    #[serde(default)]
    guest_count: i64,
    #[serde(default)]
    lead_interest: bool,
}

#[derive(Debug, Deserialize, Validate)]
struct EmailQuery {
    #[validate(email)]
    email: String,
}

/// 报名记录及所属项目摘要
#[derive(Debug, Serialize)]
pub struct RegistrationView {
    pub registration_id: Uuid,
    pub project_id: Uuid,
    pub volunteer_id: Uuid,
    pub status: RegistrationStatus,
    pub guest_count: u32,
    pub party_size: i64,
    pub lead_interest: bool,
    pub project_title: String,
    pub event_date: NaiveDate,
    pub event_time: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&RegistrationDetails> for RegistrationView {
    fn from(details: &RegistrationDetails) -> Self {
        let registration = &details.registration;
        Self {
            registration_id: registration.id.into(),
            project_id: registration.project_id.into(),
            volunteer_id: registration.volunteer_id.into(),
            status: registration.status,
            guest_count: registration.guest_count.value(),
            party_size: registration.guest_count.party_size(),
            lead_interest: registration.lead_interest,
            project_title: details.project.title.clone(),
            event_date: details.project.event_date,
            event_time: details.project.event_time.clone(),
            created_at: registration.created_at,
            updated_at: registration.updated_at,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/projects/{project_id}", get(project_overview))
        .route("/projects/{project_id}/register", post(register))
        .route("/projects/{project_id}/cancel", post(cancel))
        .route("/registrations/mine", get(my_registration))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn project_overview(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectOverview>, ApiError> {
    let overview = state.ledger.project_overview(project_id).await?;
    Ok(Json(overview))
}

async fn register(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<RegistrationView>), ApiError> {
    payload.validate()?;

    let phone = payload
        .phone
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty());
    let details = state
        .ledger
        .register(RegisterRequest {
            project_id,
            email: payload.email,
            contact: ContactDetails {
                first_name: payload.first_name,
                last_name: payload.last_name,
                phone,
                sms_opt_in: payload.sms_opt_in,
                lead_interest: payload.lead_interest,
            },
            guest_count: payload.guest_count,
            lead_interest: payload.lead_interest,
        })
        .await?;

    let queued = state.dispatcher.dispatch_confirmation(&details);
    tracing::debug!(
        registration_id = %details.registration.id,
        queued,
        "确认通知已进入后台发送"
    );

    Ok((StatusCode::CREATED, Json(RegistrationView::from(&details))))
}

async fn cancel(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<RegistrationView>, ApiError> {
    query.validate()?;

    let details = state
        .ledger
        .cancel(CancelRequest {
            project_id,
            email: query.email,
        })
        .await?;

    state.dispatcher.dispatch_cancellation(&details);
    Ok(Json(RegistrationView::from(&details)))
}

async fn my_registration(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<RegistrationView>, ApiError> {
    query.validate()?;

    let details = state
        .ledger
        .find_active_by_email(&query.email)
        .await?
        .ok_or_else(|| ApiError::not_found("NO_ACTIVE_REGISTRATION", "no active registration"))?;

    Ok(Json(RegistrationView::from(&details)))
}
