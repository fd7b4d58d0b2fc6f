use chrono::NaiveDate;

use crate::errors::DomainError;
use crate::value_objects::{ProjectId, Timestamp};

/// 服务日的一个志愿项目。
///
/// `capacity` 是项目可容纳的总人数（报名者本人 + 随行人员）。
/// 已有报名时仍允许修改容量，这种情况下剩余名额按 0 处理。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub area: String,
    pub location_address: String,
    pub event_date: NaiveDate,
    pub event_time: String,
    pub capacity: i64,
    pub serve_lead_name: Option<String>,
    pub serve_lead_email: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ProjectId,
        title: impl Into<String>,
        description: impl Into<String>,
        area: impl Into<String>,
        location_address: impl Into<String>,
        event_date: NaiveDate,
        event_time: impl Into<String>,
        capacity: i64,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(DomainError::validation("title", "cannot be empty"));
        }
        if capacity < 0 {
            return Err(DomainError::validation("capacity", "cannot be negative"));
        }
        Ok(Self {
            id,
            title,
            description: description.into(),
            area: area.into(),
            location_address: location_address.into(),
            event_date,
            event_time: event_time.into(),
            capacity,
            serve_lead_name: None,
            serve_lead_email: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_serve_lead(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.serve_lead_name = Some(name.into());
        self.serve_lead_email = Some(email.into());
        self
    }

    /// 给定已占用名额时的剩余名额。
    pub fn remaining(&self, committed: i64) -> i64 {
        (self.capacity - committed).max(0)
    }
}
