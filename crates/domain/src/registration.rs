use std::fmt;
use std::str::FromStr;

use crate::errors::DomainError;
use crate::project::Project;
use crate::value_objects::{
    GuestCount, ProjectId, RegistrationId, Timestamp, VolunteerEmail, VolunteerId,
};
use crate::volunteer::{ContactDetails, Volunteer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Registered,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationStatus::Registered => "registered",
            RegistrationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(RegistrationStatus::Registered),
            "cancelled" => Ok(RegistrationStatus::Cancelled),
            other => Err(DomainError::validation(
                "status",
                format!("unknown registration status: {other}"),
            )),
        }
    }
}

/// 一条报名记录。取消时只修改状态，不做物理删除。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub project_id: ProjectId,
    pub volunteer_id: VolunteerId,
    pub status: RegistrationStatus,
    pub guest_count: GuestCount,
    pub lead_interest: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Registration {
    /// 新的有效报名
    pub fn new(
        id: RegistrationId,
        project_id: ProjectId,
        volunteer_id: VolunteerId,
        guest_count: GuestCount,
        lead_interest: bool,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            project_id,
            volunteer_id,
            status: RegistrationStatus::Registered,
            guest_count,
            lead_interest,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RegistrationStatus::Registered
    }

    /// 该记录占用的名额，已取消的记录不占名额。
    pub fn committed_size(&self) -> i64 {
        if self.is_active() {
            self.guest_count.party_size()
        } else {
            0
        }
    }

    pub fn cancel(&mut self, now: Timestamp) {
        self.status = RegistrationStatus::Cancelled;
        self.updated_at = now;
    }
}

/// 报名人。邮箱即身份；联系方式只在准入通过后才写入志愿者记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applicant {
    pub email: VolunteerEmail,
    pub contact: ContactDetails,
    /// 该邮箱还没有志愿者时，新建志愿者使用的 id
    pub new_volunteer_id: VolunteerId,
}

/// 交给仓储原子写入的新报名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegistration {
    pub id: RegistrationId,
    pub project_id: ProjectId,
    pub applicant: Applicant,
    pub guest_count: GuestCount,
    pub lead_interest: bool,
    pub created_at: Timestamp,
}

impl NewRegistration {
    /// 由已有志愿者（或新建）得到本次报名后的志愿者状态。
    /// 只在准入通过后调用，调用方按 `is_new` / `changed` 决定插入或更新。
    pub fn resolve_volunteer(&self, existing: Option<Volunteer>) -> ResolvedVolunteer {
        match existing {
            Some(mut volunteer) => {
                let changed =
                    volunteer.apply_contact(self.applicant.contact.clone(), self.created_at);
                ResolvedVolunteer {
                    volunteer,
                    is_new: false,
                    changed,
                }
            }
            None => ResolvedVolunteer {
                volunteer: Volunteer::new(
                    self.applicant.new_volunteer_id,
                    self.applicant.email.clone(),
                    self.applicant.contact.clone(),
                    self.created_at,
                ),
                is_new: true,
                changed: true,
            },
        }
    }

    pub fn into_registration(self, volunteer_id: VolunteerId) -> Registration {
        Registration::new(
            self.id,
            self.project_id,
            volunteer_id,
            self.guest_count,
            self.lead_interest,
            self.created_at,
        )
    }
}

/// 准入通过后要写回的志愿者状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVolunteer {
    pub volunteer: Volunteer,
    pub is_new: bool,
    pub changed: bool,
}

/// 原子报名成功的结果：新记录及写回后的志愿者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub registration: Registration,
    pub volunteer: Volunteer,
}

/// 报名记录连同志愿者和项目信息，供通知渲染使用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationDetails {
    pub registration: Registration,
    pub volunteer: Volunteer,
    pub project: Project,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn new_registration(phone: Option<&str>, sms_opt_in: bool) -> NewRegistration {
        NewRegistration {
            id: RegistrationId::from(Uuid::new_v4()),
            project_id: ProjectId::from(Uuid::new_v4()),
            applicant: Applicant {
                email: VolunteerEmail::parse("kim@example.com").unwrap(),
                contact: ContactDetails {
                    first_name: "Kim".into(),
                    last_name: "Park".into(),
                    phone: phone.map(str::to_owned),
                    sms_opt_in,
                    lead_interest: false,
                },
                new_volunteer_id: VolunteerId::from(Uuid::new_v4()),
            },
            guest_count: GuestCount::parse(1).unwrap(),
            lead_interest: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unknown_email_resolves_to_new_volunteer() {
        let request = new_registration(Some("303-555-0199"), true);
        let resolved = request.resolve_volunteer(None);
        assert!(resolved.is_new);
        assert_eq!(resolved.volunteer.id, request.applicant.new_volunteer_id);
        assert!(resolved.volunteer.accepts_sms());
    }

    #[test]
    fn existing_volunteer_keeps_id_and_takes_new_contact() {
        let first = new_registration(Some("303-555-0199"), true);
        let existing = first.resolve_volunteer(None).volunteer;

        let again = new_registration(None, false);
        let resolved = again.resolve_volunteer(Some(existing.clone()));
        assert!(!resolved.is_new);
        assert!(resolved.changed);
        assert_eq!(resolved.volunteer.id, existing.id);
        assert!(!resolved.volunteer.accepts_sms());
    }

    #[test]
    fn into_registration_is_active() {
        let request = new_registration(None, false);
        let volunteer_id = VolunteerId::from(Uuid::new_v4());
        let registration = request.into_registration(volunteer_id);
        assert!(registration.is_active());
        assert_eq!(registration.volunteer_id, volunteer_id);
        assert_eq!(registration.committed_size(), 2);
    }
}
