use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 服务项目唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ProjectId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<ProjectId> for Uuid {
    fn from(value: ProjectId) -> Self {
        value.0
    }
}

/// 志愿者唯一标识（按邮箱首次报名时生成）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolunteerId(pub Uuid);

impl VolunteerId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for VolunteerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for VolunteerId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<VolunteerId> for Uuid {
    fn from(value: VolunteerId) -> Self {
        value.0
    }
}

/// 报名记录唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub Uuid);

impl RegistrationId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RegistrationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<RegistrationId> for Uuid {
    fn from(value: RegistrationId) -> Self {
        value.0
    }
}

/// 规范化后的志愿者邮箱，也是志愿者身份的唯一键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolunteerEmail(String);

impl VolunteerEmail {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_lowercase();
        if value.is_empty() {
            return Err(DomainError::validation("email", "cannot be empty"));
        }
        if value.len() > 254 {
            return Err(DomainError::validation("email", "too long"));
        }
        match value.split_once('@') {
            Some((local, host)) if !local.is_empty() && host.contains('.') => Ok(Self(value)),
            _ => Err(DomainError::validation("email", "invalid format")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolunteerEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 随行人数（不含报名者本人），不允许为负。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuestCount(u32);

impl GuestCount {
    pub fn parse(value: i64) -> Result<Self, DomainError> {
        if value < 0 {
            return Err(DomainError::validation(
                "guest_count",
                "guest count cannot be negative",
            ));
        }
        u32::try_from(value)
            .map(Self)
            .map_err(|_| DomainError::validation("guest_count", "guest count too large"))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// 本次报名占用的名额：本人 + 随行人数。
    pub fn party_size(self) -> i64 {
        1 + i64::from(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalised() {
        let email = VolunteerEmail::parse("  Jane.Doe@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "jane.doe@example.com");
    }

    #[test]
    fn email_without_domain_is_rejected() {
        assert!(VolunteerEmail::parse("jane").is_err());
        assert!(VolunteerEmail::parse("jane@localhost").is_err());
        assert!(VolunteerEmail::parse("").is_err());
    }

    #[test]
    fn negative_guest_count_is_rejected() {
        let err = GuestCount::parse(-1).unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn party_size_counts_the_registrant() {
        assert_eq!(GuestCount::parse(0).unwrap().party_size(), 1);
        assert_eq!(GuestCount::parse(3).unwrap().party_size(), 4);
    }
}
