use crate::value_objects::{Timestamp, VolunteerEmail, VolunteerId};

/// 报名时提交的联系方式。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactDetails {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub sms_opt_in: bool,
    pub lead_interest: bool,
}

/// 志愿者，以规范化邮箱作为身份。首次报名时创建。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Volunteer {
    pub id: VolunteerId,
    pub email: VolunteerEmail,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub sms_opt_in: bool,
    pub lead_interest: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Volunteer {
    pub fn new(
        id: VolunteerId,
        email: VolunteerEmail,
        contact: ContactDetails,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            email,
            first_name: contact.first_name,
            last_name: contact.last_name,
            phone: normalize_phone(contact.phone),
            sms_opt_in: contact.sms_opt_in,
            lead_interest: contact.lead_interest,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_owned()
    }

    /// 短信通知需要本人同意且留有手机号。
    pub fn accepts_sms(&self) -> bool {
        self.sms_opt_in && self.phone.is_some()
    }

    /// 用新提交的联系方式覆盖已有记录，返回是否有字段发生变化。
    ///
    /// 姓名为空时保留原值。
    pub fn apply_contact(&mut self, contact: ContactDetails, now: Timestamp) -> bool {
        let phone = normalize_phone(contact.phone);
        let mut changed = false;

        if !contact.first_name.trim().is_empty() && contact.first_name != self.first_name {
            self.first_name = contact.first_name;
            changed = true;
        }
        if !contact.last_name.trim().is_empty() && contact.last_name != self.last_name {
            self.last_name = contact.last_name;
            changed = true;
        }
        if phone != self.phone {
            self.phone = phone;
            changed = true;
        }
        if contact.sms_opt_in != self.sms_opt_in {
            self.sms_opt_in = contact.sms_opt_in;
            changed = true;
        }
        if contact.lead_interest != self.lead_interest {
            self.lead_interest = contact.lead_interest;
            changed = true;
        }

        if changed {
            self.updated_at = now;
        }
        changed
    }
}

fn normalize_phone(phone: Option<String>) -> Option<String> {
    phone
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
}
