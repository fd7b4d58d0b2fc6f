//! 通知模板。邮件渲染为 HTML，短信渲染为纯文本并附带退订说明。

use chrono::NaiveDate;

use super::{Channel, DeliveryError, MessagePayload, NotificationKind};

const SMS_STOP_SUFFIX: &str = " Text STOP to optout";
const ORGANIZATION: &str = "Journey Serve Day";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// 纯函数：模板不存在或数据缺少必填字段时返回 `DeliveryError::Template`
pub fn render(
    kind: NotificationKind,
    channel: Channel,
    payload: &MessagePayload,
) -> Result<RenderedMessage, DeliveryError> {
    match channel {
        Channel::Email => render_email(kind, payload),
        Channel::Sms => render_sms(kind, payload),
    }
}

fn render_email(
    kind: NotificationKind,
    payload: &MessagePayload,
) -> Result<RenderedMessage, DeliveryError> {
    let greeting = format!("<p>Hi {},</p>", escape(&payload.volunteer_name));

    match kind {
        NotificationKind::Confirmation => {
            let details = ProjectFields::require(payload)?;
            Ok(RenderedMessage {
                subject: "Serve Day Project Confirmation".to_owned(),
                body: wrap_html(&format!(
                    "{greeting}<p>Thank you for signing up to serve! You are registered for \
                     <strong>{}</strong>.</p>{}",
                    escape(details.title),
                    details.html_summary(payload)
                )),
            })
        }
        NotificationKind::Cancellation => {
            let details = ProjectFields::require(payload)?;
            Ok(RenderedMessage {
                subject: format!("Registration Cancelled: {}", details.title),
                body: wrap_html(&format!(
                    "{greeting}<p>Your registration for <strong>{}</strong> on {} has been \
                     cancelled. You are welcome to sign up for another project at any time.</p>",
                    escape(details.title),
                    format_date(details.event_date)
                )),
            })
        }
        NotificationKind::Reminder { days } => {
            let details = ProjectFields::require(payload)?;
            let (subject, lead_in) = match days {
                14 => (
                    format!("2 Weeks Until Your Journey Serve Day Project: {}", details.title),
                    "Serve Day is two weeks away!",
                ),
                7 => (
                    format!("1 Week Until Your Journey Serve Day Project: {}", details.title),
                    "Serve Day is one week away!",
                ),
                1 => (
                    format!("Tomorrow: Your Project {} Begins", details.title),
                    "Serve Day is tomorrow!",
                ),
                other => return Err(unsupported_reminder(other)),
            };
            Ok(RenderedMessage {
                subject,
                body: wrap_html(&format!(
                    "{greeting}<p>{lead_in} Here are the details for your project.</p>{}",
                    details.html_summary(payload)
                )),
            })
        }
        NotificationKind::ThankYou => Ok(RenderedMessage {
            subject: "Serve Day - Thank you".to_owned(),
            body: wrap_html(&format!(
                "{greeting}<p>Thank you for serving with us at {ORGANIZATION}. \
                 Together we made a real difference in our city.</p>"
            )),
        }),
    }
}

fn render_sms(
    kind: NotificationKind,
    payload: &MessagePayload,
) -> Result<RenderedMessage, DeliveryError> {
    let text = match kind {
        NotificationKind::Confirmation => {
            let details = ProjectFields::require(payload)?;
            format!(
                "Registration Confirmation: {} on {} at {}.",
                details.title,
                format_date(details.event_date),
                details.event_time
            )
        }
        NotificationKind::Cancellation => {
            let details = ProjectFields::require(payload)?;
            format!("Your registration for {} has been cancelled.", details.title)
        }
        NotificationKind::Reminder { days } => match days {
            14 => "2 Weeks Until Your Serve Project!".to_owned(),
            7 => "1 Week Until Your Serve Project!".to_owned(),
            1 => "Tomorrow: Your Serve Project Begins!".to_owned(),
            other => return Err(unsupported_reminder(other)),
        },
        NotificationKind::ThankYou => format!("Thank you for serving at {ORGANIZATION}!"),
    };

    Ok(RenderedMessage {
        subject: ORGANIZATION.to_owned(),
        body: format!("{text}{SMS_STOP_SUFFIX}"),
    })
}

/// 项目类通知的必填字段
struct ProjectFields<'a> {
    title: &'a str,
    event_date: NaiveDate,
    event_time: &'a str,
}

impl<'a> ProjectFields<'a> {
    fn require(payload: &'a MessagePayload) -> Result<Self, DeliveryError> {
        let title = payload
            .project_title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| missing("project_title"))?;
        let event_date = payload.event_date.ok_or_else(|| missing("event_date"))?;
        let event_time = payload
            .event_time
            .as_deref()
            .ok_or_else(|| missing("event_time"))?;
        Ok(Self {
            title,
            event_date,
            event_time,
        })
    }

    fn html_summary(&self, payload: &MessagePayload) -> String {
        let mut rows = vec![
            row("Project", self.title),
            row("Date", &format_date(self.event_date)),
            row("Time", self.event_time),
        ];
        if let Some(description) = payload.project_description.as_deref() {
            rows.push(row("Description", description));
        }
        if let Some(area) = payload.area.as_deref() {
            rows.push(row("Area", area));
        }
        if let Some(address) = payload.address.as_deref() {
            rows.push(row("Address", address));
        }
        rows.push(row("Guests", &payload.guest_count.to_string()));
        match (
            payload.serve_lead_name.as_deref(),
            payload.serve_lead_email.as_deref(),
        ) {
            (Some(name), Some(email)) => rows.push(row("Serve Lead", &format!("{name} ({email})"))),
            (Some(name), None) => rows.push(row("Serve Lead", name)),
            _ => {}
        }
        format!("<table>{}</table>", rows.concat())
    }
}

fn row(label: &str, value: &str) -> String {
    format!("<tr><th align=\"left\">{label}</th><td>{}</td></tr>", escape(value))
}

fn wrap_html(content: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body>{content}<p>See you there,<br>{ORGANIZATION}</p></body></html>"
    )
}

fn format_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

fn missing(field: &str) -> DeliveryError {
    DeliveryError::Template(format!("payload is missing required field `{field}`"))
}

fn unsupported_reminder(days: i64) -> DeliveryError {
    DeliveryError::Template(format!("unsupported reminder interval: {days} days"))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
