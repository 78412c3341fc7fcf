use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weekly_targets: Vec<u32>,
    pub default_daily_target: u32,
}

impl Cohort {
    /// Rejects cohorts whose start date falls after their end date.
    pub fn new(
        name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        weekly_targets: Vec<u32>,
        default_daily_target: u32,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        if start_date > end_date {
            return Err(EngineError::InvalidCohort {
                name,
                start: start_date,
                end: end_date,
            });
        }

        Ok(Self {
            name,
            start_date,
            end_date,
            weekly_targets,
            default_daily_target,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum ContactChannel {
    Email(String),
    Phone(String),
}

impl ContactChannel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Email(_) => ChannelKind::Email,
            Self::Phone(_) => ChannelKind::Sms,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Email(address) | Self::Phone(address) => address,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
        }
    }
}

impl FromStr for ChannelKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" | "phone" => Ok(Self::Sms),
            other => Err(EngineError::Config(format!("unknown channel: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub cohort_name: String,
    pub first_name: String,
    pub last_name: String,
    pub contact: ContactChannel,
    pub date_joined: NaiveDate,
}

impl Participant {
    /// First name plus last initial, e.g. "Avery L.".
    pub fn display_name(&self) -> String {
        match self.last_name.chars().next() {
            Some(initial) => format!("{} {}.", self.first_name, initial),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    UserEntered,
    DeviceImported,
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserEntered => write!(f, "user_entered"),
            Self::DeviceImported => write!(f, "device_imported"),
        }
    }
}

impl FromStr for EntrySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_entered" => Ok(Self::UserEntered),
            "device_imported" => Ok(Self::DeviceImported),
            _ => Err(format!("Unknown entry source: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingEntry {
    pub participant_id: Uuid,
    pub date: NaiveDate,
    pub minutes_trained: u32,
    pub source: EntrySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TrainingReminder,
    StatusReport,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrainingReminder => write!(f, "training_reminder"),
            Self::StatusReport => write!(f, "status_report"),
        }
    }
}

impl FromStr for MessageType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "training_reminder" | "training-reminder" => Ok(Self::TrainingReminder),
            "status_report" | "status-report" => Ok(Self::StatusReport),
            other => Err(EngineError::Config(format!(
                "unsupported message type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContent {
    pub email_subject: String,
    pub email_body: String,
    pub sms_body: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    pub email: u64,
    pub sms: u64,
}

impl ChannelCounts {
    pub fn bump(&mut self, channel: ChannelKind) {
        match channel {
            ChannelKind::Email => self.email += 1,
            ChannelKind::Sms => self.sms += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.email + self.sms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderTemplate {
    pub id: String,
    pub message_type: MessageType,
    pub active: bool,
    pub content: TemplateContent,
    pub send_count: ChannelCounts,
    pub click_count: ChannelCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffTargetParticipant {
    pub name: String,
    pub trained: u32,
    pub target: u32,
    pub cohort: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub report_date: NaiveDate,
    pub evaluated_count: u32,
    pub off_target_count: u32,
    pub off_target_percent: u32,
    pub total_minutes_target: u64,
    pub total_minutes_trained: u64,
    pub off_target_participants: Vec<OffTargetParticipant>,
}

/// A message handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: ChannelKind,
    pub contact: String,
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecipient {
    pub participant_id: Uuid,
    pub channel: ChannelKind,
    pub template_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderManifest {
    pub run_date: Option<NaiveDate>,
    pub recipients: Vec<ReminderRecipient>,
    pub excluded: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReportManifest {
    pub snapshot: StatusSnapshot,
    pub chart_url: String,
    pub report_template_id: String,
    pub delivered_to: Vec<String>,
    pub excluded: Vec<Uuid>,
    #[serde(skip)]
    pub report: String,
}
