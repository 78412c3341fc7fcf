use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ChannelCounts, ChannelKind, Cohort, MessageType, OutboundMessage, Participant,
    ReminderTemplate, StatusSnapshot, TrainingEntry,
};

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Cohorts whose start/end range contains `as_of`.
    async fn list_active_cohorts(&self, as_of: NaiveDate) -> Result<Vec<Cohort>, StoreError>;

    async fn list_participants(&self, cohort_names: &[String])
        -> Result<Vec<Participant>, StoreError>;
}

#[async_trait]
pub trait TrainingHistory: Send + Sync {
    /// Entries dated `start..=end`.
    async fn get_training_entries(
        &self,
        participant_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrainingEntry>, StoreError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn list_active_templates(
        &self,
        message_type: MessageType,
    ) -> Result<Vec<ReminderTemplate>, StoreError>;

    async fn increment_send_counters(
        &self,
        template_id: &str,
        counts: ChannelCounts,
    ) -> Result<(), StoreError>;

    async fn record_click(&self, template_id: &str, channel: ChannelKind)
        -> Result<(), StoreError>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns `false` when a snapshot for the same report date already exists.
    async fn append_status_snapshot(&self, snapshot: &StatusSnapshot) -> Result<bool, StoreError>;

    /// Snapshots from the `window_weeks` weeks ending on `until`, oldest first.
    async fn get_recent_snapshots(
        &self,
        window_weeks: u32,
        until: NaiveDate,
    ) -> Result<Vec<StatusSnapshot>, StoreError>;
}

#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch_message(&self, message: &OutboundMessage) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TrendChartRenderer: Send + Sync {
    /// Returns a URL where the rendered chart can be fetched.
    async fn render_trend_chart(&self, snapshots: &[StatusSnapshot]) -> Result<String, StoreError>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn MembershipStore>,
    pub history: Arc<dyn TrainingHistory>,
    pub templates: Arc<dyn TemplateStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub charts: Arc<dyn TrendChartRenderer>,
}
