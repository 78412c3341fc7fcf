use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ChannelCounts, ChannelKind, Cohort, ContactChannel, EntrySource, MessageType,
    OutboundMessage, Participant, ReminderTemplate, StatusSnapshot, TemplateContent,
    TrainingEntry,
};
use crate::store::{
    MembershipStore, MessageDispatcher, SnapshotStore, TemplateStore, TrainingHistory,
    TrendChartRenderer,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn participant(cohort: &str, first_name: &str) -> Participant {
    Participant {
        id: Uuid::new_v4(),
        cohort_name: cohort.to_string(),
        first_name: first_name.to_string(),
        last_name: "Tester".to_string(),
        contact: ContactChannel::Email(format!("{}@example.com", first_name.to_lowercase())),
        date_joined: date(2018, 2, 19),
    }
}

pub fn sms_participant(cohort: &str, first_name: &str, phone: &str) -> Participant {
    Participant {
        contact: ContactChannel::Phone(phone.to_string()),
        ..participant(cohort, first_name)
    }
}

pub fn entry(participant: &Participant, on: NaiveDate, minutes: u32) -> TrainingEntry {
    TrainingEntry {
        participant_id: participant.id,
        date: on,
        minutes_trained: minutes,
        source: EntrySource::UserEntered,
    }
}

pub fn template(id: &str, message_type: MessageType) -> ReminderTemplate {
    ReminderTemplate {
        id: id.to_string(),
        message_type,
        active: true,
        content: TemplateContent {
            email_subject: format!("{id} subject"),
            email_body: "Hi {name}, time to train!".to_string(),
            sms_body: "{name} - quick reminder to train today.".to_string(),
        },
        send_count: ChannelCounts::default(),
        click_count: ChannelCounts::default(),
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    cohorts: Mutex<Vec<Cohort>>,
    participants: Mutex<Vec<Participant>>,
    entries: Mutex<Vec<TrainingEntry>>,
    templates: Mutex<Vec<ReminderTemplate>>,
    snapshots: Mutex<Vec<StatusSnapshot>>,
    sent: Mutex<Vec<OutboundMessage>>,
    failing_history: Mutex<HashSet<Uuid>>,
    failing_contacts: Mutex<HashSet<String>>,
    chart_failure: Mutex<Option<String>>,
    participant_fetches: AtomicUsize,
}

impl InMemoryStore {
    pub fn add_cohort(&self, cohort: Cohort) {
        self.cohorts.lock().unwrap().push(cohort);
    }

    pub fn add_participant(&self, participant: Participant) {
        self.participants.lock().unwrap().push(participant);
    }

    pub fn add_entry(&self, entry: TrainingEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn add_template(&self, template: ReminderTemplate) {
        self.templates.lock().unwrap().push(template);
    }

    pub fn add_snapshot(&self, snapshot: StatusSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    pub fn fail_history_for(&self, participant_id: Uuid) {
        self.failing_history.lock().unwrap().insert(participant_id);
    }

    pub fn fail_dispatch_to(&self, contact: &str) {
        self.failing_contacts.lock().unwrap().insert(contact.to_string());
    }

    pub fn fail_charts(&self, message: &str) {
        *self.chart_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn snapshots(&self) -> Vec<StatusSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn template(&self, id: &str) -> Option<ReminderTemplate> {
        self.templates
            .lock()
            .unwrap()
            .iter()
            .find(|template| template.id == id)
            .cloned()
    }

    pub fn participant_fetches(&self) -> usize {
        self.participant_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn list_active_cohorts(&self, as_of: NaiveDate) -> Result<Vec<Cohort>, StoreError> {
        Ok(self
            .cohorts
            .lock()
            .unwrap()
            .iter()
            .filter(|cohort| cohort.start_date <= as_of && cohort.end_date >= as_of)
            .cloned()
            .collect())
    }

    async fn list_participants(
        &self,
        cohort_names: &[String],
    ) -> Result<Vec<Participant>, StoreError> {
        self.participant_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self
            .participants
            .lock()
            .unwrap()
            .iter()
            .filter(|participant| cohort_names.contains(&participant.cohort_name))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TrainingHistory for InMemoryStore {
    async fn get_training_entries(
        &self,
        participant_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrainingEntry>, StoreError> {
        if self.failing_history.lock().unwrap().contains(&participant_id) {
            return Err(StoreError::backend(format!(
                "history unavailable for {participant_id}"
            )));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.participant_id == participant_id)
            .filter(|entry| entry.date >= start && entry.date <= end)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TemplateStore for InMemoryStore {
    async fn list_active_templates(
        &self,
        message_type: MessageType,
    ) -> Result<Vec<ReminderTemplate>, StoreError> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .filter(|template| template.active && template.message_type == message_type)
            .cloned()
            .collect())
    }

    async fn increment_send_counters(
        &self,
        template_id: &str,
        counts: ChannelCounts,
    ) -> Result<(), StoreError> {
        let mut templates = self.templates.lock().unwrap();
        let template = templates
            .iter_mut()
            .find(|template| template.id == template_id)
            .ok_or_else(|| StoreError::not_found(format!("template {template_id}")))?;
        template.send_count.email += counts.email;
        template.send_count.sms += counts.sms;
        Ok(())
    }

    async fn record_click(
        &self,
        template_id: &str,
        channel: ChannelKind,
    ) -> Result<(), StoreError> {
        let mut templates = self.templates.lock().unwrap();
        let template = templates
            .iter_mut()
            .find(|template| template.id == template_id)
            .ok_or_else(|| StoreError::not_found(format!("template {template_id}")))?;
        template.click_count.bump(channel);
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn append_status_snapshot(&self, snapshot: &StatusSnapshot) -> Result<bool, StoreError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        if snapshots
            .iter()
            .any(|existing| existing.report_date == snapshot.report_date)
        {
            return Ok(false);
        }
        snapshots.push(snapshot.clone());
        Ok(true)
    }

    async fn get_recent_snapshots(
        &self,
        window_weeks: u32,
        until: NaiveDate,
    ) -> Result<Vec<StatusSnapshot>, StoreError> {
        let since = until - chrono::Duration::weeks(i64::from(window_weeks));
        let mut recent: Vec<StatusSnapshot> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|snapshot| snapshot.report_date > since && snapshot.report_date <= until)
            .cloned()
            .collect();
        recent.sort_by_key(|snapshot| snapshot.report_date);
        Ok(recent)
    }
}

#[async_trait]
impl MessageDispatcher for InMemoryStore {
    async fn dispatch_message(&self, message: &OutboundMessage) -> Result<(), StoreError> {
        if self.failing_contacts.lock().unwrap().contains(&message.contact) {
            return Err(StoreError::new(502, format!("gateway rejected {}", message.contact)));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl TrendChartRenderer for InMemoryStore {
    async fn render_trend_chart(&self, snapshots: &[StatusSnapshot]) -> Result<String, StoreError> {
        if let Some(message) = self.chart_failure.lock().unwrap().clone() {
            return Err(StoreError::backend(message));
        }
        Ok(format!("memory://charts/{}-points.png", snapshots.len()))
    }
}
