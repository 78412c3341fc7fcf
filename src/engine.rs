use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use futures::future;
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::eligibility::eligible_for_reminder;
use crate::error::EngineError;
use crate::models::{
    ChannelCounts, ChannelKind, Cohort, MessageType, OutboundMessage, Participant,
    ReminderManifest, ReminderRecipient, ReminderTemplate, StatusReportManifest, TrainingEntry,
};
use crate::store::Collaborators;
use crate::{report, selector, status};

pub struct Engine {
    collaborators: Collaborators,
    config: EngineConfig,
    rng: StdRng,
}

struct HistoryFetch {
    entries: HashMap<Uuid, Vec<TrainingEntry>>,
    excluded: Vec<Uuid>,
}

impl Engine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            collaborators,
            config,
            rng,
        }
    }

    pub async fn run_reminder_cycle(
        &mut self,
        today: NaiveDate,
    ) -> Result<ReminderManifest, EngineError> {
        let rule = self.config.eligibility;
        let (_, participants) = self.load_membership(today).await?;
        let (first, last) = rule.window(today);

        let (history, templates) = future::join(
            self.fetch_histories(participants.iter().map(|p| (p.id, first, last))),
            self.collaborators
                .templates
                .list_active_templates(MessageType::TrainingReminder),
        )
        .await;

        let eligible: Vec<&Participant> = participants
            .iter()
            .filter(|participant| {
                history
                    .entries
                    .get(&participant.id)
                    .is_some_and(|entries| {
                        eligible_for_reminder(participant, entries, today, &rule)
                    })
            })
            .collect();

        info!(
            %today,
            participants = participants.len(),
            eligible = eligible.len(),
            excluded = history.excluded.len(),
            "reminder eligibility resolved"
        );

        if eligible.is_empty() {
            return Ok(ReminderManifest {
                run_date: Some(today),
                recipients: Vec::new(),
                excluded: history.excluded,
            });
        }

        let templates = templates?;
        let mut outgoing = Vec::with_capacity(eligible.len());
        for participant in eligible {
            let template = selector::select_template(
                &templates,
                MessageType::TrainingReminder,
                &mut self.rng,
            )?;
            outgoing.push((
                participant.id,
                template.id.clone(),
                report::reminder_message(template, participant),
            ));
        }

        let dispatcher = &self.collaborators.dispatcher;
        let results = future::join_all(outgoing.iter().map(
            |(participant_id, template_id, message)| async move {
                match dispatcher.dispatch_message(message).await {
                    Ok(()) => Some(ReminderRecipient {
                        participant_id: *participant_id,
                        channel: message.channel,
                        template_id: template_id.clone(),
                    }),
                    Err(err) => {
                        warn!(%participant_id, %template_id, error = %err, "reminder dispatch failed");
                        None
                    }
                }
            },
        ))
        .await;

        let recipients: Vec<ReminderRecipient> = results.into_iter().flatten().collect();

        let mut counts: BTreeMap<&str, ChannelCounts> = BTreeMap::new();
        for recipient in &recipients {
            counts
                .entry(recipient.template_id.as_str())
                .or_default()
                .bump(recipient.channel);
        }
        self.apply_send_counters(&counts).await;

        info!(%today, sent = recipients.len(), "reminder cycle complete");

        Ok(ReminderManifest {
            run_date: Some(today),
            recipients,
            excluded: history.excluded,
        })
    }

    pub async fn run_status_report_cycle(
        &mut self,
        today: NaiveDate,
    ) -> Result<StatusReportManifest, EngineError> {
        let (cohorts, participants) = self.load_membership(today).await?;

        let mut by_cohort: HashMap<String, Vec<Participant>> = HashMap::new();
        for participant in participants {
            by_cohort
                .entry(participant.cohort_name.clone())
                .or_default()
                .push(participant);
        }

        let planned =
            status::plan_evaluations(&cohorts, &by_cohort, today, &self.config.admin_cohorts);
        let history = self
            .fetch_histories(planned.iter().map(|plan| {
                let (start, end) = plan.history_range(today);
                (plan.participant.id, start, end)
            }))
            .await;

        let snapshot = status::build_snapshot(
            &cohorts,
            &by_cohort,
            &history.entries,
            today,
            &self.config.admin_cohorts,
        )?;

        info!(
            %today,
            evaluated = snapshot.evaluated_count,
            off_target = snapshot.off_target_count,
            off_target_percent = snapshot.off_target_percent,
            "status snapshot built"
        );

        let (recent, templates) = future::join(
            self.collaborators
                .snapshots
                .get_recent_snapshots(self.config.trend_window_weeks, today),
            self.collaborators
                .templates
                .list_active_templates(MessageType::StatusReport),
        )
        .await;

        let mut earlier = recent?;
        earlier.retain(|point| point.report_date < today);
        let mut series = earlier.clone();
        series.push(snapshot.clone());

        let chart_url = self
            .collaborators
            .charts
            .render_trend_chart(&series)
            .await
            .map_err(|err| EngineError::ExternalService {
                service: "trend chart".to_string(),
                message: err.to_string(),
            })?;

        let templates = templates?;
        let template =
            selector::select_template(&templates, MessageType::StatusReport, &mut self.rng)?
                .clone();

        if !self
            .collaborators
            .snapshots
            .append_status_snapshot(&snapshot)
            .await?
        {
            info!(%today, "snapshot for this date already recorded");
        }

        let body = report::render_status_report(&snapshot, &earlier, &chart_url);
        let messages: Vec<OutboundMessage> = self
            .config
            .report_recipients
            .iter()
            .map(|recipient| report::report_message(&template, recipient, &body))
            .collect();

        let dispatcher = &self.collaborators.dispatcher;
        let results = future::join_all(messages.iter().map(|message| async move {
            match dispatcher.dispatch_message(message).await {
                Ok(()) => Some(message.contact.clone()),
                Err(err) => {
                    warn!(recipient = %message.contact, error = %err, "status report dispatch failed");
                    None
                }
            }
        }))
        .await;
        let delivered_to: Vec<String> = results.into_iter().flatten().collect();

        let mut counts = BTreeMap::new();
        counts.insert(
            template.id.as_str(),
            ChannelCounts {
                email: delivered_to.len() as u64,
                sms: 0,
            },
        );
        self.apply_send_counters(&counts).await;

        Ok(StatusReportManifest {
            snapshot,
            chart_url,
            report_template_id: template.id.clone(),
            delivered_to,
            excluded: history.excluded,
            report: body,
        })
    }

    /// Active templates for a message type named by the caller, e.g.
    /// `training_reminder`. An unknown name is a configuration error.
    pub async fn active_templates(
        &self,
        message_type: &str,
    ) -> Result<Vec<ReminderTemplate>, EngineError> {
        let message_type: MessageType = message_type.parse()?;
        let mut templates = self
            .collaborators
            .templates
            .list_active_templates(message_type)
            .await?;
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(templates)
    }

    pub async fn record_click(
        &self,
        template_id: &str,
        channel: ChannelKind,
    ) -> Result<(), EngineError> {
        self.collaborators
            .templates
            .record_click(template_id, channel)
            .await?;
        Ok(())
    }

    /// Active, non-administrative cohorts and their participants.
    async fn load_membership(
        &self,
        today: NaiveDate,
    ) -> Result<(Vec<Cohort>, Vec<Participant>), EngineError> {
        let cohorts: Vec<Cohort> = self
            .collaborators
            .membership
            .list_active_cohorts(today)
            .await?
            .into_iter()
            .filter(|cohort| !self.config.admin_cohorts.contains(&cohort.name))
            .collect();

        if cohorts.is_empty() {
            return Ok((cohorts, Vec::new()));
        }

        let names: Vec<String> = cohorts.iter().map(|cohort| cohort.name.clone()).collect();
        let participants: Vec<Participant> = self
            .collaborators
            .membership
            .list_participants(&names)
            .await?
            .into_iter()
            .filter(|participant| names.contains(&participant.cohort_name))
            .collect();

        debug!(cohorts = cohorts.len(), participants = participants.len(), "membership loaded");
        Ok((cohorts, participants))
    }

    async fn fetch_histories<I>(&self, requests: I) -> HistoryFetch
    where
        I: IntoIterator<Item = (Uuid, NaiveDate, NaiveDate)>,
    {
        let history = &self.collaborators.history;
        let results: Vec<_> = stream::iter(requests)
            .map(|(participant_id, start, end)| async move {
                (
                    participant_id,
                    history.get_training_entries(participant_id, start, end).await,
                )
            })
            .buffer_unordered(self.config.fetch_concurrency)
            .collect()
            .await;

        let mut fetch = HistoryFetch {
            entries: HashMap::new(),
            excluded: Vec::new(),
        };
        for (participant_id, result) in results {
            match result {
                Ok(entries) => {
                    fetch.entries.insert(participant_id, entries);
                }
                Err(err) => {
                    warn!(
                        %participant_id,
                        status = err.status,
                        error = %err.message,
                        "training history unavailable, excluding participant"
                    );
                    fetch.excluded.push(participant_id);
                }
            }
        }
        fetch.excluded.sort();
        fetch
    }

    async fn apply_send_counters(&self, counts: &BTreeMap<&str, ChannelCounts>) {
        let templates = &self.collaborators.templates;
        future::join_all(counts.iter().filter(|(_, c)| c.total() > 0).map(
            |(template_id, counts)| async move {
                if let Err(err) = templates.increment_send_counters(template_id, *counts).await {
                    warn!(%template_id, error = %err, "send counter update failed");
                }
            },
        ))
        .await;
    }
}
