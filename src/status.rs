use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use crate::calendar;
use crate::error::EngineError;
use crate::models::{Cohort, OffTargetParticipant, Participant, StatusSnapshot, TrainingEntry};

/// A participant scheduled for evaluation in a weekly status run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEvaluation {
    pub participant: Participant,
    pub cohort: String,
    /// Cohort week start, or the participant's join date when they started
    /// part-way through the first week.
    pub week_start: NaiveDate,
    pub daily_target: u32,
}

impl PlannedEvaluation {
    /// Range of training history needed, week start through yesterday.
    pub fn history_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (self.week_start, today - Duration::days(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatedParticipant {
    pub participant_id: Uuid,
    pub name: String,
    pub cohort: String,
    pub trained: u32,
    pub target: u32,
}

impl EvaluatedParticipant {
    pub fn is_off_target(&self) -> bool {
        self.trained < self.target
    }
}

/// Participants to evaluate on `today`.
///
/// Administrative cohorts and cohorts on their first day of a week are
/// skipped, as is anyone whose effective start is today or later.
pub fn plan_evaluations(
    cohorts: &[Cohort],
    participants_by_cohort: &HashMap<String, Vec<Participant>>,
    today: NaiveDate,
    admin_cohorts: &[String],
) -> Vec<PlannedEvaluation> {
    let mut planned = Vec::new();

    for cohort in cohorts {
        if admin_cohorts.iter().any(|name| name == &cohort.name) {
            continue;
        }

        let day = calendar::resolve(cohort, today);
        let Some(week) = day.week_index else {
            continue;
        };
        if day.is_first_day_of_week {
            continue;
        }

        let cohort_week_start = calendar::week_start(cohort, week);
        let Some(participants) = participants_by_cohort.get(&cohort.name) else {
            continue;
        };

        for participant in participants {
            let week_start = if week == 0 && participant.date_joined > cohort_week_start {
                participant.date_joined
            } else {
                cohort_week_start
            };
            if week_start >= today {
                continue;
            }

            planned.push(PlannedEvaluation {
                participant: participant.clone(),
                cohort: cohort.name.clone(),
                week_start,
                daily_target: day.daily_target,
            });
        }
    }

    planned
}

/// Scores planned participants against their week-to-date history.
///
/// Participants missing from `history` (their fetch failed) are left out.
/// Participants sharing a cohort and effective start share one target.
pub fn evaluate(
    planned: &[PlannedEvaluation],
    history: &HashMap<Uuid, Vec<TrainingEntry>>,
    today: NaiveDate,
) -> Vec<EvaluatedParticipant> {
    let yesterday = today - Duration::days(1);
    let mut groups: BTreeMap<(&str, NaiveDate), Vec<&PlannedEvaluation>> = BTreeMap::new();

    for plan in planned {
        groups
            .entry((plan.cohort.as_str(), plan.week_start))
            .or_default()
            .push(plan);
    }

    let mut evaluated = Vec::new();
    for ((cohort, week_start), members) in groups {
        let elapsed = u32::try_from((today - week_start).num_days().max(0)).unwrap_or(u32::MAX);

        for plan in members {
            let Some(entries) = history.get(&plan.participant.id) else {
                continue;
            };
            let trained = entries
                .iter()
                .filter(|entry| entry.participant_id == plan.participant.id)
                .filter(|entry| entry.date >= week_start && entry.date <= yesterday)
                .fold(0u32, |total, entry| total.saturating_add(entry.minutes_trained));

            evaluated.push(EvaluatedParticipant {
                participant_id: plan.participant.id,
                name: plan.participant.display_name(),
                cohort: cohort.to_string(),
                trained,
                target: elapsed.saturating_mul(plan.daily_target),
            });
        }
    }

    evaluated
}

pub fn snapshot_from_evaluations(
    report_date: NaiveDate,
    evaluated: &[EvaluatedParticipant],
) -> Result<StatusSnapshot, EngineError> {
    if evaluated.is_empty() {
        return Err(EngineError::NoEligibleParticipants { report_date });
    }

    let mut off_target: Vec<OffTargetParticipant> = evaluated
        .iter()
        .filter(|participant| participant.is_off_target())
        .map(|participant| OffTargetParticipant {
            name: participant.name.clone(),
            trained: participant.trained,
            target: participant.target,
            cohort: participant.cohort.clone(),
        })
        .collect();
    off_target.sort_by(|a, b| a.cohort.cmp(&b.cohort).then_with(|| a.name.cmp(&b.name)));

    let total = evaluated.len() as u32;
    let off_target_count = off_target.len() as u32;

    Ok(StatusSnapshot {
        report_date,
        evaluated_count: total,
        off_target_count,
        off_target_percent: percent(off_target_count, total),
        total_minutes_target: evaluated.iter().map(|p| u64::from(p.target)).sum(),
        total_minutes_trained: evaluated.iter().map(|p| u64::from(p.trained)).sum(),
        off_target_participants: off_target,
    })
}

pub fn build_snapshot(
    cohorts: &[Cohort],
    participants_by_cohort: &HashMap<String, Vec<Participant>>,
    history: &HashMap<Uuid, Vec<TrainingEntry>>,
    today: NaiveDate,
    admin_cohorts: &[String],
) -> Result<StatusSnapshot, EngineError> {
    let planned = plan_evaluations(cohorts, participants_by_cohort, today, admin_cohorts);
    let evaluated = evaluate(&planned, history, today);
    snapshot_from_evaluations(today, &evaluated)
}

fn percent(part: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(part) / f64::from(total) * 100.0).round() as u32
}
