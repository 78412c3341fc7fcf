use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{Participant, TrainingEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityRule {
    /// Length of the trailing window, ending yesterday.
    pub window_days: u32,
    /// Fewer distinct trained days than this marks a participant as behind.
    pub min_distinct_days: usize,
    /// This many sessions or more in the window counts as fragmented training.
    pub fragmented_session_threshold: usize,
}

impl Default for EligibilityRule {
    fn default() -> Self {
        Self {
            window_days: 7,
            min_distinct_days: 3,
            fragmented_session_threshold: 12,
        }
    }
}

impl EligibilityRule {
    /// Inclusive `(first, last)` dates examined for a run on `today`.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (
            today - Duration::days(i64::from(self.window_days)),
            today - Duration::days(1),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySignals {
    pub trained_yesterday: bool,
    pub distinct_days_trained: usize,
    pub session_count: usize,
}

impl ActivitySignals {
    pub fn needs_reminder(&self, rule: &EligibilityRule) -> bool {
        !self.trained_yesterday
            && (self.distinct_days_trained < rule.min_distinct_days
                || self.session_count >= rule.fragmented_session_threshold)
    }
}

pub fn activity_signals(
    entries: &[TrainingEntry],
    today: NaiveDate,
    rule: &EligibilityRule,
) -> ActivitySignals {
    let (first, last) = rule.window(today);
    let mut trained_days = HashSet::new();
    let mut session_count = 0usize;

    for entry in entries
        .iter()
        .filter(|entry| entry.date >= first && entry.date <= last)
    {
        session_count += 1;
        if entry.minutes_trained > 0 {
            trained_days.insert(entry.date);
        }
    }

    ActivitySignals {
        trained_yesterday: trained_days.contains(&last),
        distinct_days_trained: trained_days.len(),
        session_count,
    }
}

/// Entries belonging to other participants or falling outside the window
/// are ignored.
pub fn eligible_for_reminder(
    participant: &Participant,
    entries: &[TrainingEntry],
    today: NaiveDate,
    rule: &EligibilityRule,
) -> bool {
    let own: Vec<TrainingEntry> = entries
        .iter()
        .filter(|entry| entry.participant_id == participant.id)
        .cloned()
        .collect();

    activity_signals(&own, today, rule).needs_reminder(rule)
}
