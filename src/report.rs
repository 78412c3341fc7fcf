use std::fmt::Write;

use crate::models::{ChannelKind, OutboundMessage, Participant, ReminderTemplate, StatusSnapshot};

pub fn personalize(text: &str, first_name: &str) -> String {
    text.replace("{name}", first_name)
}

pub fn reminder_message(template: &ReminderTemplate, participant: &Participant) -> OutboundMessage {
    let content = &template.content;
    let name = &participant.first_name;
    let channel = participant.contact.kind();
    let (subject, body) = match channel {
        ChannelKind::Email => (
            Some(personalize(&content.email_subject, name)),
            personalize(&content.email_body, name),
        ),
        ChannelKind::Sms => (None, personalize(&content.sms_body, name)),
    };

    OutboundMessage {
        channel,
        contact: participant.contact.address().to_string(),
        subject,
        body,
    }
}

pub fn report_message(template: &ReminderTemplate, recipient: &str, body: &str) -> OutboundMessage {
    OutboundMessage {
        channel: ChannelKind::Email,
        contact: recipient.to_string(),
        subject: Some(template.content.email_subject.clone()),
        body: format!("{}\n\n{}", template.content.email_body, body),
    }
}

pub fn render_status_report(
    snapshot: &StatusSnapshot,
    trend: &[StatusSnapshot],
    chart_url: &str,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Weekly Training Status");
    let _ = writeln!(output, "Report date {}", snapshot.report_date);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(
        output,
        "- {} of {} participants off target ({}%)",
        snapshot.off_target_count, snapshot.evaluated_count, snapshot.off_target_percent
    );
    let _ = writeln!(
        output,
        "- {} minutes trained against a target of {}",
        snapshot.total_minutes_trained, snapshot.total_minutes_target
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Off-Target Participants");

    if snapshot.off_target_participants.is_empty() {
        let _ = writeln!(output, "Everyone is on target this week.");
    } else {
        for participant in snapshot.off_target_participants.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} of {} minutes",
                participant.name, participant.cohort, participant.trained, participant.target
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Trend");

    if trend.is_empty() {
        let _ = writeln!(output, "No earlier snapshots recorded.");
    } else {
        for point in trend.iter() {
            let _ = writeln!(
                output,
                "- {}: {}% off target ({} / {} minutes)",
                point.report_date,
                point.off_target_percent,
                point.total_minutes_trained,
                point.total_minutes_target
            );
        }
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "Chart: {chart_url}");

    output
}
