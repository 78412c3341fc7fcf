use std::future::Future;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ChannelCounts, ChannelKind, Cohort, ContactChannel, EntrySource, MessageType,
    OffTargetParticipant, OutboundMessage, Participant, ReminderTemplate, StatusSnapshot,
    TemplateContent, TrainingEntry,
};
use crate::store::{
    MembershipStore, MessageDispatcher, SnapshotStore, TemplateStore, TrainingHistory,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One page of a keyset scan. `next` is `None` on the last page.
pub struct Page<T, C> {
    pub items: Vec<T>,
    pub next: Option<C>,
}

/// Follows cursors until the scan is exhausted, giving up after `max_pages`.
pub async fn collect_pages<T, C, F, Fut>(
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Vec<T>, StoreError>
where
    F: FnMut(Option<C>) -> Fut,
    Fut: Future<Output = Result<Page<T, C>, StoreError>>,
{
    let mut items = Vec::new();
    let mut cursor = None;

    for _ in 0..max_pages {
        let page = fetch_page(cursor.take()).await?;
        items.extend(page.items);
        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }

    Err(StoreError::new(
        413,
        format!("scan did not finish within {max_pages} pages"),
    ))
}

fn to_u32(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::backend(format!("negative {column}: {value}")))
}

fn to_u64(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::backend(format!("negative {column}: {value}")))
}

fn to_i32(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::backend(format!("{column} out of range: {value}")))
}

fn to_i64(value: u64, column: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::backend(format!("{column} out of range: {value}")))
}

fn cohort_from_row(row: &PgRow) -> Result<Option<Cohort>, StoreError> {
    let name: String = row.try_get("name")?;
    let targets: Vec<i32> = row.try_get("weekly_targets")?;
    let weekly_targets = targets
        .into_iter()
        .map(|target| to_u32(target, "weekly_targets"))
        .collect::<Result<Vec<_>, _>>()?;

    match Cohort::new(
        name,
        row.try_get("start_date")?,
        row.try_get("end_date")?,
        weekly_targets,
        to_u32(row.try_get("default_daily_target")?, "default_daily_target")?,
    ) {
        Ok(cohort) => Ok(Some(cohort)),
        Err(err) => {
            warn!(error = %err, "skipping malformed cohort");
            Ok(None)
        }
    }
}

fn participant_from_row(row: &PgRow) -> Result<Option<Participant>, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let email: Option<String> = row.try_get("email")?;
    let phone: Option<String> = row.try_get("phone")?;

    let contact = match (email, phone) {
        (Some(email), None) => ContactChannel::Email(email),
        (None, Some(phone)) => ContactChannel::Phone(phone),
        _ => {
            warn!(participant_id = %id, "participant needs exactly one of email or phone");
            return Ok(None);
        }
    };

    Ok(Some(Participant {
        id,
        cohort_name: row.try_get("cohort_name")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        contact,
        date_joined: row.try_get("date_joined")?,
    }))
}

fn template_from_row(row: &PgRow) -> Result<ReminderTemplate, StoreError> {
    let message_type: String = row.try_get("message_type")?;
    let message_type = message_type
        .parse::<MessageType>()
        .map_err(|err| StoreError::backend(err.to_string()))?;

    Ok(ReminderTemplate {
        id: row.try_get("id")?,
        message_type,
        active: row.try_get("active")?,
        content: TemplateContent {
            email_subject: row.try_get("email_subject")?,
            email_body: row.try_get("email_body")?,
            sms_body: row.try_get("sms_body")?,
        },
        send_count: ChannelCounts {
            email: to_u64(row.try_get("sends_email")?, "sends_email")?,
            sms: to_u64(row.try_get("sends_sms")?, "sends_sms")?,
        },
        click_count: ChannelCounts {
            email: to_u64(row.try_get("clicks_email")?, "clicks_email")?,
            sms: to_u64(row.try_get("clicks_sms")?, "clicks_sms")?,
        },
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<StatusSnapshot, StoreError> {
    let Json(off_target_participants): Json<Vec<OffTargetParticipant>> =
        row.try_get("off_target_participants")?;

    Ok(StatusSnapshot {
        report_date: row.try_get("report_date")?,
        evaluated_count: to_u32(row.try_get("evaluated_count")?, "evaluated_count")?,
        off_target_count: to_u32(row.try_get("off_target_count")?, "off_target_count")?,
        off_target_percent: to_u32(row.try_get("off_target_percent")?, "off_target_percent")?,
        total_minutes_target: to_u64(row.try_get("total_minutes_target")?, "total_minutes_target")?,
        total_minutes_trained: to_u64(
            row.try_get("total_minutes_trained")?,
            "total_minutes_trained",
        )?,
        off_target_participants,
    })
}

/// Postgres-backed membership, history, template and snapshot storage.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    page_size: i64,
    max_pages: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, page_size: i64, max_pages: usize) -> Self {
        Self {
            pool,
            page_size,
            max_pages,
        }
    }

    pub async fn fetch_cohort(&self, name: &str) -> Result<Cohort, StoreError> {
        let row = sqlx::query(
            "SELECT name, start_date, end_date, weekly_targets, default_daily_target \
             FROM training_cycle.cohorts WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("cohort {name}")))?;

        cohort_from_row(&row)?
            .ok_or_else(|| StoreError::backend(format!("cohort {name} is malformed")))
    }

    fn next_cursor<T: Clone>(&self, rows: usize, last: Option<&T>) -> Option<T> {
        if rows as i64 == self.page_size {
            last.cloned()
        } else {
            None
        }
    }

    async fn cohort_page(
        &self,
        as_of: NaiveDate,
        cursor: Option<String>,
    ) -> Result<Page<Cohort, String>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, start_date, end_date, weekly_targets, default_daily_target \
             FROM training_cycle.cohorts \
             WHERE start_date <= $1 AND end_date >= $1 \
             AND ($2::text IS NULL OR name > $2) \
             ORDER BY name LIMIT $3",
        )
        .bind(as_of)
        .bind(cursor)
        .bind(self.page_size)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut last = None;
        for row in &rows {
            last = Some(row.try_get::<String, _>("name")?);
            if let Some(cohort) = cohort_from_row(row)? {
                items.push(cohort);
            }
        }

        Ok(Page {
            next: self.next_cursor(rows.len(), last.as_ref()),
            items,
        })
    }

    async fn participant_page(
        &self,
        cohort_names: &[String],
        cursor: Option<Uuid>,
    ) -> Result<Page<Participant, Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, cohort_name, first_name, last_name, email, phone, date_joined \
             FROM training_cycle.participants \
             WHERE cohort_name = ANY($1) \
             AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id LIMIT $3",
        )
        .bind(cohort_names)
        .bind(cursor)
        .bind(self.page_size)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut last = None;
        for row in &rows {
            last = Some(row.try_get::<Uuid, _>("id")?);
            if let Some(participant) = participant_from_row(row)? {
                items.push(participant);
            }
        }

        Ok(Page {
            next: self.next_cursor(rows.len(), last.as_ref()),
            items,
        })
    }

    async fn template_page(
        &self,
        message_type: &str,
        cursor: Option<String>,
    ) -> Result<Page<ReminderTemplate, String>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, message_type, active, email_subject, email_body, sms_body, \
             sends_email, sends_sms, clicks_email, clicks_sms \
             FROM training_cycle.reminder_templates \
             WHERE active AND message_type = $1 \
             AND ($2::text IS NULL OR id > $2) \
             ORDER BY id LIMIT $3",
        )
        .bind(message_type)
        .bind(cursor)
        .bind(self.page_size)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(template_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let last = items.last().map(|template| template.id.clone());

        Ok(Page {
            next: self.next_cursor(rows.len(), last.as_ref()),
            items,
        })
    }
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn list_active_cohorts(&self, as_of: NaiveDate) -> Result<Vec<Cohort>, StoreError> {
        collect_pages(self.max_pages, |cursor| self.cohort_page(as_of, cursor)).await
    }

    async fn list_participants(
        &self,
        cohort_names: &[String],
    ) -> Result<Vec<Participant>, StoreError> {
        collect_pages(self.max_pages, |cursor| {
            self.participant_page(cohort_names, cursor)
        })
        .await
    }
}

#[async_trait]
impl TrainingHistory for PgStore {
    async fn get_training_entries(
        &self,
        participant_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrainingEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT participant_id, entry_date, minutes_trained, source \
             FROM training_cycle.training_entries \
             WHERE participant_id = $1 AND entry_date BETWEEN $2 AND $3 \
             ORDER BY entry_date",
        )
        .bind(participant_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let source: String = row.try_get("source")?;
            entries.push(TrainingEntry {
                participant_id: row.try_get("participant_id")?,
                date: row.try_get("entry_date")?,
                minutes_trained: to_u32(row.try_get("minutes_trained")?, "minutes_trained")?,
                source: source.parse::<EntrySource>().map_err(StoreError::backend)?,
            });
        }

        Ok(entries)
    }
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn list_active_templates(
        &self,
        message_type: MessageType,
    ) -> Result<Vec<ReminderTemplate>, StoreError> {
        let message_type = message_type.to_string();
        collect_pages(self.max_pages, |cursor| {
            self.template_page(&message_type, cursor)
        })
        .await
    }

    async fn increment_send_counters(
        &self,
        template_id: &str,
        counts: ChannelCounts,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE training_cycle.reminder_templates \
             SET sends_email = sends_email + $2, sends_sms = sends_sms + $3 \
             WHERE id = $1",
        )
        .bind(template_id)
        .bind(to_i64(counts.email, "sends_email")?)
        .bind(to_i64(counts.sms, "sends_sms")?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("template {template_id}")));
        }
        Ok(())
    }

    async fn record_click(
        &self,
        template_id: &str,
        channel: ChannelKind,
    ) -> Result<(), StoreError> {
        let query = match channel {
            ChannelKind::Email => {
                "UPDATE training_cycle.reminder_templates \
                 SET clicks_email = clicks_email + 1 WHERE id = $1"
            }
            ChannelKind::Sms => {
                "UPDATE training_cycle.reminder_templates \
                 SET clicks_sms = clicks_sms + 1 WHERE id = $1"
            }
        };

        let result = sqlx::query(query)
            .bind(template_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("template {template_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn append_status_snapshot(&self, snapshot: &StatusSnapshot) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO training_cycle.status_snapshots
            (report_date, evaluated_count, off_target_count, off_target_percent,
             total_minutes_target, total_minutes_trained, off_target_participants)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (report_date) DO NOTHING
            "#,
        )
        .bind(snapshot.report_date)
        .bind(to_i32(snapshot.evaluated_count, "evaluated_count")?)
        .bind(to_i32(snapshot.off_target_count, "off_target_count")?)
        .bind(to_i32(snapshot.off_target_percent, "off_target_percent")?)
        .bind(to_i64(snapshot.total_minutes_target, "total_minutes_target")?)
        .bind(to_i64(snapshot.total_minutes_trained, "total_minutes_trained")?)
        .bind(Json(&snapshot.off_target_participants))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_recent_snapshots(
        &self,
        window_weeks: u32,
        until: NaiveDate,
    ) -> Result<Vec<StatusSnapshot>, StoreError> {
        let since = until - Duration::weeks(i64::from(window_weeks));
        let rows = sqlx::query(
            "SELECT report_date, evaluated_count, off_target_count, off_target_percent, \
             total_minutes_target, total_minutes_trained, off_target_participants \
             FROM training_cycle.status_snapshots \
             WHERE report_date > $1 AND report_date <= $2 \
             ORDER BY report_date",
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }
}

/// Queues rendered messages for the external email/SMS gateway.
#[derive(Clone)]
pub struct OutboxDispatcher {
    pool: PgPool,
}

impl OutboxDispatcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageDispatcher for OutboxDispatcher {
    async fn dispatch_message(&self, message: &OutboundMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO training_cycle.reminder_outbox (id, channel, contact, subject, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.channel.to_string())
        .bind(&message.contact)
        .bind(message.subject.as_deref())
        .bind(&message.body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub async fn seed(pool: &PgPool, today: NaiveDate) -> anyhow::Result<()> {
    let current_start = today - Duration::days(10);
    let cohorts = vec![
        (
            "feb-2018".to_string(),
            NaiveDate::from_ymd_opt(2018, 2, 19).context("invalid date")?,
            NaiveDate::from_ymd_opt(2018, 4, 8).context("invalid date")?,
        ),
        (
            format!("cohort-{}", current_start.format("%Y%m%d")),
            current_start,
            current_start + Duration::days(48),
        ),
        (
            "admin".to_string(),
            NaiveDate::from_ymd_opt(2018, 1, 1).context("invalid date")?,
            today + Duration::days(365),
        ),
    ];

    for (name, start_date, end_date) in &cohorts {
        sqlx::query(
            r#"
            INSERT INTO training_cycle.cohorts
            (name, start_date, end_date, weekly_targets, default_daily_target)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET start_date = EXCLUDED.start_date, end_date = EXCLUDED.end_date,
                weekly_targets = EXCLUDED.weekly_targets
            "#,
        )
        .bind(name)
        .bind(start_date)
        .bind(end_date)
        .bind(vec![20i32, 25, 30, 35, 40, 40, 40])
        .bind(40i32)
        .execute(pool)
        .await?;
    }

    let current = cohorts[1].0.as_str();
    let participants = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            current,
            "Avery",
            "Lee",
            Some("avery.lee@example.com"),
            None,
            current_start,
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            current,
            "Jules",
            "Moreno",
            None,
            Some("+12125551212"),
            current_start,
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            current,
            "Kiara",
            "Patel",
            Some("kiara.patel@example.com"),
            None,
            current_start + Duration::days(2),
        ),
        (
            Uuid::parse_str("8a1b7c0e-5a55-4c1e-9f0d-1c2b3a4d5e6f")?,
            "admin",
            "Lab",
            "Staff",
            Some("lab@example.com"),
            None,
            current_start,
        ),
    ];

    for (id, cohort, first_name, last_name, email, phone, joined) in &participants {
        sqlx::query(
            r#"
            INSERT INTO training_cycle.participants
            (id, cohort_name, first_name, last_name, email, phone, date_joined)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET cohort_name = EXCLUDED.cohort_name, date_joined = EXCLUDED.date_joined
            "#,
        )
        .bind(id)
        .bind(cohort)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(phone)
        .bind(joined)
        .execute(pool)
        .await?;
    }

    // Avery trains steadily, Jules in bursts, Kiara hardly at all.
    let history: [(usize, &[(i64, i32)]); 3] = [
        (0, &[(1, 25), (2, 25), (3, 30), (5, 20)]),
        (1, &[(2, 5), (2, 5), (2, 10), (4, 5), (4, 5), (4, 5)]),
        (2, &[(6, 15)]),
    ];
    for (index, sessions) in history {
        let participant_id = participants[index].0;
        for (session, (days_ago, minutes)) in sessions.iter().enumerate() {
            let entry_date = today - Duration::days(*days_ago);
            sqlx::query(
                r#"
                INSERT INTO training_cycle.training_entries
                (id, participant_id, entry_date, minutes_trained, source, source_key)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (source_key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(participant_id)
            .bind(entry_date)
            .bind(minutes)
            .bind(EntrySource::UserEntered.to_string())
            .bind(format!("seed-{participant_id}-{entry_date}-{session}"))
            .execute(pool)
            .await?;
        }
    }

    let templates = vec![
        ("remind-01", MessageType::TrainingReminder, "Time to breathe", "Hi {name}, a few minutes of training today keeps you on track."),
        ("remind-02", MessageType::TrainingReminder, "Your daily session", "{name}, your practice session is waiting for you."),
        ("remind-03", MessageType::TrainingReminder, "Quick check-in", "Hi {name}, remember to train and log it when you're done."),
        ("remind-04", MessageType::TrainingReminder, "Keep the streak going", "{name}, consistency matters more than length. Train today!"),
        ("weekly-01", MessageType::StatusReport, "Weekly training status", "This week's adherence summary is below."),
    ];

    for (id, message_type, subject, body) in templates {
        sqlx::query(
            r#"
            INSERT INTO training_cycle.reminder_templates
            (id, message_type, active, email_subject, email_body, sms_body)
            VALUES ($1, $2, TRUE, $3, $4, $4)
            ON CONFLICT (id) DO UPDATE
            SET email_subject = EXCLUDED.email_subject, email_body = EXCLUDED.email_body,
                sms_body = EXCLUDED.sms_body
            "#,
        )
        .bind(id)
        .bind(message_type.to_string())
        .bind(subject)
        .bind(body)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn pages_are_followed_until_exhausted() {
        let requested = RefCell::new(Vec::new());
        let items = collect_pages(10, |cursor: Option<u32>| {
            requested.borrow_mut().push(cursor);
            async move {
                let start = cursor.unwrap_or(0);
                Ok::<_, StoreError>(Page {
                    items: vec![start, start + 1],
                    next: (start < 4).then_some(start + 2),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(*requested.borrow(), vec![None, Some(2), Some(4)]);
    }

    #[tokio::test]
    async fn runaway_scans_are_cut_off() {
        let err = collect_pages(3, |cursor: Option<u32>| async move {
            Ok::<_, StoreError>(Page {
                items: vec![()],
                next: Some(cursor.unwrap_or(0) + 1),
            })
        })
        .await
        .unwrap_err();

        assert_eq!(err.status, 413);
    }

    #[tokio::test]
    async fn page_errors_propagate() {
        let err = collect_pages(3, |_cursor: Option<u32>| async {
            Err::<Page<(), u32>, _>(StoreError::backend("connection reset"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.status, 500);
    }
}
