use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::cache::CachedMembership;
use crate::chart::CsvTrendChart;
use crate::config::EngineConfig;
use crate::db::{OutboxDispatcher, PgStore};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::models::ChannelKind;
use crate::store::{Collaborators, MembershipStore, SnapshotStore};

mod cache;
mod calendar;
mod chart;
mod config;
mod db;
mod eligibility;
mod engine;
mod error;
mod models;
mod report;
mod selector;
mod status;
mod store;
#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(name = "training-cycle-engine")]
#[command(about = "Daily training reminders and weekly adherence reports for training cohorts", long_about = None)]
struct Cli {
    /// JSON engine configuration; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Send training reminders to participants who are falling behind
    Remind {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Build, store and deliver the weekly status report
    Report {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Also write the rendered markdown report here
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the daily reminder cycle, optionally followed by the status report
    Daily {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        with_report: bool,
    },
    /// Show where a date falls in a cohort's training cycle
    Calendar {
        #[arg(long)]
        cohort: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Record a tracked click on a message template
    Click {
        #[arg(long)]
        template: String,
        #[arg(long)]
        channel: String,
    },
    /// List active templates of one message type
    Templates {
        /// `training_reminder` or `status_report`
        #[arg(long = "type", default_value = "training_reminder")]
        message_type: String,
    },
    /// Print recent status snapshots
    Trend {
        #[arg(long, default_value_t = 8)]
        weeks: u32,
    },
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("training_cycle_engine={log_level},warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn collaborators(pool: &PgPool, config: &EngineConfig, cached: bool) -> Collaborators {
    let store = Arc::new(PgStore::new(
        pool.clone(),
        config.page_size,
        config.max_scan_pages,
    ));
    let membership: Arc<dyn MembershipStore> = if cached {
        Arc::new(CachedMembership::new(
            store.clone(),
            config.participant_cache_ttl(),
        ))
    } else {
        store.clone()
    };

    Collaborators {
        membership,
        history: store.clone(),
        templates: store.clone(),
        snapshots: store,
        dispatcher: Arc::new(OutboxDispatcher::new(pool.clone())),
        charts: Arc::new(CsvTrendChart::new(config.chart_dir.clone())),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = EngineConfig::load(cli.config.as_deref())?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let today = Utc::now().date_naive();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, today).await?;
            println!("Seed data inserted.");
        }
        Commands::Remind { date } => {
            let mut engine = Engine::new(collaborators(&pool, &config, false), config);
            let manifest = engine.run_reminder_cycle(date.unwrap_or(today)).await?;
            print_json(&manifest)?;
        }
        Commands::Report { date, out } => {
            let mut engine = Engine::new(collaborators(&pool, &config, false), config);
            let manifest = engine.run_status_report_cycle(date.unwrap_or(today)).await?;
            if let Some(out) = out {
                std::fs::write(&out, &manifest.report)?;
                info!(path = %out.display(), "status report written");
            }
            print_json(&manifest)?;
        }
        Commands::Daily { date, with_report } => {
            let date = date.unwrap_or(today);
            let mut engine = Engine::new(collaborators(&pool, &config, true), config);
            let reminders = engine.run_reminder_cycle(date).await?;
            print_json(&reminders)?;

            if with_report {
                match engine.run_status_report_cycle(date).await {
                    Ok(manifest) => print_json(&manifest)?,
                    Err(EngineError::NoEligibleParticipants { report_date }) => {
                        warn!(%report_date, "no participants to report on");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Commands::Calendar { cohort, date } => {
            let store = PgStore::new(pool.clone(), config.page_size, config.max_scan_pages);
            let cohort = store.fetch_cohort(&cohort).await?;
            print_json(&calendar::resolve(&cohort, date.unwrap_or(today)))?;
        }
        Commands::Click { template, channel } => {
            let channel: ChannelKind = channel.parse()?;
            let engine = Engine::new(collaborators(&pool, &config, false), config);
            engine.record_click(&template, channel).await?;
            println!("Recorded {channel} click for {template}.");
        }
        Commands::Templates { message_type } => {
            let engine = Engine::new(collaborators(&pool, &config, false), config);
            let templates = engine.active_templates(&message_type).await?;

            if templates.is_empty() {
                println!("No active {message_type} templates.");
                return Ok(());
            }

            for template in &templates {
                println!(
                    "- {} ({} email / {} sms sent, {} clicks): {}",
                    template.id,
                    template.send_count.email,
                    template.send_count.sms,
                    template.click_count.total(),
                    template.content.email_subject
                );
            }
        }
        Commands::Trend { weeks } => {
            let store = PgStore::new(pool.clone(), config.page_size, config.max_scan_pages);
            let snapshots = store.get_recent_snapshots(weeks, today).await?;

            if snapshots.is_empty() {
                println!("No snapshots in the last {weeks} weeks.");
                return Ok(());
            }

            for snapshot in &snapshots {
                println!(
                    "- {}: {}/{} off target ({}%), {} of {} minutes",
                    snapshot.report_date,
                    snapshot.off_target_count,
                    snapshot.evaluated_count,
                    snapshot.off_target_percent,
                    snapshot.total_minutes_trained,
                    snapshot.total_minutes_target
                );
            }
        }
    }

    Ok(())
}
