use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::eligibility::EligibilityRule;
use crate::error::EngineError;

/// Engine settings, read from an optional JSON file. Every field has a
/// default so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub eligibility: EligibilityRule,
    /// Cohorts holding staff or test accounts; never reminded or reported on.
    pub admin_cohorts: Vec<String>,
    pub trend_window_weeks: u32,
    pub report_recipients: Vec<String>,
    pub rng_seed: Option<u64>,
    pub page_size: i64,
    pub max_scan_pages: usize,
    /// Upper bound on concurrent training-history reads within one run.
    pub fetch_concurrency: usize,
    pub participant_cache_ttl_secs: u64,
    pub chart_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eligibility: EligibilityRule::default(),
            admin_cohorts: vec!["admin".to_string()],
            trend_window_weeks: 8,
            report_recipients: Vec::new(),
            rng_seed: None,
            page_size: 100,
            max_scan_pages: 50,
            fetch_concurrency: 16,
            participant_cache_ttl_secs: 300,
            chart_dir: PathBuf::from("charts"),
        }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|err| {
                    EngineError::Config(format!("cannot read {}: {err}", path.display()))
                })?;
                Self::from_json(&raw)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw)
            .map_err(|err| EngineError::Config(format!("invalid engine config: {err}")))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.eligibility.window_days == 0 {
            return Err(EngineError::Config(
                "eligibility.window_days must be at least 1".to_string(),
            ));
        }
        if self.page_size <= 0 {
            return Err(EngineError::Config("page_size must be positive".to_string()));
        }
        if self.max_scan_pages == 0 {
            return Err(EngineError::Config(
                "max_scan_pages must be at least 1".to_string(),
            ));
        }
        if self.fetch_concurrency == 0 {
            return Err(EngineError::Config(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.admin_cohorts.iter().any(|name| name.trim().is_empty()) {
            return Err(EngineError::Config(
                "admin_cohorts cannot contain blank names".to_string(),
            ));
        }
        Ok(())
    }

    pub fn participant_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.participant_cache_ttl_secs)
    }
}
