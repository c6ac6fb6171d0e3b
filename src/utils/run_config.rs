// src/utils/run_config.rs

use anyhow::{bail, Context, Result};
use log::info;
use std::env;
use std::str::FromStr;

use crate::clustering::ClusterStrategy;

/// Tunables for a dedup run, read from the environment. CLI flags override some of
/// these after loading.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Fuzzy score (0-100) at which two job names in one branch are the same job.
    pub job_threshold: f64,
    pub job_strategy: ClusterStrategy,
    /// Light-scorer similarity (0-1) at which two active salespersons are one person.
    pub sales_person_threshold: f64,
    /// Light-scorer similarity (0-1) at which a registration reuses an existing record.
    pub registration_threshold: f64,
    /// Upper bound on stabilizing passes in apply mode.
    pub max_passes: usize,
    pub audit_enabled: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            job_threshold: 85.0,
            job_strategy: ClusterStrategy::SeedOnly,
            sales_person_threshold: 0.86,
            registration_threshold: 0.7,
            max_passes: 3,
            audit_enabled: false,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            job_threshold: env_or("DEDUP_JOB_THRESHOLD", defaults.job_threshold)?,
            job_strategy: env_or("DEDUP_JOB_STRATEGY", defaults.job_strategy)?,
            sales_person_threshold: env_or(
                "DEDUP_SALES_PERSON_THRESHOLD",
                defaults.sales_person_threshold,
            )?,
            registration_threshold: env_or(
                "DEDUP_SALES_PERSON_REGISTRATION_THRESHOLD",
                defaults.registration_threshold,
            )?,
            max_passes: env_or("DEDUP_MAX_PASSES", defaults.max_passes)?,
            audit_enabled: env_or("DEDUP_AUDIT_ENABLED", defaults.audit_enabled)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.job_threshold) {
            bail!("DEDUP_JOB_THRESHOLD must be within 0..=100, got {}", self.job_threshold);
        }
        for (name, value) in [
            ("DEDUP_SALES_PERSON_THRESHOLD", self.sales_person_threshold),
            ("DEDUP_SALES_PERSON_REGISTRATION_THRESHOLD", self.registration_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within 0..=1, got {}", name, value);
            }
        }
        if self.max_passes == 0 {
            bail!("DEDUP_MAX_PASSES must be at least 1");
        }
        Ok(())
    }

    pub fn log_config(&self) {
        info!(
            "⚙️  Job matching: threshold={:.1}, strategy={}",
            self.job_threshold, self.job_strategy
        );
        info!(
            "⚙️  Salesperson matching: threshold={:.2}, registration threshold={:.2}",
            self.sales_person_threshold, self.registration_threshold
        );
        info!(
            "⚙️  Max passes: {}, audit table: {}",
            self.max_passes,
            if self.audit_enabled { "enabled" } else { "disabled" }
        );
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid value '{}' for {}", raw, key)),
        _ => Ok(default),
    }
}
