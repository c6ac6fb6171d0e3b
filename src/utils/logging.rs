// src/utils/logging.rs - Logging helpers for dedup runs
use log::{debug, info, warn};
use std::time::Instant;

use crate::models::{ClusterFailure, EntityKind, MergeAction, MergePlan, RunMode, RunReport};

#[derive(Clone)]
pub struct DedupLogger {
    kind_name: &'static str,
    kind_emoji: &'static str,
    start_time: Instant,
}

impl DedupLogger {
    pub fn new(kind: EntityKind) -> Self {
        let (kind_name, kind_emoji) = match kind {
            EntityKind::Job => ("JOB", "🧰"),
            EntityKind::Branch => ("BRANCH", "🏢"),
            EntityKind::SalesPerson => ("SALES_PERSON", "👤"),
        };
        Self {
            kind_name,
            kind_emoji,
            start_time: Instant::now(),
        }
    }

    pub fn log_start(&self, run_id: &str, mode: RunMode) {
        info!(
            "[{}] {} 🚀 Starting {} deduplication (run ID: {}, mode: {})",
            self.kind_name,
            self.kind_emoji,
            self.kind_name.to_lowercase(),
            run_id,
            mode
        );
        if mode.is_dry_run() {
            info!(
                "[{}] {} 🔒 Dry run: nothing will be written",
                self.kind_name, self.kind_emoji
            );
        }
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        match details {
            Some(details) => info!(
                "[{}] {} 🔄 Phase: {} - {} [+{:.1}s]",
                self.kind_name,
                self.kind_emoji,
                phase,
                details,
                elapsed.as_secs_f32()
            ),
            None => info!(
                "[{}] {} 🔄 Phase: {} [+{:.1}s]",
                self.kind_name,
                self.kind_emoji,
                phase,
                elapsed.as_secs_f32()
            ),
        }
    }

    pub fn log_data_loaded(&self, count: usize, data_type: &str) {
        info!(
            "[{}] {} 📊 Found {} {} records from database",
            self.kind_name, self.kind_emoji, count, data_type
        );
    }

    pub fn log_groups_found(&self, pass: usize, groups: usize, records: usize) {
        if groups > 0 {
            info!(
                "[{}] {} 🎯 Pass {}: {} duplicate groups covering {} records",
                self.kind_name, self.kind_emoji, pass, groups, records
            );
        } else {
            info!(
                "[{}] {} ✨ Pass {}: no duplicate groups found",
                self.kind_name, self.kind_emoji, pass
            );
        }
    }

    pub fn log_group(&self, plan: &MergePlan, names: &[String]) {
        info!(
            "[{}] {} 🔗 Keep {} and absorb {:?} ({})",
            self.kind_name,
            self.kind_emoji,
            plan.canonical_id,
            plan.loser_ids,
            names.join(" | ")
        );
    }

    /// One audit line per row that is (or would be) moved, folded or deleted.
    pub fn log_action(&self, action: &MergeAction) {
        debug!(
            "[{}] {}    {}",
            self.kind_name,
            self.kind_emoji,
            action.describe()
        );
    }

    pub fn log_cluster_failure(&self, failure: &ClusterFailure) {
        warn!(
            "[{}] {} ⚠️  Cluster {:?} (canonical {}) rolled back: {}",
            self.kind_name, self.kind_emoji, failure.member_ids, failure.canonical_id, failure.error
        );
    }

    pub fn log_not_converged(&self, passes: usize) {
        warn!(
            "[{}] {} ⚠️  Still merging after {} pass(es); raise DEDUP_MAX_PASSES or run again to finish",
            self.kind_name, self.kind_emoji, passes
        );
    }

    pub fn log_completion(&self, report: &RunReport) {
        let duration = self.start_time.elapsed();
        info!(
            "[{}] {} 🎉 COMPLETED in {:.2?} after {} pass(es)",
            self.kind_name, self.kind_emoji, duration, report.passes
        );
        info!(
            "[{}] {} 📊 Results: {} groups found, {} merged, {} records {}",
            self.kind_name,
            self.kind_emoji,
            report.groups_found,
            report.merged_count,
            if report.mode.is_dry_run() {
                report.duplicates_found()
            } else {
                report.deleted_count
            },
            if report.mode.is_dry_run() {
                "would be deleted"
            } else {
                "deleted"
            }
        );
        if !report.errors.is_empty() {
            warn!(
                "[{}] {} ⚠️  {} clusters failed and were left untouched",
                self.kind_name,
                self.kind_emoji,
                report.errors.len()
            );
        }
    }
}
