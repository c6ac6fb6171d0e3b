// src/db/store.rs

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{BranchRecord, JobRecord, MergeOutcome, MergePlan, SalesPersonRecord};

/// Everything the engine needs from the relational store.
///
/// Loads are the read phase and never mutate. `apply_plan` runs one cluster's plan inside
/// exactly one transaction: it either commits all of it or leaves the store untouched.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn load_jobs(&self) -> Result<Vec<JobRecord>>;

    async fn load_branches(&self) -> Result<Vec<BranchRecord>>;

    /// All salespersons, active or not, with their branch links and estimate counts.
    async fn load_sales_persons(&self) -> Result<Vec<SalesPersonRecord>>;

    /// When `audit_run_id` is set, one audit row per eliminated record is written in the
    /// same transaction.
    async fn apply_plan(&self, plan: &MergePlan, audit_run_id: Option<&str>) -> Result<MergeOutcome>;

    async fn insert_sales_person(&self, name: &str, telegram_id: Option<&str>) -> Result<i64>;

    async fn add_sales_person_branch(&self, sales_person_id: i64, branch_id: i64) -> Result<()>;
}
