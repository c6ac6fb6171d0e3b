// src/consolidation/policy.rs
//
// Per-entity capability sets plugged into the one generic dedup engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;

use crate::clustering::ClusterStrategy;
use crate::consolidation::canonical::{
    select_branch_canonical, select_job_canonical, select_sales_person_canonical,
};
use crate::consolidation::plan::{fold_child_rows, plan_foreign_keys, plan_keyed_children};
use crate::db::store::DedupStore;
use crate::matching::similarity::MAX_SCORE;
use crate::matching::{fuzzy_score, normalize_optional, sales_person_similarity, NormalizationProfile};
use crate::models::{
    BranchRecord, ChildRow, DedupRecord, EntityKind, ForeignKeyRelation, JobRecord, KeyedRelation,
    MergeAction, SalesPersonRecord,
};
use crate::utils::run_config::RunConfig;
use crate::utils::scope_filter::ScopeFilter;

/// Everything that differs between entity types. Scores are always on the 0-100 scale
/// so thresholds compare uniformly inside the engine.
#[async_trait]
pub trait DedupPolicy: Send + Sync {
    type Record: DedupRecord;

    fn kind(&self) -> EntityKind;

    /// The read phase. Returns only records eligible for merging.
    async fn load_candidates(&self, store: &dyn DedupStore) -> Result<Vec<Self::Record>>;

    /// Records are only compared to records with the same scope key.
    fn scope_key(&self, record: &Self::Record) -> Option<i64>;

    fn normalize(&self, record: &Self::Record) -> String;

    fn score(&self, a: &str, b: &str) -> f64;

    fn threshold(&self) -> f64;

    fn strategy(&self) -> ClusterStrategy;

    fn select_canonical<'a>(&self, group: &'a [Self::Record]) -> Option<&'a Self::Record>;

    /// Child moves for every loser. Ordering across losers is fixed up by `plan_merge`.
    fn plan_children(
        &self,
        canonical: &Self::Record,
        losers: &[&Self::Record],
    ) -> Result<Vec<MergeAction>>;

    /// Folds a loser into the survivor in memory, leaving the survivor as a reload would
    /// see it after the merge commits. Dry runs use this to plan later passes.
    fn absorb(&self, survivor: &mut Self::Record, loser: &Self::Record);
}

pub struct JobPolicy {
    threshold: f64,
    strategy: ClusterStrategy,
    scope_filter: ScopeFilter,
}

impl JobPolicy {
    pub fn new(config: &RunConfig, scope_filter: ScopeFilter) -> Self {
        Self {
            threshold: config.job_threshold,
            strategy: config.job_strategy,
            scope_filter,
        }
    }
}

#[async_trait]
impl DedupPolicy for JobPolicy {
    type Record = JobRecord;

    fn kind(&self) -> EntityKind {
        EntityKind::Job
    }

    async fn load_candidates(&self, store: &dyn DedupStore) -> Result<Vec<JobRecord>> {
        let jobs = store.load_jobs().await.context("Failed to load jobs")?;
        let total = jobs.len();
        let candidates: Vec<JobRecord> = jobs
            .into_iter()
            .filter(|j| j.branch_id.is_some() && self.scope_filter.allows(j.branch_id))
            .collect();
        debug!(
            "{} of {} jobs are in scope for deduplication",
            candidates.len(),
            total
        );
        Ok(candidates)
    }

    fn scope_key(&self, record: &JobRecord) -> Option<i64> {
        record.branch_id
    }

    fn normalize(&self, record: &JobRecord) -> String {
        normalize_optional(record.name.as_deref(), NormalizationProfile::Standard)
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        fuzzy_score(a, b)
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn strategy(&self) -> ClusterStrategy {
        self.strategy
    }

    fn select_canonical<'a>(&self, group: &'a [JobRecord]) -> Option<&'a JobRecord> {
        select_job_canonical(group)
    }

    fn plan_children(
        &self,
        canonical: &JobRecord,
        losers: &[&JobRecord],
    ) -> Result<Vec<MergeAction>> {
        let shifts: Vec<(i64, &[ChildRow])> =
            losers.iter().map(|j| (j.id, j.shifts.as_slice())).collect();
        let special: Vec<(i64, &[ChildRow])> = losers
            .iter()
            .map(|j| (j.id, j.special_shifts.as_slice()))
            .collect();

        let mut actions =
            plan_keyed_children(KeyedRelation::Shift, canonical.id, &canonical.shifts, &shifts)?;
        actions.extend(plan_keyed_children(
            KeyedRelation::JobSpecialShift,
            canonical.id,
            &canonical.special_shifts,
            &special,
        )?);
        Ok(actions)
    }

    fn absorb(&self, survivor: &mut JobRecord, loser: &JobRecord) {
        fold_child_rows(KeyedRelation::Shift, &mut survivor.shifts, &loser.shifts);
        fold_child_rows(
            KeyedRelation::JobSpecialShift,
            &mut survivor.special_shifts,
            &loser.special_shifts,
        );
    }
}

/// Branches are few and hand-named, so only exact case-insensitive matches merge. Site
/// and state suffixes are part of a branch's identity and are never stripped.
#[derive(Debug, Default)]
pub struct BranchPolicy;

#[async_trait]
impl DedupPolicy for BranchPolicy {
    type Record = BranchRecord;

    fn kind(&self) -> EntityKind {
        EntityKind::Branch
    }

    async fn load_candidates(&self, store: &dyn DedupStore) -> Result<Vec<BranchRecord>> {
        store.load_branches().await.context("Failed to load branches")
    }

    fn scope_key(&self, _record: &BranchRecord) -> Option<i64> {
        None
    }

    fn normalize(&self, record: &BranchRecord) -> String {
        normalize_optional(record.name.as_deref(), NormalizationProfile::Exact)
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        if !a.is_empty() && a == b {
            MAX_SCORE
        } else {
            0.0
        }
    }

    fn threshold(&self) -> f64 {
        MAX_SCORE
    }

    fn strategy(&self) -> ClusterStrategy {
        ClusterStrategy::ExactNormalized
    }

    fn select_canonical<'a>(&self, group: &'a [BranchRecord]) -> Option<&'a BranchRecord> {
        select_branch_canonical(group)
    }

    fn plan_children(
        &self,
        canonical: &BranchRecord,
        losers: &[&BranchRecord],
    ) -> Result<Vec<MergeAction>> {
        let loser_ids: Vec<i64> = losers.iter().map(|b| b.id).collect();
        let mut actions = plan_foreign_keys(
            &[
                ForeignKeyRelation::EmployeeBranch,
                ForeignKeyRelation::JobBranch,
                ForeignKeyRelation::EstimateBranch,
                ForeignKeyRelation::SalesPersonBranch,
            ],
            canonical.id,
            &loser_ids,
        );
        let links: Vec<(i64, &[ChildRow])> = losers
            .iter()
            .map(|b| (b.id, b.sales_person_links.as_slice()))
            .collect();
        actions.extend(plan_keyed_children(
            KeyedRelation::BranchSalesPersonLink,
            canonical.id,
            &canonical.sales_person_links,
            &links,
        )?);
        Ok(actions)
    }

    fn absorb(&self, survivor: &mut BranchRecord, loser: &BranchRecord) {
        fold_child_rows(
            KeyedRelation::BranchSalesPersonLink,
            &mut survivor.sales_person_links,
            &loser.sales_person_links,
        );
    }
}

pub struct SalesPersonPolicy {
    /// On the light scorer's 0-1 scale.
    threshold: f64,
}

impl SalesPersonPolicy {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            threshold: config.sales_person_threshold,
        }
    }
}

#[async_trait]
impl DedupPolicy for SalesPersonPolicy {
    type Record = SalesPersonRecord;

    fn kind(&self) -> EntityKind {
        EntityKind::SalesPerson
    }

    /// Inactive records are never merged, deleted or revived.
    async fn load_candidates(&self, store: &dyn DedupStore) -> Result<Vec<SalesPersonRecord>> {
        let all = store
            .load_sales_persons()
            .await
            .context("Failed to load salespersons")?;
        Ok(all.into_iter().filter(|s| s.is_active).collect())
    }

    fn scope_key(&self, _record: &SalesPersonRecord) -> Option<i64> {
        None
    }

    fn normalize(&self, record: &SalesPersonRecord) -> String {
        normalize_optional(record.name.as_deref(), NormalizationProfile::Aggressive)
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        sales_person_similarity(a, b) * MAX_SCORE
    }

    fn threshold(&self) -> f64 {
        self.threshold * MAX_SCORE
    }

    fn strategy(&self) -> ClusterStrategy {
        ClusterStrategy::TransitiveExpansion
    }

    fn select_canonical<'a>(&self, group: &'a [SalesPersonRecord]) -> Option<&'a SalesPersonRecord> {
        select_sales_person_canonical(group)
    }

    fn plan_children(
        &self,
        canonical: &SalesPersonRecord,
        losers: &[&SalesPersonRecord],
    ) -> Result<Vec<MergeAction>> {
        let loser_ids: Vec<i64> = losers.iter().map(|s| s.id).collect();
        let mut actions = plan_foreign_keys(
            &[ForeignKeyRelation::EstimateSalesPerson],
            canonical.id,
            &loser_ids,
        );
        let links: Vec<(i64, &[ChildRow])> =
            losers.iter().map(|s| (s.id, s.branches.as_slice())).collect();
        actions.extend(plan_keyed_children(
            KeyedRelation::SalesPersonBranchLink,
            canonical.id,
            &canonical.branches,
            &links,
        )?);
        Ok(actions)
    }

    fn absorb(&self, survivor: &mut SalesPersonRecord, loser: &SalesPersonRecord) {
        survivor.estimate_count += loser.estimate_count;
        fold_child_rows(
            KeyedRelation::SalesPersonBranchLink,
            &mut survivor.branches,
            &loser.branches,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::plan::plan_merge;

    fn job(id: i64, name: &str, branch: i64, shifts: Vec<ChildRow>) -> JobRecord {
        JobRecord {
            id,
            name: Some(name.to_string()),
            branch_id: Some(branch),
            closing_date: None,
            performance_status: None,
            shifts,
            special_shifts: vec![],
        }
    }

    #[test]
    fn test_job_normalization_strips_qualifiers() {
        let policy = JobPolicy::new(&RunConfig::default(), ScopeFilter::default());
        let a = policy.normalize(&job(1, "Smith Attic - REVISED", 1, vec![]));
        let b = policy.normalize(&job(2, "Smith Attic", 1, vec![]));
        assert_eq!(a, b);
        assert!(policy.score(&a, &b) >= policy.threshold());
    }

    #[test]
    fn test_job_plan_moves_children_before_delete() {
        let policy = JobPolicy::new(&RunConfig::default(), ScopeFilter::default());
        let group = vec![
            job(10, "Smith Attic - REVISED", 1, vec![ChildRow::new(7, Some(4.0))]),
            job(
                22,
                "Smith Attic",
                1,
                vec![ChildRow::new(7, Some(6.0)), ChildRow::new(8, Some(1.0))],
            ),
        ];
        let plan = plan_merge(&policy, &group).unwrap();

        assert_eq!(plan.canonical_id, 22);
        assert_eq!(plan.loser_ids, vec![10]);
        assert!(matches!(
            plan.actions[0],
            MergeAction::FoldChild { key: 7, from_id: 10, to_id: 22, hours: Some(h), .. } if h == 4.0
        ));
        assert_eq!(
            plan.actions.last(),
            Some(&MergeAction::DeleteParent {
                kind: EntityKind::Job,
                id: 10
            })
        );
    }

    #[test]
    fn test_sales_person_threshold_is_scaled() {
        let policy = SalesPersonPolicy::new(&RunConfig::default());
        assert!((policy.threshold() - 86.0).abs() < 1e-9);
        assert_eq!(policy.score("eben w", "eben w"), MAX_SCORE);
    }

    #[test]
    fn test_branch_matches_case_insensitively_only() {
        let policy = BranchPolicy;
        let rec = |name: &str| BranchRecord {
            id: 1,
            name: Some(name.to_string()),
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            sales_person_links: vec![],
        };
        let a = policy.normalize(&rec("Denver "));
        let b = policy.normalize(&rec("denver"));
        let c = policy.normalize(&rec("Denver North"));
        assert_eq!(policy.score(&a, &b), MAX_SCORE);
        assert_eq!(policy.score(&a, &c), 0.0);
        assert_eq!(policy.score("", ""), 0.0);
    }

    #[test]
    fn test_branches_in_different_states_stay_apart() {
        let policy = BranchPolicy;
        let rec = |name: &str| BranchRecord {
            id: 1,
            name: Some(name.to_string()),
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            sales_person_links: vec![],
        };
        let or = policy.normalize(&rec("Portland, OR"));
        let me = policy.normalize(&rec("Portland, ME"));
        assert_eq!(or, "portland, or");
        assert_eq!(policy.score(&or, &me), 0.0);
        assert_eq!(policy.normalize(&rec("Denver Metro, CO")), "denver metro, co");
    }

    #[test]
    fn test_absorb_folds_hours_and_counts() {
        let policy = JobPolicy::new(&RunConfig::default(), ScopeFilter::default());
        let mut survivor = job(2, "Jonas Roof", 1, vec![ChildRow::new(5, Some(2.0))]);
        let loser = job(
            1,
            "Jones Roof",
            1,
            vec![ChildRow::new(5, Some(1.0)), ChildRow::new(6, Some(3.0))],
        );
        policy.absorb(&mut survivor, &loser);
        assert_eq!(
            survivor.shifts,
            vec![ChildRow::new(5, Some(3.0)), ChildRow::new(6, Some(3.0))]
        );

        let sp_policy = SalesPersonPolicy::new(&RunConfig::default());
        let person = |id: i64, estimates: i64, branches: Vec<ChildRow>| SalesPersonRecord {
            id,
            name: Some("Eben W".into()),
            telegram_id: None,
            is_active: true,
            branches,
            estimate_count: estimates,
        };
        let mut keep = person(1, 2, vec![ChildRow::link(1)]);
        sp_policy.absorb(&mut keep, &person(2, 3, vec![ChildRow::link(1), ChildRow::link(4)]));
        assert_eq!(keep.estimate_count, 5);
        assert_eq!(keep.branches, vec![ChildRow::link(1), ChildRow::link(4)]);
    }
}
