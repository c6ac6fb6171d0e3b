// src/consolidation/runner.rs
//
// Drives one entity type through read -> cluster -> plan -> (apply). Clusters are merged
// one at a time, each in its own transaction; a failed cluster is recorded and skipped.

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashSet;
use uuid::Uuid;

use crate::clustering::{ClusterBuilder, ClusterInput};
use crate::consolidation::plan::plan_merge;
use crate::consolidation::policy::DedupPolicy;
use crate::db::store::DedupStore;
use crate::models::{
    ClusterFailure, DedupRecord, GroupReport, GroupStatus, MemberSummary, MergePlan, RunMode,
    RunReport,
};
use crate::utils::get_memory_usage;
use crate::utils::logging::DedupLogger;
use crate::utils::progress_config::ProgressConfig;
use crate::utils::run_config::RunConfig;

/// A duplicate group found in one pass, with the normalized names it was matched on.
struct FoundGroup<R> {
    scope: Option<i64>,
    records: Vec<R>,
    normalized: Vec<String>,
}

pub struct DedupRunner<'a> {
    store: &'a dyn DedupStore,
    config: RunConfig,
    progress: ProgressConfig,
}

impl<'a> DedupRunner<'a> {
    pub fn new(store: &'a dyn DedupStore, config: RunConfig) -> Self {
        Self {
            store,
            config,
            progress: ProgressConfig::disabled(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }

    /// Repeats read -> cluster -> plan -> apply until a pass finds nothing left to merge
    /// or `max_passes` is reached. Dry-run walks the same passes without writing: each
    /// planned merge is folded into the in-memory records, which stand in for the reload
    /// the next pass would do. Read failures abort the run; merge failures only abort
    /// their own cluster.
    pub async fn run<P>(&self, policy: &P, mode: RunMode) -> Result<RunReport>
    where
        P: DedupPolicy + ?Sized,
    {
        let kind = policy.kind();
        let run_id = Uuid::new_v4().to_string();
        let logger = DedupLogger::new(kind);
        logger.log_start(&run_id, mode);

        let mut report = RunReport::new(run_id.clone(), kind, mode);
        let audit_run_id = if self.config.audit_enabled && !mode.is_dry_run() {
            Some(run_id.as_str())
        } else {
            None
        };
        let multi = self.progress.create_multi_progress();
        let mut failed_ids: HashSet<i64> = HashSet::new();
        let mut simulated: Option<Vec<P::Record>> = None;

        for pass in 1..=self.config.max_passes {
            let mut records = match simulated.take() {
                Some(records) => records,
                None => {
                    logger.log_phase("Loading candidates", Some(&format!("pass {}", pass)));
                    let records = policy
                        .load_candidates(self.store)
                        .await
                        .with_context(|| format!("Failed to read {} candidates", kind))?;
                    logger.log_data_loaded(records.len(), kind.table());
                    records
                }
            };

            logger.log_phase("Clustering", Some(policy.strategy().as_str()));
            let groups = find_groups(policy, &records);
            let covered: usize = groups.iter().map(|g| g.records.len()).sum();
            logger.log_groups_found(pass, groups.len(), covered);
            report.passes = pass;

            if groups.is_empty() {
                report.converged = true;
                break;
            }

            let pb = if mode.is_dry_run() {
                None
            } else {
                self.progress
                    .cluster_bar(multi.as_ref(), groups.len() as u64, kind.as_str())
            };

            let mut merged_this_pass = 0;
            for group in groups {
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                let member_ids: Vec<i64> = group.records.iter().map(|r| r.id()).collect();
                if member_ids.iter().any(|id| failed_ids.contains(id)) {
                    debug!(
                        "Skipping {:?}: a member already failed to merge in this run",
                        member_ids
                    );
                    continue;
                }

                let members: Vec<MemberSummary> = group
                    .records
                    .iter()
                    .zip(group.normalized.iter())
                    .map(|(r, n)| MemberSummary {
                        id: r.id(),
                        name: r.name().to_string(),
                        normalized_name: n.clone(),
                    })
                    .collect();

                let plan = match plan_merge(policy, &group.records) {
                    Ok(plan) => plan,
                    Err(e) => {
                        let failure = ClusterFailure {
                            pass,
                            canonical_id: member_ids[0],
                            member_ids: member_ids.clone(),
                            error: format!("{:#}", e),
                        };
                        logger.log_cluster_failure(&failure);
                        failed_ids.extend(member_ids);
                        report.errors.push(failure);
                        continue;
                    }
                };

                let names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
                logger.log_group(&plan, &names);
                for action in &plan.actions {
                    logger.log_action(action);
                }
                report.groups_found += 1;

                let status = if mode.is_dry_run() {
                    merged_this_pass += 1;
                    record_eliminated(&mut report, &plan);
                    simulate_merge(policy, &mut records, &plan);
                    GroupStatus::Planned
                } else {
                    match self.store.apply_plan(&plan, audit_run_id).await {
                        Ok(outcome) => {
                            merged_this_pass += 1;
                            report.merged_count += 1;
                            report.deleted_count += outcome.parents_deleted;
                            record_eliminated(&mut report, &plan);
                            GroupStatus::Merged { outcome }
                        }
                        Err(e) => {
                            let failure = ClusterFailure {
                                pass,
                                canonical_id: plan.canonical_id,
                                member_ids: member_ids.clone(),
                                error: format!("{:#}", e),
                            };
                            logger.log_cluster_failure(&failure);
                            failed_ids.extend(member_ids);
                            report.errors.push(failure);
                            GroupStatus::Failed {
                                error: format!("{:#}", e),
                            }
                        }
                    }
                };

                report.groups.push(GroupReport {
                    pass,
                    scope: group.scope,
                    canonical_id: plan.canonical_id,
                    members,
                    plan,
                    status,
                });
            }

            if let Some(pb) = pb {
                pb.finish_with_message(format!("{} clusters merged", merged_this_pass));
            }
            if self.progress.should_show_memory() {
                info!("Memory usage after pass {}: {} MB", pass, get_memory_usage().await);
            }
            if merged_this_pass == 0 {
                report.converged = true;
                break;
            }
            if mode.is_dry_run() {
                simulated = Some(records);
            }
        }

        if !report.converged {
            logger.log_not_converged(report.passes);
        }
        logger.log_completion(&report);
        Ok(report)
    }
}

/// Drops the plan's losers from `records` and folds them into the survivor.
fn simulate_merge<P>(policy: &P, records: &mut Vec<P::Record>, plan: &MergePlan)
where
    P: DedupPolicy + ?Sized,
{
    let (losers, kept): (Vec<P::Record>, Vec<P::Record>) = records
        .drain(..)
        .partition(|r| plan.loser_ids.contains(&r.id()));
    *records = kept;
    if let Some(survivor) = records.iter_mut().find(|r| r.id() == plan.canonical_id) {
        for loser in &losers {
            policy.absorb(survivor, loser);
        }
    }
}

fn record_eliminated(report: &mut RunReport, plan: &MergePlan) {
    for &loser in &plan.loser_ids {
        report.map_eliminated(loser, plan.canonical_id);
    }
}

fn find_groups<P>(policy: &P, records: &[P::Record]) -> Vec<FoundGroup<P::Record>>
where
    P: DedupPolicy + ?Sized,
{
    let normalized: Vec<String> = records.iter().map(|r| policy.normalize(r)).collect();
    let inputs: Vec<ClusterInput> = records
        .iter()
        .zip(normalized.iter())
        .map(|(r, n)| ClusterInput {
            id: r.id(),
            scope: policy.scope_key(r),
            normalized: n.clone(),
        })
        .collect();

    let builder = ClusterBuilder::new(policy.strategy(), policy.threshold(), |a: &str, b: &str| {
        policy.score(a, b)
    });

    builder
        .build(&inputs)
        .into_iter()
        .map(|indices| FoundGroup {
            scope: inputs[indices[0]].scope,
            records: indices.iter().map(|&i| records[i].clone()).collect(),
            normalized: indices.iter().map(|&i| normalized[i].clone()).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::policy::{BranchPolicy, JobPolicy, SalesPersonPolicy};
    use crate::db::memory_store::{KeyedRow, MemoryStore};
    use crate::models::{EntityKind, MergeAction};
    use crate::utils::scope_filter::ScopeFilter;
    use chrono::NaiveDate;

    fn job_policy() -> JobPolicy {
        JobPolicy::new(&RunConfig::default(), ScopeFilter::default())
    }

    async fn smith_attic_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_job(10, "Smith Attic - REVISED", Some(1)).await;
        store.add_job(22, "Smith Attic", Some(1)).await;
        store.add_job(30, "Smith Attic", Some(2)).await;
        store.add_shift(10, 7, 4.0).await;
        store.add_shift(22, 7, 6.0).await;
        store.add_shift(22, 8, 2.0).await;
        store.add_special_shift(10, 3, 1.5).await;
        store
    }

    fn total_hours(rows: &[KeyedRow]) -> f64 {
        rows.iter().filter_map(|r| r.hours).sum()
    }

    #[tokio::test]
    async fn test_smith_attic_merge() {
        let store = smith_attic_store().await;
        let runner = DedupRunner::new(&store, RunConfig::default());
        let report = runner.run(&job_policy(), RunMode::Apply).await.unwrap();

        assert!(report.success());
        assert_eq!(report.groups_found, 1);
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.consolidation_map.get(&10), Some(&22));

        let state = store.snapshot().await;
        assert!(!state.jobs.contains_key(&10));
        assert!(state.jobs.contains_key(&30));
        assert_eq!(
            state.shifts,
            vec![
                KeyedRow { parent: 22, key: 7, hours: Some(10.0) },
                KeyedRow { parent: 22, key: 8, hours: Some(2.0) },
            ]
        );
        assert_eq!(
            state.special_shifts,
            vec![KeyedRow { parent: 22, key: 3, hours: Some(1.5) }]
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = smith_attic_store().await;
        let before = store.snapshot().await;

        let runner = DedupRunner::new(&store, RunConfig::default());
        let report = runner.run(&job_policy(), RunMode::DryRun).await.unwrap();

        assert_eq!(store.snapshot().await, before);
        assert_eq!(report.passes, 2);
        assert!(report.converged);
        assert_eq!(report.merged_count, 0);
        assert_eq!(report.duplicates_found(), 1);
        assert_eq!(report.groups[0].status, GroupStatus::Planned);
        assert_eq!(report.consolidation_map.get(&10), Some(&22));
        assert!(report.groups[0]
            .plan
            .actions
            .iter()
            .any(|a| matches!(a, MergeAction::FoldChild { key: 7, .. })));
    }

    /// Jones~Jonas and Jonas~Root both score 90 but Jones~Root only 80, so seed-only
    /// clustering needs a second pass to reach job 3.
    async fn chained_roof_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_job(1, "Jones Roof", Some(1)).await;
        store.add_job(2, "Jonas Roof", Some(1)).await;
        store.add_job(3, "Jonas Root", Some(1)).await;
        store.add_shift(2, 5, 2.0).await;
        store.add_shift(2, 6, 1.0).await;
        store.add_shift(3, 5, 4.0).await;
        store
    }

    #[tokio::test]
    async fn test_dry_run_lists_every_later_pass_merge() {
        let dry_store = chained_roof_store().await;
        let dry = DedupRunner::new(&dry_store, RunConfig::default())
            .run(&job_policy(), RunMode::DryRun)
            .await
            .unwrap();

        let apply_store = chained_roof_store().await;
        let applied = DedupRunner::new(&apply_store, RunConfig::default())
            .run(&job_policy(), RunMode::Apply)
            .await
            .unwrap();

        assert_eq!(applied.consolidation_map.get(&3), Some(&2));
        assert_eq!(dry.consolidation_map, applied.consolidation_map);
        assert_eq!(dry.groups_found, applied.groups_found);
        assert_eq!(dry.passes, applied.passes);
        let dry_plans: Vec<&MergePlan> = dry.groups.iter().map(|g| &g.plan).collect();
        let applied_plans: Vec<&MergePlan> = applied.groups.iter().map(|g| &g.plan).collect();
        assert_eq!(dry_plans, applied_plans);
        assert_eq!(dry.groups[1].pass, 2);
        assert!(dry.groups[1]
            .plan
            .actions
            .iter()
            .any(|a| matches!(a, MergeAction::FoldChild { key: 5, from_id: 3, .. })));
    }

    #[tokio::test]
    async fn test_pass_cap_reports_unconverged_run() {
        let store = chained_roof_store().await;
        let config = RunConfig {
            max_passes: 1,
            ..RunConfig::default()
        };
        let report = DedupRunner::new(&store, config.clone())
            .run(&job_policy(), RunMode::Apply)
            .await
            .unwrap();

        assert_eq!(report.passes, 1);
        assert!(!report.converged);
        assert_eq!(report.consolidation_map.get(&1), Some(&2));
        assert!(store.snapshot().await.jobs.contains_key(&3));

        let dry = DedupRunner::new(&chained_roof_store().await, config)
            .run(&job_policy(), RunMode::DryRun)
            .await
            .unwrap();
        assert!(!dry.converged);

        let finished = DedupRunner::new(&store, RunConfig::default())
            .run(&job_policy(), RunMode::Apply)
            .await
            .unwrap();
        assert!(finished.converged);
        assert_eq!(finished.consolidation_map.get(&3), Some(&2));
    }

    #[tokio::test]
    async fn test_branches_with_different_states_are_not_merged() {
        let store = MemoryStore::new();
        store.add_branch(1, "Portland, OR").await;
        store.add_branch(2, "Portland, ME").await;
        store.add_employee(100, Some(2)).await;

        let report = DedupRunner::new(&store, RunConfig::default())
            .run(&BranchPolicy, RunMode::Apply)
            .await
            .unwrap();

        assert_eq!(report.groups_found, 0);
        assert!(report.converged);
        let state = store.snapshot().await;
        assert_eq!(state.branches.len(), 2);
        assert_eq!(state.employees.get(&100), Some(&Some(2)));
    }

    #[tokio::test]
    async fn test_second_run_finds_nothing() {
        let store = smith_attic_store().await;
        let runner = DedupRunner::new(&store, RunConfig::default());
        runner.run(&job_policy(), RunMode::Apply).await.unwrap();

        let again = runner.run(&job_policy(), RunMode::Apply).await.unwrap();
        assert_eq!(again.groups_found, 0);
        assert_eq!(again.merged_count, 0);
        assert!(again.consolidation_map.is_empty());
    }

    #[tokio::test]
    async fn test_hours_conserved_and_no_orphans() {
        let store = smith_attic_store().await;
        store.add_job(40, "Gutter Cleaning", Some(1)).await;
        store.add_job(41, "Gutter Cleaning (copy)", Some(1)).await;
        store.add_shift(41, 7, 3.0).await;
        store.add_shift(41, 9, 5.0).await;
        let before = store.snapshot().await;

        let runner = DedupRunner::new(&store, RunConfig::default());
        let report = runner.run(&job_policy(), RunMode::Apply).await.unwrap();
        assert_eq!(report.merged_count, 2);

        let after = store.snapshot().await;
        assert_eq!(total_hours(&after.shifts), total_hours(&before.shifts));
        assert_eq!(
            total_hours(&after.special_shifts),
            total_hours(&before.special_shifts)
        );
        assert!(after
            .shifts
            .iter()
            .chain(after.special_shifts.iter())
            .all(|r| after.jobs.contains_key(&r.parent)));
    }

    #[tokio::test]
    async fn test_failed_cluster_does_not_stop_the_run() {
        let store = MemoryStore::new();
        store.add_job(1, "Roof Repair", Some(1)).await;
        store.add_job(2, "Roof Repair", Some(1)).await;
        store.add_shift(1, 5, 2.0).await;
        store.add_shift(1, 6, 1.0).await;
        store.add_shift(2, 5, 3.0).await;
        store.add_job(3, "Gutter Cleaning", Some(1)).await;
        store.add_job(4, "Gutter Cleaning", Some(1)).await;
        store.fail_on_delete(2).await;
        let before = store.snapshot().await;

        let runner = DedupRunner::new(&store, RunConfig::default());
        let report = runner.run(&job_policy(), RunMode::Apply).await.unwrap();

        assert!(!report.success());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].member_ids, vec![1, 2]);
        assert_eq!(report.merged_count, 1);
        assert!(!report.consolidation_map.contains_key(&2));

        let state = store.snapshot().await;
        assert!(state.jobs.contains_key(&2));
        assert!(!state.jobs.contains_key(&4));
        assert_eq!(state.shifts, before.shifts);
    }

    #[tokio::test]
    async fn test_repeated_shift_key_fails_only_its_cluster() {
        let store = MemoryStore::new();
        store.add_job(1, "Roof Repair", Some(1)).await;
        store.add_job(2, "Roof Repair", Some(1)).await;
        store.add_shift(2, 5, 2.0).await;
        store.add_shift(2, 5, 1.0).await;
        store.add_shift(1, 5, 4.0).await;
        store.add_job(3, "Gutter Cleaning", Some(1)).await;
        store.add_job(4, "Gutter Cleaning", Some(1)).await;
        let before = store.snapshot().await;

        let report = DedupRunner::new(&store, RunConfig::default())
            .run(&job_policy(), RunMode::Apply)
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].member_ids, vec![1, 2]);
        assert!(report.errors[0].error.contains("more than one employee_id=5 row"));
        assert_eq!(report.consolidation_map.get(&4), Some(&3));

        let state = store.snapshot().await;
        assert!(state.jobs.contains_key(&1));
        assert_eq!(state.shifts, before.shifts);
    }

    #[tokio::test]
    async fn test_scope_filter_limits_branches() {
        let store = smith_attic_store().await;
        store.add_job(31, "Smith Attic", Some(2)).await;

        let policy = JobPolicy::new(&RunConfig::default(), ScopeFilter::default().with_branches(&[2]));
        let runner = DedupRunner::new(&store, RunConfig::default());
        let report = runner.run(&policy, RunMode::DryRun).await.unwrap();

        assert_eq!(report.groups_found, 1);
        assert_eq!(report.groups[0].scope, Some(2));
        assert_eq!(report.groups[0].canonical_id, 30);
    }

    #[tokio::test]
    async fn test_branch_consolidation_repoints_everything() {
        let day = |d: u32| {
            NaiveDate::from_ymd_opt(2023, 3, d)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap()
        };
        let store = MemoryStore::new();
        store.add_branch_created(1, "denver", day(9)).await;
        store.add_branch_created(2, "Denver", day(1)).await;
        store.add_branch_created(3, "Boulder", day(1)).await;
        store.add_employee(100, Some(1)).await;
        store.add_job(200, "Deck", Some(1)).await;
        let sp = store.add_sales_person("Carla Diaz", None, true).await;
        store.add_estimate(300, Some(1), Some(sp)).await;
        store.link_sales_person_branch(sp, 1).await;
        store.link_sales_person_branch(sp, 2).await;

        let config = RunConfig {
            audit_enabled: true,
            ..RunConfig::default()
        };
        let runner = DedupRunner::new(&store, config);
        let report = runner.run(&BranchPolicy, RunMode::Apply).await.unwrap();

        assert_eq!(report.kind, EntityKind::Branch);
        assert_eq!(report.consolidation_map.get(&1), Some(&2));
        let state = store.snapshot().await;
        assert_eq!(state.branches.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(state.employees.get(&100), Some(&Some(2)));
        assert_eq!(state.jobs[&200].branch_id, Some(2));
        assert_eq!(state.estimates[&300].branch_id, Some(2));
        assert_eq!(
            state.sales_person_branches,
            vec![KeyedRow { parent: sp, key: 2, hours: None }]
        );
        assert_eq!(state.audit.len(), 1);
        assert_eq!(state.audit[0].run_id, report.run_id);
    }

    #[tokio::test]
    async fn test_sales_person_merge_skips_inactive() {
        let store = MemoryStore::new();
        store.add_branch(1, "Denver").await;
        let plain = store.add_sales_person("Eben W", None, true).await;
        let with_telegram = store.add_sales_person("eben w.", Some("55501"), true).await;
        let inactive = store.add_sales_person("Eben Woodbell", None, false).await;
        store.add_estimate(1, Some(1), Some(plain)).await;
        store.link_sales_person_branch(plain, 1).await;

        let runner = DedupRunner::new(&store, RunConfig::default());
        let report = runner
            .run(&SalesPersonPolicy::new(&RunConfig::default()), RunMode::Apply)
            .await
            .unwrap();

        assert_eq!(report.consolidation_map.get(&plain), Some(&with_telegram));
        let state = store.snapshot().await;
        assert!(!state.sales_persons.contains_key(&plain));
        assert!(state.sales_persons.contains_key(&inactive));
        assert_eq!(state.estimates[&1].sales_person_id, Some(with_telegram));
        assert_eq!(
            state.sales_person_branches,
            vec![KeyedRow { parent: with_telegram, key: 1, hours: None }]
        );
    }
}
