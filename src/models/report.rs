// src/models/report.rs
//
// Values produced by a dedup run. The report is the audit record of what was (or would
// be) moved, folded and deleted.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::core::{EntityKind, ForeignKeyRelation, KeyedRelation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    DryRun,
    Apply,
}

impl RunMode {
    /// Resolves the mode from the two operator flags. Exactly one must be set; the
    /// engine never picks a default.
    pub fn from_flags(dry_run: bool, merge: bool) -> Result<Self> {
        match (dry_run, merge) {
            (true, false) => Ok(RunMode::DryRun),
            (false, true) => Ok(RunMode::Apply),
            (true, true) => bail!("usage: pass either --dry-run or --merge, not both"),
            (false, false) => {
                bail!("usage: a mode is required, pass --dry-run to report or --merge to apply")
            }
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::DryRun => f.write_str("dry-run"),
            RunMode::Apply => f.write_str("apply"),
        }
    }
}

/// One step of a cluster merge. Plans are built without touching the database and
/// executed in order inside a single transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MergeAction {
    ReassignForeignKey {
        relation: ForeignKeyRelation,
        from_id: i64,
        to_id: i64,
    },
    ReparentChild {
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
        hours: Option<f64>,
    },
    /// The survivor already has a row for `key`: add `hours` into it and drop the
    /// loser's row.
    FoldChild {
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
        hours: Option<f64>,
    },
    DeleteParent {
        kind: EntityKind,
        id: i64,
    },
}

impl MergeAction {
    /// The parent the action takes something away from.
    pub fn from_id(&self) -> i64 {
        match self {
            MergeAction::ReassignForeignKey { from_id, .. }
            | MergeAction::ReparentChild { from_id, .. }
            | MergeAction::FoldChild { from_id, .. } => *from_id,
            MergeAction::DeleteParent { id, .. } => *id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            MergeAction::ReassignForeignKey {
                relation,
                from_id,
                to_id,
            } => format!(
                "repoint {}.{} {} -> {}",
                relation.table(),
                relation.column(),
                from_id,
                to_id
            ),
            MergeAction::ReparentChild {
                relation,
                key,
                from_id,
                to_id,
                hours,
            } => format!(
                "move {} row {}={} from {} to {}{}",
                relation.table(),
                relation.key_column(),
                key,
                from_id,
                to_id,
                hours.map(|h| format!(" ({} hours)", h)).unwrap_or_default()
            ),
            MergeAction::FoldChild {
                relation,
                key,
                from_id,
                to_id,
                hours,
            } => match (relation.quantity_column(), hours) {
                (Some(qty), Some(h)) => format!(
                    "fold {} row {}={} of {} into {} (+{} {})",
                    relation.table(),
                    relation.key_column(),
                    key,
                    from_id,
                    to_id,
                    h,
                    qty
                ),
                _ => format!(
                    "drop duplicate {} row {}={} of {} (already on {})",
                    relation.table(),
                    relation.key_column(),
                    key,
                    from_id,
                    to_id
                ),
            },
            MergeAction::DeleteParent { kind, id } => {
                format!("delete {} {} from {}", kind, id, kind.table())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub kind: EntityKind,
    pub canonical_id: i64,
    pub loser_ids: Vec<i64>,
    pub actions: Vec<MergeAction>,
}

/// Totals of what a plan actually did once executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub children_moved: usize,
    pub children_folded: usize,
    pub foreign_keys_repointed: u64,
    pub parents_deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    Planned,
    Merged { outcome: MergeOutcome },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub pass: usize,
    pub scope: Option<i64>,
    pub canonical_id: i64,
    pub members: Vec<MemberSummary>,
    pub plan: MergePlan,
    pub status: GroupStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterFailure {
    pub pass: usize,
    pub canonical_id: i64,
    pub member_ids: Vec<i64>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub kind: EntityKind,
    pub mode: RunMode,
    pub passes: usize,
    /// False when the last allowed pass still merged something, so a further run may
    /// find more duplicates.
    pub converged: bool,
    pub groups_found: usize,
    pub merged_count: usize,
    pub deleted_count: usize,
    pub groups: Vec<GroupReport>,
    pub errors: Vec<ClusterFailure>,
    /// Eliminated id -> surviving id. Proposed in dry-run, committed in apply.
    pub consolidation_map: BTreeMap<i64, i64>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, kind: EntityKind, mode: RunMode) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
            mode,
            passes: 0,
            converged: false,
            groups_found: 0,
            merged_count: 0,
            deleted_count: 0,
            groups: Vec::new(),
            errors: Vec::new(),
            consolidation_map: BTreeMap::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of non-canonical records across every group found.
    pub fn duplicates_found(&self) -> usize {
        self.groups.iter().map(|g| g.plan.loser_ids.len()).sum()
    }

    /// Records `loser -> survivor`, rewriting earlier entries that pointed at the loser
    /// so the map always resolves to a live id after multi-pass runs.
    pub fn map_eliminated(&mut self, loser_id: i64, survivor_id: i64) {
        for target in self.consolidation_map.values_mut() {
            if *target == loser_id {
                *target = survivor_id;
            }
        }
        self.consolidation_map.insert(loser_id, survivor_id);
    }
}

/// JSON body returned by the branch cleanup surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSummary {
    pub success: bool,
    pub duplicates_found: usize,
    pub duplicates_deleted: usize,
    pub consolidation_map: BTreeMap<i64, i64>,
}

impl From<&RunReport> for ConsolidationSummary {
    fn from(report: &RunReport) -> Self {
        Self {
            success: report.success(),
            duplicates_found: report.duplicates_found(),
            duplicates_deleted: report.deleted_count,
            consolidation_map: report.consolidation_map.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_requires_exactly_one_flag() {
        assert_eq!(RunMode::from_flags(true, false).unwrap(), RunMode::DryRun);
        assert_eq!(RunMode::from_flags(false, true).unwrap(), RunMode::Apply);

        let err = RunMode::from_flags(false, false).unwrap_err();
        assert!(err.to_string().starts_with("usage:"));
        assert!(RunMode::from_flags(true, true).is_err());
    }

    #[test]
    fn test_consolidation_map_follows_chains() {
        let mut report = RunReport::new("run", EntityKind::Job, RunMode::Apply);
        report.map_eliminated(10, 22);
        report.map_eliminated(22, 30);

        assert_eq!(report.consolidation_map.get(&10), Some(&30));
        assert_eq!(report.consolidation_map.get(&22), Some(&30));
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let mut report = RunReport::new("run", EntityKind::Branch, RunMode::Apply);
        report.deleted_count = 1;
        report.map_eliminated(4, 2);

        let value = serde_json::to_value(ConsolidationSummary::from(&report)).unwrap();
        assert_eq!(
            value,
            json!({
                "success": true,
                "duplicatesFound": 0,
                "duplicatesDeleted": 1,
                "consolidationMap": { "4": 2 }
            })
        );
    }

    #[test]
    fn test_fold_description_mentions_hours() {
        let action = MergeAction::FoldChild {
            relation: KeyedRelation::Shift,
            key: 7,
            from_id: 10,
            to_id: 22,
            hours: Some(4.0),
        };
        assert_eq!(
            action.describe(),
            "fold shifts row employee_id=7 of 10 into 22 (+4 hours)"
        );
    }
}
