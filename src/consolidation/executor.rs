// src/consolidation/executor.rs
//
// Runs a MergePlan against one open transaction. Any error returned from here means the
// caller must roll that transaction back.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;

use crate::models::{
    ChildLink, EntityKind, ForeignKeyRelation, KeyedRelation, MergeAction, MergeOutcome, MergePlan,
};

/// Row-level writes inside a single cluster transaction. Methods return rows affected.
#[async_trait]
pub trait MergeWriter: Send {
    async fn reassign_foreign_key(
        &mut self,
        relation: ForeignKeyRelation,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64>;

    async fn reparent_child(
        &mut self,
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64>;

    /// Adds the loser row's quantity (if the relation has one) into the survivor's row
    /// for the same key, then removes the loser row. Returns loser rows removed.
    async fn fold_child(
        &mut self,
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64>;

    async fn count_children(&mut self, link: ChildLink, parent_id: i64) -> Result<i64>;

    async fn delete_parent(&mut self, kind: EntityKind, id: i64) -> Result<u64>;

    async fn record_audit(
        &mut self,
        run_id: &str,
        kind: EntityKind,
        eliminated_id: i64,
        surviving_id: i64,
    ) -> Result<()>;
}

/// Executes every action of `plan` in order, refusing anything that could lose data.
pub async fn execute_plan<W>(
    writer: &mut W,
    plan: &MergePlan,
    audit_run_id: Option<&str>,
) -> Result<MergeOutcome>
where
    W: MergeWriter + ?Sized,
{
    if plan.loser_ids.contains(&plan.canonical_id) {
        bail!(
            "plan for {} {} lists its canonical record as a loser",
            plan.kind,
            plan.canonical_id
        );
    }

    let mut outcome = MergeOutcome::default();

    for action in &plan.actions {
        check_membership(plan, action)?;
        debug!("{}", action.describe());

        match *action {
            MergeAction::ReassignForeignKey {
                relation,
                from_id,
                to_id,
            } => {
                let moved = writer
                    .reassign_foreign_key(relation, from_id, to_id)
                    .await
                    .with_context(|| format!("Failed to {}", action.describe()))?;
                outcome.foreign_keys_repointed += moved;
            }
            MergeAction::ReparentChild {
                relation,
                key,
                from_id,
                to_id,
                ..
            } => {
                let moved = writer
                    .reparent_child(relation, key, from_id, to_id)
                    .await
                    .with_context(|| format!("Failed to {}", action.describe()))?;
                if moved == 0 {
                    bail!("{} affected no rows", action.describe());
                }
                outcome.children_moved += moved as usize;
            }
            MergeAction::FoldChild {
                relation,
                key,
                from_id,
                to_id,
                ..
            } => {
                let folded = writer
                    .fold_child(relation, key, from_id, to_id)
                    .await
                    .with_context(|| format!("Failed to {}", action.describe()))?;
                if folded == 0 {
                    bail!("{} affected no rows", action.describe());
                }
                outcome.children_folded += folded as usize;
            }
            MergeAction::DeleteParent { kind, id } => {
                if kind != plan.kind {
                    bail!("plan for {} tried to delete a {}", plan.kind, kind);
                }
                for link in kind.child_links() {
                    let remaining = writer.count_children(link, id).await.with_context(|| {
                        format!("Failed to count {} rows of {} {}", link.table(), kind, id)
                    })?;
                    if remaining > 0 {
                        bail!(
                            "refusing to delete {} {}: {} rows in {} still reference it",
                            kind,
                            id,
                            remaining,
                            link.table()
                        );
                    }
                }
                let deleted = writer
                    .delete_parent(kind, id)
                    .await
                    .with_context(|| format!("Failed to {}", action.describe()))?;
                if deleted == 0 {
                    bail!("{} {} no longer exists", kind, id);
                }
                outcome.parents_deleted += deleted as usize;

                if let Some(run_id) = audit_run_id {
                    writer
                        .record_audit(run_id, kind, id, plan.canonical_id)
                        .await
                        .context("Failed to write merge audit row")?;
                }
            }
        }
    }

    Ok(outcome)
}

fn check_membership(plan: &MergePlan, action: &MergeAction) -> Result<()> {
    let from_id = action.from_id();
    if from_id == plan.canonical_id {
        bail!(
            "action '{}' would take from the canonical record {}",
            action.describe(),
            plan.canonical_id
        );
    }
    if !plan.loser_ids.contains(&from_id) {
        bail!(
            "action '{}' references {} which is not in the cluster",
            action.describe(),
            from_id
        );
    }
    let to_id = match action {
        MergeAction::ReassignForeignKey { to_id, .. }
        | MergeAction::ReparentChild { to_id, .. }
        | MergeAction::FoldChild { to_id, .. } => Some(*to_id),
        MergeAction::DeleteParent { .. } => None,
    };
    if let Some(to_id) = to_id {
        if to_id != plan.canonical_id {
            bail!(
                "action '{}' targets {} instead of the canonical record {}",
                action.describe(),
                to_id,
                plan.canonical_id
            );
        }
    }
    Ok(())
}
