// src/consolidation/plan.rs
//
// Turns a duplicate group into an ordered list of actions without touching the store.
// Dry-run is this step alone; apply hands the plan to the executor.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;

use crate::consolidation::policy::DedupPolicy;
use crate::models::{
    ChildRow, DedupRecord, ForeignKeyRelation, KeyedRelation, MergeAction, MergePlan,
};

/// Plans one keyed child relation across every loser.
///
/// Rows whose key the survivor does not hold yet are reparented; rows whose key it
/// already holds (originally, or via an earlier loser) are folded into that row.
///
/// A fold addresses rows by `(parent, key)`, so each parent may hold at most one row
/// per key. A parent with two rows for the same key is rejected rather than planned,
/// since the fold would add the loser's hours into both of them.
pub fn plan_keyed_children(
    relation: KeyedRelation,
    canonical_id: i64,
    canonical_rows: &[ChildRow],
    losers: &[(i64, &[ChildRow])],
) -> Result<Vec<MergeAction>> {
    ensure_unique_keys(relation, canonical_id, canonical_rows)?;
    let mut held: HashSet<i64> = canonical_rows.iter().map(|r| r.key).collect();
    let mut actions = Vec::new();

    for (loser_id, rows) in losers {
        ensure_unique_keys(relation, *loser_id, rows)?;
        let mut rows: Vec<&ChildRow> = rows.iter().collect();
        rows.sort_by_key(|r| r.key);
        for row in rows {
            if held.contains(&row.key) {
                actions.push(MergeAction::FoldChild {
                    relation,
                    key: row.key,
                    from_id: *loser_id,
                    to_id: canonical_id,
                    hours: row.hours,
                });
            } else {
                held.insert(row.key);
                actions.push(MergeAction::ReparentChild {
                    relation,
                    key: row.key,
                    from_id: *loser_id,
                    to_id: canonical_id,
                    hours: row.hours,
                });
            }
        }
    }
    Ok(actions)
}

fn ensure_unique_keys(relation: KeyedRelation, parent_id: i64, rows: &[ChildRow]) -> Result<()> {
    let mut seen = HashSet::new();
    for row in rows {
        if !seen.insert(row.key) {
            bail!(
                "{} holds more than one {}={} row for parent {}",
                relation.table(),
                relation.key_column(),
                row.key,
                parent_id
            );
        }
    }
    Ok(())
}

/// In-memory counterpart of a keyed merge: keys the survivor lacks move over, keys it
/// holds absorb the loser's quantity the way `FoldChild` does in the store.
pub fn fold_child_rows(relation: KeyedRelation, survivor: &mut Vec<ChildRow>, loser: &[ChildRow]) {
    for row in loser {
        match survivor.iter_mut().find(|r| r.key == row.key) {
            Some(held) => {
                if relation.quantity_column().is_some() {
                    held.hours = Some(held.hours.unwrap_or(0.0) + row.hours.unwrap_or(0.0));
                }
            }
            None => survivor.push(row.clone()),
        }
    }
    survivor.sort_by_key(|r| r.key);
}

pub fn plan_foreign_keys(
    relations: &[ForeignKeyRelation],
    canonical_id: i64,
    loser_ids: &[i64],
) -> Vec<MergeAction> {
    loser_ids
        .iter()
        .flat_map(|&from_id| {
            relations.iter().map(move |&relation| MergeAction::ReassignForeignKey {
                relation,
                from_id,
                to_id: canonical_id,
            })
        })
        .collect()
}

/// Picks the survivor and lays out every action: for each loser, all of its child
/// moves first, then its deletion.
pub fn plan_merge<P>(policy: &P, group: &[P::Record]) -> Result<MergePlan>
where
    P: DedupPolicy + ?Sized,
{
    if group.len() < 2 {
        bail!("a duplicate group needs at least two members, got {}", group.len());
    }
    let canonical = policy
        .select_canonical(group)
        .context("no canonical record could be selected")?;
    let canonical_id = canonical.id();
    let losers: Vec<&P::Record> = group.iter().filter(|r| r.id() != canonical_id).collect();
    let loser_ids: Vec<i64> = losers.iter().map(|r| r.id()).collect();

    let child_actions = policy.plan_children(canonical, &losers)?;

    let mut actions = Vec::with_capacity(child_actions.len() + loser_ids.len());
    for &loser_id in &loser_ids {
        actions.extend(
            child_actions
                .iter()
                .filter(|a| a.from_id() == loser_id)
                .cloned(),
        );
        actions.push(MergeAction::DeleteParent {
            kind: policy.kind(),
            id: loser_id,
        });
    }

    Ok(MergePlan {
        kind: policy.kind(),
        canonical_id,
        loser_ids,
        actions,
    })
}
