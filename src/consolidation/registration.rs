// src/consolidation/registration.rs
//
// Resolve-or-create for incoming salesperson names, so registrations stop producing the
// duplicates the batch pass has to clean up afterwards.

use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::consolidation::canonical::select_sales_person_canonical;
use crate::db::store::DedupStore;
use crate::matching::{normalize_name, sales_person_similarity, NormalizationProfile};
use crate::models::SalesPersonRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RegistrationDecision {
    UseExisting {
        sales_person_id: i64,
        matched_by: MatchKind,
        similarity: f64,
        /// Set only when the matched record has no branch association yet.
        assign_branch: Option<i64>,
    },
    CreateNew {
        name: String,
        branch_id: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub sales_person_id: i64,
    pub created: bool,
    pub branch_assigned: bool,
    pub decision: RegistrationDecision,
}

/// Decides what a registration of `name` should map to. Only active records are
/// candidates; an exact normalized match beats any fuzzy one.
pub fn resolve_registration(
    existing: &[SalesPersonRecord],
    name: &str,
    branch_id: Option<i64>,
    threshold: f64,
) -> Result<RegistrationDecision> {
    let wanted = normalize_name(name, NormalizationProfile::Aggressive);
    if wanted.is_empty() {
        bail!("cannot register a salesperson with an empty name");
    }

    let active: Vec<(&SalesPersonRecord, String)> = existing
        .iter()
        .filter(|s| s.is_active)
        .map(|s| {
            (
                s,
                normalize_name(s.name.as_deref().unwrap_or(""), NormalizationProfile::Aggressive),
            )
        })
        .filter(|(_, n)| !n.is_empty())
        .collect();

    let exact: Vec<SalesPersonRecord> = active
        .iter()
        .filter(|(_, n)| *n == wanted)
        .map(|(s, _)| (*s).clone())
        .collect();
    if let Some(survivor) = select_sales_person_canonical(&exact) {
        return Ok(use_existing(survivor, MatchKind::Exact, 1.0, branch_id));
    }

    let best = active
        .iter()
        .map(|(s, n)| (*s, sales_person_similarity(&wanted, n)))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then_with(|| b.id.cmp(&a.id)));
    if let Some((survivor, score)) = best {
        return Ok(use_existing(survivor, MatchKind::Fuzzy, score, branch_id));
    }

    Ok(RegistrationDecision::CreateNew {
        name: name.trim().to_string(),
        branch_id,
    })
}

fn use_existing(
    survivor: &SalesPersonRecord,
    matched_by: MatchKind,
    similarity: f64,
    branch_id: Option<i64>,
) -> RegistrationDecision {
    RegistrationDecision::UseExisting {
        sales_person_id: survivor.id,
        matched_by,
        similarity,
        assign_branch: branch_id.filter(|_| survivor.branches.is_empty()),
    }
}

/// Resolves `name` against the store and performs whatever the decision requires.
pub async fn register_sales_person(
    store: &dyn DedupStore,
    name: &str,
    telegram_id: Option<&str>,
    branch_id: Option<i64>,
    threshold: f64,
) -> Result<RegistrationOutcome> {
    let existing = store
        .load_sales_persons()
        .await
        .context("Failed to load salespersons for registration")?;
    let decision = resolve_registration(&existing, name, branch_id, threshold)?;

    let outcome = match &decision {
        RegistrationDecision::UseExisting {
            sales_person_id,
            matched_by,
            similarity,
            assign_branch,
        } => {
            info!(
                "👤 '{}' resolved to salesperson {} ({:?} match, similarity {:.2})",
                name, sales_person_id, matched_by, similarity
            );
            if let Some(branch) = assign_branch {
                store
                    .add_sales_person_branch(*sales_person_id, *branch)
                    .await
                    .with_context(|| {
                        format!("Failed to link salesperson {} to branch {}", sales_person_id, branch)
                    })?;
            }
            RegistrationOutcome {
                sales_person_id: *sales_person_id,
                created: false,
                branch_assigned: assign_branch.is_some(),
                decision: decision.clone(),
            }
        }
        RegistrationDecision::CreateNew { name, branch_id } => {
            let id = store
                .insert_sales_person(name, telegram_id)
                .await
                .with_context(|| format!("Failed to create salesperson '{}'", name))?;
            info!("👤 Created salesperson {} for '{}'", id, name);
            if let Some(branch) = branch_id {
                store
                    .add_sales_person_branch(id, *branch)
                    .await
                    .with_context(|| format!("Failed to link salesperson {} to branch {}", id, branch))?;
            }
            RegistrationOutcome {
                sales_person_id: id,
                created: true,
                branch_assigned: branch_id.is_some(),
                decision: decision.clone(),
            }
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_store::MemoryStore;
    use crate::models::ChildRow;

    fn sp(id: i64, name: &str, active: bool, branches: Vec<i64>) -> SalesPersonRecord {
        SalesPersonRecord {
            id,
            name: Some(name.to_string()),
            telegram_id: None,
            is_active: active,
            branches: branches.into_iter().map(ChildRow::link).collect(),
            estimate_count: 0,
        }
    }

    #[test]
    fn test_exact_match_beats_fuzzy() {
        let existing = vec![sp(1, "Eben Woodbell", true, vec![]), sp(2, "eben w.", true, vec![])];
        let decision = resolve_registration(&existing, "Eben W", None, 0.7).unwrap();
        assert!(matches!(
            decision,
            RegistrationDecision::UseExisting {
                sales_person_id: 2,
                matched_by: MatchKind::Exact,
                ..
            }
        ));
    }

    #[test]
    fn test_inactive_record_is_never_revived() {
        let existing = vec![sp(2, "Eben Woodbell", false, vec![])];
        let decision = resolve_registration(&existing, "Eben W", Some(5), 0.7).unwrap();
        assert_eq!(
            decision,
            RegistrationDecision::CreateNew {
                name: "Eben W".to_string(),
                branch_id: Some(5),
            }
        );
    }

    #[test]
    fn test_branch_assigned_only_when_survivor_has_none() {
        let existing = vec![sp(1, "Carla Diaz", true, vec![3])];
        let decision = resolve_registration(&existing, "Carla Diaz", Some(5), 0.7).unwrap();
        assert!(matches!(
            decision,
            RegistrationDecision::UseExisting { assign_branch: None, .. }
        ));

        let existing = vec![sp(1, "Carla Diaz", true, vec![])];
        let decision = resolve_registration(&existing, "Carla Diaz", Some(5), 0.7).unwrap();
        assert!(matches!(
            decision,
            RegistrationDecision::UseExisting { assign_branch: Some(5), .. }
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(resolve_registration(&[], "  ", None, 0.7).is_err());
    }

    #[tokio::test]
    async fn test_repeat_registration_creates_no_duplicate() {
        let store = MemoryStore::new();
        store.add_branch(5, "Denver").await;
        let active = store.add_sales_person("Eben W", None, true).await;
        let inactive = store.add_sales_person("Eben Woodbell", None, false).await;

        let outcome = register_sales_person(&store, "Eben W", None, Some(5), 0.7)
            .await
            .unwrap();
        assert_eq!(outcome.sales_person_id, active);
        assert!(!outcome.created);
        assert!(outcome.branch_assigned);

        let again = register_sales_person(&store, "Eben W", None, Some(5), 0.7)
            .await
            .unwrap();
        assert_eq!(again.sales_person_id, active);
        assert!(!again.branch_assigned);

        let all = store.load_sales_persons().await.unwrap();
        assert_eq!(all.iter().filter(|s| s.is_active).count(), 1);
        let woodbell = all.iter().find(|s| s.id == inactive).unwrap();
        assert!(!woodbell.is_active);
        assert!(woodbell.branches.is_empty());
    }
}
