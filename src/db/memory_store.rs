// src/db/memory_store.rs
//
// In-process store with the same transactional contract as Postgres: each plan runs
// against a copy of the state, which replaces the live state only on success.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

use crate::consolidation::executor::{execute_plan, MergeWriter};
use crate::db::store::DedupStore;
use crate::models::{
    BranchRecord, ChildLink, ChildRow, EntityKind, ForeignKeyRelation, JobRecord, KeyedRelation,
    MergeOutcome, MergePlan, SalesPersonRecord,
};

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub name: Option<String>,
    pub branch_id: Option<i64>,
    pub closing_date: Option<NaiveDate>,
    pub performance_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchRow {
    pub name: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SalesPersonRow {
    pub name: Option<String>,
    pub telegram_id: Option<String>,
    pub is_active: bool,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimateRow {
    pub branch_id: Option<i64>,
    pub sales_person_id: Option<i64>,
}

/// A row of a keyed child table. For `sales_person_branches`, `parent` is the
/// salesperson and `key` the branch.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub parent: i64,
    pub key: i64,
    pub hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub run_id: String,
    pub entity_kind: EntityKind,
    pub eliminated_id: i64,
    pub surviving_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub jobs: BTreeMap<i64, JobRow>,
    pub branches: BTreeMap<i64, BranchRow>,
    pub sales_persons: BTreeMap<i64, SalesPersonRow>,
    /// employee id -> branch id
    pub employees: BTreeMap<i64, Option<i64>>,
    pub estimates: BTreeMap<i64, EstimateRow>,
    pub shifts: Vec<KeyedRow>,
    pub special_shifts: Vec<KeyedRow>,
    pub sales_person_branches: Vec<KeyedRow>,
    pub audit: Vec<AuditRow>,
}

impl MemoryState {
    fn keyed_table(&mut self, relation: KeyedRelation) -> &mut Vec<KeyedRow> {
        match relation {
            KeyedRelation::Shift => &mut self.shifts,
            KeyedRelation::JobSpecialShift => &mut self.special_shifts,
            KeyedRelation::BranchSalesPersonLink | KeyedRelation::SalesPersonBranchLink => {
                &mut self.sales_person_branches
            }
        }
    }

    fn children_of(rows: &[KeyedRow], parent: i64) -> Vec<ChildRow> {
        let mut children: Vec<ChildRow> = rows
            .iter()
            .filter(|r| r.parent == parent)
            .map(|r| ChildRow::new(r.key, r.hours))
            .collect();
        children.sort_by_key(|c| c.key);
        children
    }
}

/// `(parent, key)` of a row as seen through `relation`.
fn view(relation: KeyedRelation, row: &KeyedRow) -> (i64, i64) {
    match relation {
        KeyedRelation::BranchSalesPersonLink => (row.key, row.parent),
        _ => (row.parent, row.key),
    }
}

fn set_parent(relation: KeyedRelation, row: &mut KeyedRow, parent: i64) {
    match relation {
        KeyedRelation::BranchSalesPersonLink => row.key = parent,
        _ => row.parent = parent,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing_deletes: Mutex<HashSet<i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Makes any plan that deletes `id` fail at that step.
    pub async fn fail_on_delete(&self, id: i64) {
        self.failing_deletes.lock().await.insert(id);
    }

    pub async fn add_branch(&self, id: i64, name: &str) {
        let created_at = Utc::now().naive_utc();
        self.add_branch_created(id, name, created_at).await;
    }

    pub async fn add_branch_created(&self, id: i64, name: &str, created_at: NaiveDateTime) {
        self.state.lock().await.branches.insert(
            id,
            BranchRow {
                name: Some(name.to_string()),
                created_at,
            },
        );
    }

    pub async fn add_job(&self, id: i64, name: &str, branch_id: Option<i64>) {
        self.state.lock().await.jobs.insert(
            id,
            JobRow {
                name: Some(name.to_string()),
                branch_id,
                closing_date: None,
                performance_status: None,
            },
        );
    }

    pub async fn add_shift(&self, job_id: i64, employee_id: i64, hours: f64) {
        self.state.lock().await.shifts.push(KeyedRow {
            parent: job_id,
            key: employee_id,
            hours: Some(hours),
        });
    }

    pub async fn add_special_shift(&self, job_id: i64, special_shift_id: i64, hours: f64) {
        self.state.lock().await.special_shifts.push(KeyedRow {
            parent: job_id,
            key: special_shift_id,
            hours: Some(hours),
        });
    }

    pub async fn add_employee(&self, id: i64, branch_id: Option<i64>) {
        self.state.lock().await.employees.insert(id, branch_id);
    }

    pub async fn add_estimate(&self, id: i64, branch_id: Option<i64>, sales_person_id: Option<i64>) {
        self.state.lock().await.estimates.insert(
            id,
            EstimateRow {
                branch_id,
                sales_person_id,
            },
        );
    }

    /// Inserts with the next free id and returns it.
    pub async fn add_sales_person(&self, name: &str, telegram_id: Option<&str>, is_active: bool) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.sales_persons.keys().next_back().map(|k| k + 1).unwrap_or(1);
        state.sales_persons.insert(
            id,
            SalesPersonRow {
                name: Some(name.to_string()),
                telegram_id: telegram_id.map(str::to_string),
                is_active,
                branch_id: None,
            },
        );
        id
    }

    pub async fn link_sales_person_branch(&self, sales_person_id: i64, branch_id: i64) {
        self.state.lock().await.sales_person_branches.push(KeyedRow {
            parent: sales_person_id,
            key: branch_id,
            hours: None,
        });
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .map(|(&id, row)| JobRecord {
                id,
                name: row.name.clone(),
                branch_id: row.branch_id,
                closing_date: row.closing_date,
                performance_status: row.performance_status.clone(),
                shifts: MemoryState::children_of(&state.shifts, id),
                special_shifts: MemoryState::children_of(&state.special_shifts, id),
            })
            .collect())
    }

    async fn load_branches(&self) -> Result<Vec<BranchRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .branches
            .iter()
            .map(|(&id, row)| {
                let mut sales_person_links: Vec<ChildRow> = state
                    .sales_person_branches
                    .iter()
                    .filter(|r| r.key == id)
                    .map(|r| ChildRow::link(r.parent))
                    .collect();
                sales_person_links.sort_by_key(|c| c.key);
                BranchRecord {
                    id,
                    name: row.name.clone(),
                    created_at: row.created_at,
                    sales_person_links,
                }
            })
            .collect())
    }

    async fn load_sales_persons(&self) -> Result<Vec<SalesPersonRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .sales_persons
            .iter()
            .map(|(&id, row)| SalesPersonRecord {
                id,
                name: row.name.clone(),
                telegram_id: row.telegram_id.clone(),
                is_active: row.is_active,
                branches: MemoryState::children_of(&state.sales_person_branches, id),
                estimate_count: state
                    .estimates
                    .values()
                    .filter(|e| e.sales_person_id == Some(id))
                    .count() as i64,
            })
            .collect())
    }

    async fn apply_plan(&self, plan: &MergePlan, audit_run_id: Option<&str>) -> Result<MergeOutcome> {
        let mut live = self.state.lock().await;
        let failing_deletes = self.failing_deletes.lock().await.clone();
        let mut working = live.clone();

        let outcome = {
            let mut writer = MemoryWriter {
                state: &mut working,
                failing_deletes: &failing_deletes,
            };
            execute_plan(&mut writer, plan, audit_run_id).await?
        };

        *live = working;
        Ok(outcome)
    }

    async fn insert_sales_person(&self, name: &str, telegram_id: Option<&str>) -> Result<i64> {
        Ok(self.add_sales_person(name, telegram_id, true).await)
    }

    async fn add_sales_person_branch(&self, sales_person_id: i64, branch_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.sales_persons.contains_key(&sales_person_id) {
            bail!("salesperson {} does not exist", sales_person_id);
        }
        if !state.branches.contains_key(&branch_id) {
            bail!("branch {} does not exist", branch_id);
        }
        let exists = state
            .sales_person_branches
            .iter()
            .any(|r| r.parent == sales_person_id && r.key == branch_id);
        if !exists {
            state.sales_person_branches.push(KeyedRow {
                parent: sales_person_id,
                key: branch_id,
                hours: None,
            });
        }
        Ok(())
    }
}

struct MemoryWriter<'a> {
    state: &'a mut MemoryState,
    failing_deletes: &'a HashSet<i64>,
}

#[async_trait]
impl<'a> MergeWriter for MemoryWriter<'a> {
    async fn reassign_foreign_key(
        &mut self,
        relation: ForeignKeyRelation,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64> {
        let mut moved = 0;
        let mut repoint = |slot: &mut Option<i64>| {
            if *slot == Some(from_id) {
                *slot = Some(to_id);
                moved += 1;
            }
        };
        match relation {
            ForeignKeyRelation::EmployeeBranch => {
                self.state.employees.values_mut().for_each(&mut repoint)
            }
            ForeignKeyRelation::JobBranch => self
                .state
                .jobs
                .values_mut()
                .for_each(|j| repoint(&mut j.branch_id)),
            ForeignKeyRelation::EstimateBranch => self
                .state
                .estimates
                .values_mut()
                .for_each(|e| repoint(&mut e.branch_id)),
            ForeignKeyRelation::EstimateSalesPerson => self
                .state
                .estimates
                .values_mut()
                .for_each(|e| repoint(&mut e.sales_person_id)),
            ForeignKeyRelation::SalesPersonBranch => self
                .state
                .sales_persons
                .values_mut()
                .for_each(|s| repoint(&mut s.branch_id)),
        }
        Ok(moved)
    }

    async fn reparent_child(
        &mut self,
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64> {
        let table = self.state.keyed_table(relation);
        if table.iter().any(|r| view(relation, r) == (to_id, key)) {
            bail!(
                "duplicate key: {} already has {}={} for parent {}",
                relation.table(),
                relation.key_column(),
                key,
                to_id
            );
        }
        let mut moved = 0;
        for row in table.iter_mut() {
            if view(relation, row) == (from_id, key) {
                set_parent(relation, row, to_id);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn fold_child(
        &mut self,
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64> {
        let table = self.state.keyed_table(relation);
        let Some(loser_pos) = table.iter().position(|r| view(relation, r) == (from_id, key)) else {
            return Ok(0);
        };
        let Some(survivor_pos) = table.iter().position(|r| view(relation, r) == (to_id, key)) else {
            bail!(
                "{} has no {}={} row for parent {} to fold into",
                relation.table(),
                relation.key_column(),
                key,
                to_id
            );
        };
        if relation.quantity_column().is_some() {
            let added = table[loser_pos].hours.unwrap_or(0.0);
            let survivor = &mut table[survivor_pos];
            survivor.hours = Some(survivor.hours.unwrap_or(0.0) + added);
        }
        table.remove(loser_pos);
        Ok(1)
    }

    async fn count_children(&mut self, link: ChildLink, parent_id: i64) -> Result<i64> {
        let target = Some(parent_id);
        let count = match link {
            ChildLink::Keyed(relation) => self
                .state
                .keyed_table(relation)
                .iter()
                .filter(|r| view(relation, r).0 == parent_id)
                .count(),
            ChildLink::ForeignKey(ForeignKeyRelation::EmployeeBranch) => self
                .state
                .employees
                .values()
                .filter(|b| **b == target)
                .count(),
            ChildLink::ForeignKey(ForeignKeyRelation::JobBranch) => self
                .state
                .jobs
                .values()
                .filter(|j| j.branch_id == target)
                .count(),
            ChildLink::ForeignKey(ForeignKeyRelation::EstimateBranch) => self
                .state
                .estimates
                .values()
                .filter(|e| e.branch_id == target)
                .count(),
            ChildLink::ForeignKey(ForeignKeyRelation::EstimateSalesPerson) => self
                .state
                .estimates
                .values()
                .filter(|e| e.sales_person_id == target)
                .count(),
            ChildLink::ForeignKey(ForeignKeyRelation::SalesPersonBranch) => self
                .state
                .sales_persons
                .values()
                .filter(|s| s.branch_id == target)
                .count(),
        };
        Ok(count as i64)
    }

    async fn delete_parent(&mut self, kind: EntityKind, id: i64) -> Result<u64> {
        if self.failing_deletes.contains(&id) {
            bail!("injected failure deleting {} {}", kind, id);
        }
        let removed = match kind {
            EntityKind::Job => self.state.jobs.remove(&id).is_some(),
            EntityKind::Branch => self.state.branches.remove(&id).is_some(),
            EntityKind::SalesPerson => self.state.sales_persons.remove(&id).is_some(),
        };
        Ok(u64::from(removed))
    }

    async fn record_audit(
        &mut self,
        run_id: &str,
        kind: EntityKind,
        eliminated_id: i64,
        surviving_id: i64,
    ) -> Result<()> {
        self.state.audit.push(AuditRow {
            run_id: run_id.to_string(),
            entity_kind: kind,
            eliminated_id,
            surviving_id,
        });
        Ok(())
    }
}
