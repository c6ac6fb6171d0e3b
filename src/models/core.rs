// src/models/core.rs

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three record families the engine knows how to consolidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Branch,
    SalesPerson,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::Branch => "branch",
            EntityKind::SalesPerson => "sales_person",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Job => "jobs",
            EntityKind::Branch => "branches",
            EntityKind::SalesPerson => "sales_persons",
        }
    }

    /// Every relation that can still point at a parent of this kind. A parent may only
    /// be deleted once all of these report zero rows for it.
    pub fn child_links(&self) -> Vec<ChildLink> {
        match self {
            EntityKind::Job => vec![
                ChildLink::Keyed(KeyedRelation::Shift),
                ChildLink::Keyed(KeyedRelation::JobSpecialShift),
            ],
            EntityKind::Branch => vec![
                ChildLink::ForeignKey(ForeignKeyRelation::EmployeeBranch),
                ChildLink::ForeignKey(ForeignKeyRelation::JobBranch),
                ChildLink::ForeignKey(ForeignKeyRelation::EstimateBranch),
                ChildLink::ForeignKey(ForeignKeyRelation::SalesPersonBranch),
                ChildLink::Keyed(KeyedRelation::BranchSalesPersonLink),
            ],
            EntityKind::SalesPerson => vec![
                ChildLink::ForeignKey(ForeignKeyRelation::EstimateSalesPerson),
                ChildLink::Keyed(KeyedRelation::SalesPersonBranchLink),
            ],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A child table whose rows are unique per `(parent, key)`. Rows move one at a time
/// and collide when the survivor already holds the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyedRelation {
    /// `shifts (job_id, employee_id, hours)`
    Shift,
    /// `job_special_shifts (job_id, special_shift_id, hours)`
    JobSpecialShift,
    /// `sales_person_branches` seen from the branch side.
    BranchSalesPersonLink,
    /// `sales_person_branches` seen from the salesperson side.
    SalesPersonBranchLink,
}

impl KeyedRelation {
    pub fn table(&self) -> &'static str {
        match self {
            KeyedRelation::Shift => "shifts",
            KeyedRelation::JobSpecialShift => "job_special_shifts",
            KeyedRelation::BranchSalesPersonLink | KeyedRelation::SalesPersonBranchLink => {
                "sales_person_branches"
            }
        }
    }

    pub fn parent_column(&self) -> &'static str {
        match self {
            KeyedRelation::Shift | KeyedRelation::JobSpecialShift => "job_id",
            KeyedRelation::BranchSalesPersonLink => "branch_id",
            KeyedRelation::SalesPersonBranchLink => "sales_person_id",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            KeyedRelation::Shift => "employee_id",
            KeyedRelation::JobSpecialShift => "special_shift_id",
            KeyedRelation::BranchSalesPersonLink => "sales_person_id",
            KeyedRelation::SalesPersonBranchLink => "branch_id",
        }
    }

    /// Column summed when two rows collide on the same key. Link tables have none; the
    /// loser's duplicate link is simply dropped.
    pub fn quantity_column(&self) -> Option<&'static str> {
        match self {
            KeyedRelation::Shift | KeyedRelation::JobSpecialShift => Some("hours"),
            KeyedRelation::BranchSalesPersonLink | KeyedRelation::SalesPersonBranchLink => None,
        }
    }
}

/// A plain foreign key column. Every referencing row is repointed in one statement;
/// nothing can collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyRelation {
    EmployeeBranch,
    JobBranch,
    EstimateBranch,
    SalesPersonBranch,
    EstimateSalesPerson,
}

impl ForeignKeyRelation {
    pub fn table(&self) -> &'static str {
        match self {
            ForeignKeyRelation::EmployeeBranch => "employees",
            ForeignKeyRelation::JobBranch => "jobs",
            ForeignKeyRelation::EstimateBranch | ForeignKeyRelation::EstimateSalesPerson => {
                "estimates"
            }
            ForeignKeyRelation::SalesPersonBranch => "sales_persons",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            ForeignKeyRelation::EstimateSalesPerson => "sales_person_id",
            _ => "branch_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "relation", rename_all = "snake_case")]
pub enum ChildLink {
    Keyed(KeyedRelation),
    ForeignKey(ForeignKeyRelation),
}

impl ChildLink {
    pub fn table(&self) -> &'static str {
        match self {
            ChildLink::Keyed(r) => r.table(),
            ChildLink::ForeignKey(r) => r.table(),
        }
    }

    pub fn parent_column(&self) -> &'static str {
        match self {
            ChildLink::Keyed(r) => r.parent_column(),
            ChildLink::ForeignKey(r) => r.column(),
        }
    }
}

/// One row of a keyed child table, as seen from its current parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRow {
    pub key: i64,
    pub hours: Option<f64>,
}

impl ChildRow {
    pub fn new(key: i64, hours: Option<f64>) -> Self {
        Self { key, hours }
    }

    pub fn link(key: i64) -> Self {
        Self { key, hours: None }
    }
}

/// Minimal view every consolidated record exposes to the clustering code.
pub trait DedupRecord: Clone + Send + Sync {
    fn id(&self) -> i64;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub name: Option<String>,
    pub branch_id: Option<i64>,
    pub closing_date: Option<NaiveDate>,
    pub performance_status: Option<String>,
    pub shifts: Vec<ChildRow>,
    pub special_shifts: Vec<ChildRow>,
}

impl DedupRecord for JobRecord {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub id: i64,
    pub name: Option<String>,
    pub created_at: NaiveDateTime,
    /// Rows of `sales_person_branches` pointing at this branch, keyed by salesperson.
    pub sales_person_links: Vec<ChildRow>,
}

impl DedupRecord for BranchRecord {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesPersonRecord {
    pub id: i64,
    pub name: Option<String>,
    pub telegram_id: Option<String>,
    pub is_active: bool,
    /// Rows of `sales_person_branches` for this salesperson, keyed by branch.
    pub branches: Vec<ChildRow>,
    pub estimate_count: i64,
}

impl SalesPersonRecord {
    pub fn has_telegram(&self) -> bool {
        self.telegram_id
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

impl DedupRecord for SalesPersonRecord {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_tables_share_one_physical_table() {
        assert_eq!(
            KeyedRelation::BranchSalesPersonLink.table(),
            KeyedRelation::SalesPersonBranchLink.table()
        );
        assert_eq!(
            KeyedRelation::BranchSalesPersonLink.parent_column(),
            KeyedRelation::SalesPersonBranchLink.key_column()
        );
    }

    #[test]
    fn test_only_shift_tables_carry_hours() {
        assert_eq!(KeyedRelation::Shift.quantity_column(), Some("hours"));
        assert_eq!(KeyedRelation::JobSpecialShift.quantity_column(), Some("hours"));
        assert!(KeyedRelation::SalesPersonBranchLink.quantity_column().is_none());
    }

    #[test]
    fn test_telegram_presence_ignores_blank_ids() {
        let mut sp = SalesPersonRecord {
            id: 1,
            name: Some("Eben".into()),
            telegram_id: Some("   ".into()),
            is_active: true,
            branches: vec![],
            estimate_count: 0,
        };
        assert!(!sp.has_telegram());
        sp.telegram_id = Some("12345".into());
        assert!(sp.has_telegram());
    }
}
