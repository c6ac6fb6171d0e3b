// src/consolidation/canonical.rs
//
// Survivor selection. Each chain is a pure function of the members' field values, so
// the same group always yields the same survivor.

use std::cmp::Ordering;

use crate::models::{BranchRecord, JobRecord, SalesPersonRecord};

/// Most attached shifts wins; ties go to the lowest (oldest) id.
pub fn select_job_canonical(group: &[JobRecord]) -> Option<&JobRecord> {
    group.iter().min_by(|a, b| {
        b.shifts
            .len()
            .cmp(&a.shifts.len())
            .then_with(|| a.id.cmp(&b.id))
    })
}

/// Earliest created wins; ties go to the lowest id.
pub fn select_branch_canonical(group: &[BranchRecord]) -> Option<&BranchRecord> {
    group
        .iter()
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Active over inactive, then a linked telegram account, then more estimates, then more
/// branch associations, then the lowest id.
pub fn select_sales_person_canonical(group: &[SalesPersonRecord]) -> Option<&SalesPersonRecord> {
    group.iter().min_by(|a, b| compare_sales_persons(a, b))
}

fn compare_sales_persons(a: &SalesPersonRecord, b: &SalesPersonRecord) -> Ordering {
    b.is_active
        .cmp(&a.is_active)
        .then_with(|| b.has_telegram().cmp(&a.has_telegram()))
        .then_with(|| b.estimate_count.cmp(&a.estimate_count))
        .then_with(|| b.branches.len().cmp(&a.branches.len()))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChildRow;
    use chrono::NaiveDate;

    fn job(id: i64, shift_count: usize) -> JobRecord {
        JobRecord {
            id,
            name: Some(format!("Job {}", id)),
            branch_id: Some(1),
            closing_date: None,
            performance_status: None,
            shifts: (0..shift_count as i64).map(|k| ChildRow::new(k, Some(1.0))).collect(),
            special_shifts: vec![],
        }
    }

    fn branch(id: i64, day: u32) -> BranchRecord {
        BranchRecord {
            id,
            name: Some("Denver".into()),
            created_at: NaiveDate::from_ymd_opt(2023, 1, day)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            sales_person_links: vec![],
        }
    }

    fn sales_person(id: i64, active: bool, telegram: Option<&str>, estimates: i64) -> SalesPersonRecord {
        SalesPersonRecord {
            id,
            name: Some("Eben".into()),
            telegram_id: telegram.map(str::to_string),
            is_active: active,
            branches: vec![],
            estimate_count: estimates,
        }
    }

    #[test]
    fn test_job_with_most_shifts_wins() {
        let group = vec![job(10, 3), job(22, 5)];
        assert_eq!(select_job_canonical(&group).unwrap().id, 22);
    }

    #[test]
    fn test_job_tie_goes_to_oldest() {
        let group = vec![job(31, 2), job(12, 2), job(40, 1)];
        assert_eq!(select_job_canonical(&group).unwrap().id, 12);
    }

    #[test]
    fn test_selection_is_stable_under_reordering() {
        let mut group = vec![job(5, 1), job(3, 4), job(9, 4)];
        let first = select_job_canonical(&group).unwrap().id;
        group.reverse();
        assert_eq!(select_job_canonical(&group).unwrap().id, first);
        assert_eq!(first, 3);
    }

    #[test]
    fn test_branch_earliest_created_wins() {
        let group = vec![branch(1, 20), branch(7, 2), branch(3, 2)];
        assert_eq!(select_branch_canonical(&group).unwrap().id, 3);
    }

    #[test]
    fn test_sales_person_chain() {
        let group = vec![
            sales_person(1, true, None, 40),
            sales_person(2, true, Some("tg-2"), 1),
            sales_person(3, false, Some("tg-3"), 99),
        ];
        assert_eq!(select_sales_person_canonical(&group).unwrap().id, 2);

        let group = vec![sales_person(4, true, None, 2), sales_person(5, true, None, 9)];
        assert_eq!(select_sales_person_canonical(&group).unwrap().id, 5);
    }

    #[test]
    fn test_empty_group_has_no_survivor() {
        assert!(select_job_canonical(&[]).is_none());
    }
}
