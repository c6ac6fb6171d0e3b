//! Branch-scope filtering for job deduplication.
//! Restricts a run to jobs belonging to an operator-chosen set of branches.

use log::{debug, info};
use std::collections::BTreeSet;
use std::env;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFilter {
    pub enabled: bool,
    pub allowed_branches: BTreeSet<i64>,
}

impl ScopeFilter {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let enabled = env::var("DEDUP_SCOPE_FILTER_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let allowed_branches = if enabled {
            parse_branch_list(&env::var("DEDUP_ALLOWED_BRANCHES").unwrap_or_default())
        } else {
            BTreeSet::new()
        };

        debug!(
            "Scope filter config: enabled={}, branches={:?}",
            enabled, allowed_branches
        );

        Self {
            enabled,
            allowed_branches,
        }
    }

    /// Adds branches given on the command line; any given branch switches the filter on.
    pub fn with_branches(mut self, branches: &[i64]) -> Self {
        if !branches.is_empty() {
            self.enabled = true;
            self.allowed_branches.extend(branches.iter().copied());
        }
        self
    }

    /// Filtering only bites when the flag is on and there is something to filter to.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.allowed_branches.is_empty()
    }

    pub fn allows(&self, branch_id: Option<i64>) -> bool {
        if !self.is_active() {
            return true;
        }
        branch_id
            .map(|b| self.allowed_branches.contains(&b))
            .unwrap_or(false)
    }

    pub fn log_config(&self) {
        if self.is_active() {
            info!("🔍 Branch scope filtering ENABLED");
            info!("   Allowed branches: {:?}", self.allowed_branches);
        } else {
            info!("🔍 Branch scope filtering DISABLED - deduplicating every branch");
        }
    }
}

fn parse_branch_list(raw: &str) -> BTreeSet<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("DEDUP_SCOPE_FILTER_ENABLED", "true");
        env::set_var("DEDUP_ALLOWED_BRANCHES", "4, 9,abc,,12");

        let filter = ScopeFilter::from_env();
        assert!(filter.is_active());
        assert_eq!(filter.allowed_branches, BTreeSet::from([4, 9, 12]));

        env::set_var("DEDUP_SCOPE_FILTER_ENABLED", "false");
        let filter = ScopeFilter::from_env();
        assert!(!filter.enabled);
        assert!(filter.allowed_branches.is_empty());

        // Cleanup
        env::remove_var("DEDUP_SCOPE_FILTER_ENABLED");
        env::remove_var("DEDUP_ALLOWED_BRANCHES");
    }

    #[test]
    fn test_inactive_filter_allows_everything() {
        let filter = ScopeFilter::default();
        assert!(filter.allows(Some(3)));
        assert!(filter.allows(None));
    }

    #[test]
    fn test_cli_branches_enable_filter() {
        let filter = ScopeFilter::default().with_branches(&[7]);
        assert!(filter.is_active());
        assert!(filter.allows(Some(7)));
        assert!(!filter.allows(Some(8)));
        assert!(!filter.allows(None));
    }
}
