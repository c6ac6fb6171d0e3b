// src/clustering/cluster_builder.rs
//
// Greedy, order-sensitive grouping of records that describe the same thing. Candidates
// are only ever compared inside one scope (e.g. jobs of one branch).

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStrategy {
    /// One pass per seed; candidates are compared to the seed only, never to members
    /// added alongside them. Conservative against chained false positives.
    SeedOnly,
    /// Keeps scanning until no candidate is similar to any current member.
    TransitiveExpansion,
    /// Groups only byte-identical normalized names.
    ExactNormalized,
}

impl ClusterStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStrategy::SeedOnly => "seed-only",
            ClusterStrategy::TransitiveExpansion => "transitive-expansion",
            ClusterStrategy::ExactNormalized => "exact-normalized",
        }
    }
}

impl fmt::Display for ClusterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "seed-only" | "seed_only" => Ok(ClusterStrategy::SeedOnly),
            "transitive-expansion" | "transitive_expansion" | "transitive" => {
                Ok(ClusterStrategy::TransitiveExpansion)
            }
            "exact-normalized" | "exact_normalized" | "exact" => {
                Ok(ClusterStrategy::ExactNormalized)
            }
            other => bail!("unknown cluster strategy '{}'", other),
        }
    }
}

/// What the builder needs to know about one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInput {
    pub id: i64,
    pub scope: Option<i64>,
    pub normalized: String,
}

pub struct ClusterBuilder<F>
where
    F: Fn(&str, &str) -> f64,
{
    strategy: ClusterStrategy,
    threshold: f64,
    score: F,
}

impl<F> ClusterBuilder<F>
where
    F: Fn(&str, &str) -> f64,
{
    pub fn new(strategy: ClusterStrategy, threshold: f64, score: F) -> Self {
        Self {
            strategy,
            threshold,
            score,
        }
    }

    /// Partitions `inputs` into duplicate groups and returns them as indices into
    /// `inputs`. Groups are ordered by their lowest id, members by ascending id, and
    /// singletons are dropped.
    pub fn build(&self, inputs: &[ClusterInput]) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..inputs.len()).collect();
        order.sort_by_key(|&i| inputs[i].id);

        let mut visited = vec![false; inputs.len()];
        let mut groups = Vec::new();

        for &seed in &order {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut group = vec![seed];

            match self.strategy {
                ClusterStrategy::SeedOnly => {
                    for &candidate in &order {
                        if visited[candidate] || !same_scope(inputs, seed, candidate) {
                            continue;
                        }
                        if self.matches(&inputs[seed], &inputs[candidate]) {
                            visited[candidate] = true;
                            group.push(candidate);
                        }
                    }
                    self.absorb_exact_names(inputs, &order, &mut visited, &mut group);
                }
                ClusterStrategy::TransitiveExpansion => loop {
                    let mut added = false;
                    for &candidate in &order {
                        if visited[candidate] || !same_scope(inputs, seed, candidate) {
                            continue;
                        }
                        let hit = group
                            .iter()
                            .any(|&member| self.matches(&inputs[member], &inputs[candidate]));
                        if hit {
                            visited[candidate] = true;
                            group.push(candidate);
                            added = true;
                        }
                    }
                    if !added {
                        break;
                    }
                },
                ClusterStrategy::ExactNormalized => {
                    self.absorb_exact_names(inputs, &order, &mut visited, &mut group);
                }
            }

            if group.len() >= 2 {
                group.sort_by_key(|&i| inputs[i].id);
                groups.push(group);
            }
        }
        groups
    }

    fn matches(&self, a: &ClusterInput, b: &ClusterInput) -> bool {
        if exact_name(a, b) {
            return true;
        }
        if self.strategy == ClusterStrategy::ExactNormalized {
            return false;
        }
        if a.normalized.is_empty() || b.normalized.is_empty() {
            return false;
        }
        (self.score)(&a.normalized, &b.normalized) >= self.threshold
    }

    /// Pulls in every same-scope record whose normalized name equals a member's name,
    /// whatever the fuzzy threshold says.
    fn absorb_exact_names(
        &self,
        inputs: &[ClusterInput],
        order: &[usize],
        visited: &mut [bool],
        group: &mut Vec<usize>,
    ) {
        loop {
            let mut added = false;
            for &candidate in order {
                if visited[candidate] || !same_scope(inputs, group[0], candidate) {
                    continue;
                }
                if group
                    .iter()
                    .any(|&member| exact_name(&inputs[member], &inputs[candidate]))
                {
                    visited[candidate] = true;
                    group.push(candidate);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
    }
}

fn same_scope(inputs: &[ClusterInput], a: usize, b: usize) -> bool {
    inputs[a].scope == inputs[b].scope
}

fn exact_name(a: &ClusterInput, b: &ClusterInput) -> bool {
    !a.normalized.is_empty() && a.normalized == b.normalized
}
