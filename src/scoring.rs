//! Weighted-mean aggregation of group costs into one score per origin.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::config::{TripDirection, UnreachablePolicy};
use crate::error::Error;
use crate::grouping::{DestinationGroups, GroupCost, representative_cost};
use crate::model::Coordinate;
use crate::routing::CachedRouter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub origin: Coordinate,
    pub total_weighted_cost: f64,
    /// Seconds per group id; penalized groups carry the penalty cost.
    pub per_group_cost: BTreeMap<String, f64>,
    pub penalized_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScoreOutcome {
    Scored(Score),
    /// Excluded from ranking; `reasons` lists why each unreachable group failed.
    Disqualified {
        origin: Coordinate,
        per_group_cost: BTreeMap<String, f64>,
        reasons: BTreeMap<String, Vec<String>>,
    },
}

impl ScoreOutcome {
    pub fn score(&self) -> Option<&Score> {
        match self {
            ScoreOutcome::Scored(score) => Some(score),
            ScoreOutcome::Disqualified { .. } => None,
        }
    }

    pub fn origin(&self) -> Coordinate {
        match self {
            ScoreOutcome::Scored(score) => score.origin,
            ScoreOutcome::Disqualified { origin, .. } => *origin,
        }
    }
}

/// `Σ w·c / Σ w`, or `None` when there is no weight to divide by.
pub fn weighted_mean(costs: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let (weighted, total) = costs
        .into_iter()
        .fold((0.0, 0.0), |(weighted, total), (weight, cost)| {
            (weighted + weight * cost, total + weight)
        });
    (total > 0.0).then(|| weighted / total)
}

/// Combines one representative cost per group, in the order of
/// `groups.groups()`, under the configured unreachable policy.
pub fn aggregate(
    origin: Coordinate,
    groups: &DestinationGroups,
    costs: &[GroupCost],
    policy: UnreachablePolicy,
) -> ScoreOutcome {
    let mut per_group_cost = BTreeMap::new();
    let mut reasons = BTreeMap::new();
    let mut penalized_groups = Vec::new();
    let mut terms = Vec::with_capacity(costs.len());

    for (group, cost) in groups.groups().iter().zip(costs) {
        match (cost, policy) {
            (GroupCost::Reachable { seconds, .. }, _) => {
                per_group_cost.insert(group.id.clone(), *seconds);
                terms.push((group.weight, *seconds));
            }
            (GroupCost::Unreachable { .. }, UnreachablePolicy::Penalty { cost }) => {
                per_group_cost.insert(group.id.clone(), cost);
                penalized_groups.push(group.id.clone());
                terms.push((group.weight, cost));
            }
            (GroupCost::Unreachable { reasons: why }, UnreachablePolicy::Disqualify) => {
                per_group_cost.insert(group.id.clone(), f64::INFINITY);
                reasons.insert(group.id.clone(), why.clone());
            }
        }
    }

    if groups.is_empty() {
        reasons.insert(
            "destinations".to_string(),
            vec!["no destination could be resolved".to_string()],
        );
    }

    match weighted_mean(terms) {
        Some(total_weighted_cost) if reasons.is_empty() => ScoreOutcome::Scored(Score {
            origin,
            total_weighted_cost,
            per_group_cost,
            penalized_groups,
        }),
        _ => ScoreOutcome::Disqualified {
            origin,
            per_group_cost,
            reasons,
        },
    }
}

/// Queries every group's representative cost from `origin` and aggregates.
/// All group costs are in before the score is produced.
pub fn score_origin(
    origin: Coordinate,
    groups: &DestinationGroups,
    router: &CachedRouter,
    trip: TripDirection,
    policy: UnreachablePolicy,
    cancel: &CancellationToken,
) -> Result<ScoreOutcome, Error> {
    let costs = groups
        .groups()
        .iter()
        .map(|group| representative_cost(group, origin, trip, router, cancel))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(aggregate(origin, groups, &costs, policy))
}
