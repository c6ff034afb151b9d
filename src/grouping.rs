//! Partitioning destinations into interchangeable groups.
//!
//! Destinations sharing a non-empty `group` value are interchangeable: from a
//! given origin the group costs whatever its cheapest member costs. An
//! ungrouped destination is a group of one and goes through exactly the same
//! path.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::config::TripDirection;
use crate::error::Error;
use crate::model::{Coordinate, Departure, Destination, TransportMode};
use crate::routing::{CachedRouter, LegCost};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub name: String,
    pub coordinate: Coordinate,
    pub mode: TransportMode,
    pub departure_to: Option<Departure>,
    pub departure_from: Option<Departure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationGroup {
    pub id: String,
    pub weight: f64,
    pub members: Vec<GroupMember>,
}

/// Representative cost of one group from one origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupCost {
    Reachable { seconds: f64, via: String },
    /// No member could be reached; one reason per member.
    Unreachable { reasons: Vec<String> },
}

impl GroupCost {
    /// Cost in seconds, `f64::INFINITY` when unreachable.
    pub fn seconds(&self) -> f64 {
        match self {
            GroupCost::Reachable { seconds, .. } => *seconds,
            GroupCost::Unreachable { .. } => f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DestinationGroups {
    groups: Vec<DestinationGroup>,
}

impl DestinationGroups {
    /// Builds the partition from resolved destinations, in order of first
    /// appearance. Unresolved destinations are skipped. A group's weight is
    /// the largest weight among its members.
    pub fn build(destinations: &[Destination], mode_override: Option<TransportMode>) -> Self {
        let named: HashSet<&str> = destinations
            .iter()
            .filter_map(|destination| destination.group.as_deref())
            .collect();

        let mut groups: Vec<DestinationGroup> = Vec::new();
        let mut taken: HashSet<String> = HashSet::new();

        for destination in destinations {
            let Some(coordinate) = destination.place.coordinate() else {
                continue;
            };
            let member = GroupMember {
                name: destination.place.name.clone(),
                coordinate,
                mode: mode_override.unwrap_or(destination.mode),
                departure_to: destination.departure_to,
                departure_from: destination.departure_from,
            };

            match &destination.group {
                Some(id) => match groups.iter_mut().find(|group| &group.id == id) {
                    Some(group) => {
                        if group.weight != destination.weight {
                            warn!(
                                "group {:?} mixes weights {} and {}; using the larger",
                                id, group.weight, destination.weight
                            );
                        }
                        group.weight = group.weight.max(destination.weight);
                        group.members.push(member);
                    }
                    None => {
                        taken.insert(id.clone());
                        groups.push(DestinationGroup {
                            id: id.clone(),
                            weight: destination.weight,
                            members: vec![member],
                        });
                    }
                },
                None => {
                    let id = singleton_id(&member.name, &named, &taken);
                    taken.insert(id.clone());
                    groups.push(DestinationGroup {
                        id,
                        weight: destination.weight,
                        members: vec![member],
                    });
                }
            }
        }

        Self { groups }
    }

    pub fn from_groups(groups: Vec<DestinationGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[DestinationGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every member coordinate, for bounding boxes.
    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.groups
            .iter()
            .flat_map(|group| group.members.iter().map(|member| member.coordinate))
    }
}

/// A singleton is keyed by its destination name; clashes with named groups or
/// earlier singletons get a numeric suffix.
fn singleton_id(name: &str, named: &HashSet<&str>, taken: &HashSet<String>) -> String {
    if !named.contains(name) && !taken.contains(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{} #{}", name, n))
        .find(|candidate| !named.contains(candidate.as_str()) && !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

fn member_cost(
    member: &GroupMember,
    origin: Coordinate,
    trip: TripDirection,
    router: &CachedRouter,
    cancel: &CancellationToken,
) -> Result<LegCost, Error> {
    let outbound = router.travel_time(origin, member.coordinate, member.mode, member.departure_to, cancel)?;
    match (trip, outbound) {
        (TripDirection::RoundTrip, LegCost::Reachable { seconds: there }) => {
            let back = router.travel_time(member.coordinate, origin, member.mode, member.departure_from, cancel)?;
            Ok(match back {
                LegCost::Reachable { seconds } => LegCost::Reachable {
                    seconds: there + seconds,
                },
                other => other,
            })
        }
        (_, outbound) => Ok(outbound),
    }
}

/// Minimum cost over the group's members from `origin`. Ties go to the
/// member listed first.
pub fn representative_cost(
    group: &DestinationGroup,
    origin: Coordinate,
    trip: TripDirection,
    router: &CachedRouter,
    cancel: &CancellationToken,
) -> Result<GroupCost, Error> {
    let mut best: Option<(f64, &str)> = None;
    let mut reasons = Vec::new();

    for member in &group.members {
        match member_cost(member, origin, trip, router, cancel)? {
            LegCost::Reachable { seconds } => {
                if best.is_none_or(|(current, _)| seconds < current) {
                    best = Some((seconds, member.name.as_str()));
                }
            }
            LegCost::Unreachable => reasons.push(format!("{}: no route", member.name)),
            LegCost::Failed { reason } => reasons.push(format!("{}: {}", member.name, reason)),
        }
    }

    Ok(match best {
        Some((seconds, via)) => GroupCost::Reachable {
            seconds,
            via: via.to_string(),
        },
        None => {
            warn!("group {:?} unreachable from {}", group.id, origin);
            GroupCost::Unreachable { reasons }
        }
    })
}
