//! Membership differ
//!
//! Pure computation of what to do with the replica set given the desired
//! addresses and the status just read from the cluster. Inputs are sets,
//! so the result does not depend on resolution order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, ControllerResult};
use crate::types::{ClusterConfig, ClusterStatus, Member, MemberAddress, MAX_MEMBER_ID};

/// Administrative action for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Membership already matches
    NoChange,
    /// Bootstrap a new set with this configuration
    Initiate(ClusterConfig),
    /// Replace the configuration with this one
    Reconfigure(ClusterConfig),
}

/// The action together with the delta it was computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub action: Action,
    pub to_add: BTreeSet<MemberAddress>,
    pub to_remove: BTreeSet<MemberAddress>,
}

/// Compute the plan for `desired` against `status`
pub fn diff(desired: &BTreeSet<MemberAddress>, status: &ClusterStatus, set_name: &str) -> ControllerResult<Plan> {
    match status {
        ClusterStatus::Uninitialized => initiate_plan(desired, set_name),
        ClusterStatus::Initialized(current) => reconfigure_plan(desired, current),
    }
}

fn initiate_plan(desired: &BTreeSet<MemberAddress>, set_name: &str) -> ControllerResult<Plan> {
    if desired.is_empty() {
        return Err(ControllerError::WouldEmptyCluster { current: 0, retained: 0 });
    }
    if desired.len() > MAX_MEMBER_ID as usize + 1 {
        return Err(ControllerError::Protocol(format!(
            "{} members exceed the member id range",
            desired.len()
        )));
    }

    let members = desired
        .iter()
        .zip(0u32..)
        .map(|(host, id)| Member::new(id, host.clone()))
        .collect();

    Ok(Plan {
        action: Action::Initiate(ClusterConfig {
            set_name: set_name.to_string(),
            version: 1,
            members,
        }),
        to_add: desired.clone(),
        to_remove: BTreeSet::new(),
    })
}

fn reconfigure_plan(desired: &BTreeSet<MemberAddress>, current: &ClusterConfig) -> ControllerResult<Plan> {
    let current_hosts = current.hosts();
    let to_add: BTreeSet<MemberAddress> = desired.difference(&current_hosts).cloned().collect();
    let to_remove: BTreeSet<MemberAddress> = current_hosts.difference(desired).cloned().collect();

    if to_add.is_empty() && to_remove.is_empty() {
        return Ok(Plan {
            action: Action::NoChange,
            to_add,
            to_remove,
        });
    }

    // Retained members must be a majority of the current set
    let retained = current_hosts.len() - to_remove.len();
    if retained == 0 || retained * 2 <= current_hosts.len() {
        return Err(ControllerError::WouldEmptyCluster {
            current: current_hosts.len(),
            retained,
        });
    }

    let mut members: Vec<Member> = current
        .members
        .iter()
        .filter(|m| !to_remove.contains(&m.host))
        .cloned()
        .collect();

    let mut ids = free_member_ids(current);
    for host in &to_add {
        let id = ids.next().ok_or_else(|| {
            ControllerError::Protocol("no free member ids left in the configuration".to_string())
        })?;
        members.push(Member::new(id, host.clone()));
    }
    members.sort_by_key(|m| m.id);

    Ok(Plan {
        action: Action::Reconfigure(ClusterConfig {
            set_name: current.set_name.clone(),
            version: current.version + 1,
            members,
        }),
        to_add,
        to_remove,
    })
}

/// Ids never used by `current`, counting up from its highest id and wrapping
fn free_member_ids(current: &ClusterConfig) -> impl Iterator<Item = u32> {
    let used: BTreeSet<u32> = current.members.iter().map(|m| m.id).collect();
    let start = current.max_member_id().map_or(0, |max| max + 1);

    (start..=MAX_MEMBER_ID)
        .chain(0..start.min(MAX_MEMBER_ID + 1))
        .filter(move |id| !used.contains(id))
}
