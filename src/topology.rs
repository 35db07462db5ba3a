//! Topology probing
//!
//! Asks each candidate address for its role and decides which member the
//! administrative calls go to: the primary when there is one, otherwise a
//! secondary or another member of an initiated set, and only then an
//! uninitialized member that can bootstrap the set.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::admin::{ClusterAdmin, NodeRole};
use crate::error::{ControllerError, ControllerResult};
use crate::types::MemberAddress;

/// Roles observed across the probed addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub primary: Option<MemberAddress>,
    pub secondaries: BTreeSet<MemberAddress>,
    pub uninitialized: BTreeSet<MemberAddress>,
    pub other: BTreeSet<MemberAddress>,
    pub unreachable: BTreeSet<MemberAddress>,
}

/// The member administrative calls are addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: MemberAddress,
    /// Whether `address` is a healthy primary
    pub is_primary: bool,
}

impl Topology {
    /// Fold one probe result in; a second primary is a split brain
    pub fn record(&mut self, address: MemberAddress, role: Option<NodeRole>) -> ControllerResult<()> {
        match role {
            Some(NodeRole::Primary) => match &self.primary {
                Some(existing) if *existing != address => {
                    return Err(ControllerError::SplitBrain {
                        first: existing.to_string(),
                        second: address.to_string(),
                    });
                }
                _ => self.primary = Some(address),
            },
            Some(NodeRole::Secondary) => {
                self.secondaries.insert(address);
            }
            Some(NodeRole::Uninitialized) => {
                self.uninitialized.insert(address);
            }
            Some(NodeRole::Other) => {
                self.other.insert(address);
            }
            None => {
                self.unreachable.insert(address);
            }
        }
        Ok(())
    }

    /// Pick the member to talk to
    pub fn target(&self) -> ControllerResult<Target> {
        if let Some(primary) = &self.primary {
            return Ok(Target {
                address: primary.clone(),
                is_primary: true,
            });
        }

        let fallback = self
            .secondaries
            .iter()
            .next()
            .or_else(|| self.other.iter().next())
            .or_else(|| self.uninitialized.iter().next());

        match fallback {
            Some(address) => Ok(Target {
                address: address.clone(),
                is_primary: false,
            }),
            None => Err(ControllerError::Connectivity("no reachable member".to_string())),
        }
    }
}

/// Probe every address; unreachable ones are recorded, not fatal
pub async fn probe_all(
    admin: &dyn ClusterAdmin,
    addresses: &BTreeSet<MemberAddress>,
    timeout: Duration,
) -> ControllerResult<Topology> {
    let mut topology = Topology::default();

    for address in addresses {
        let role = match tokio::time::timeout(timeout, admin.probe(address)).await {
            Ok(Ok(role)) => {
                debug!(member = %address, role = ?role, "probed member");
                Some(role)
            }
            Ok(Err(e)) => {
                info!(member = %address, error = %e, "member not answered");
                None
            }
            Err(_) => {
                info!(member = %address, "member probe timed out");
                None
            }
        };
        topology.record(address.clone(), role)?;
    }

    Ok(topology)
}
