//! Reconfiguration applier
//!
//! Issues the administrative call a plan asks for and interprets the
//! cluster's answer.

use std::time::Duration;

use tracing::{info, warn};

use crate::admin::{AdminError, ClusterAdmin};
use crate::differ::Action;
use crate::error::{ControllerError, ControllerResult};
use crate::topology::Target;

/// What an apply step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    NoChange,
    Initiated,
    Reconfigured,
    /// Another controller initiated the set first
    InitiateRaced,
}

/// Applies actions through a `ClusterAdmin`
pub struct Applier<'a> {
    admin: &'a dyn ClusterAdmin,
    timeout: Duration,
    /// Operator override allowing forced reconfiguration without a primary
    force_override: bool,
}

impl<'a> Applier<'a> {
    pub fn new(admin: &'a dyn ClusterAdmin, timeout: Duration, force_override: bool) -> Self {
        Self {
            admin,
            timeout,
            force_override,
        }
    }

    pub async fn apply(&self, action: &Action, target: &Target) -> ControllerResult<Applied> {
        match action {
            Action::NoChange => Ok(Applied::NoChange),
            Action::Initiate(config) => {
                info!(member = %target.address, members = config.members.len(), "initiating replica set");

                let result = tokio::time::timeout(self.timeout, self.admin.initiate(&target.address, config)).await?;
                match result {
                    Ok(()) => Ok(Applied::Initiated),
                    Err(AdminError::AlreadyInitialized) => {
                        info!(member = %target.address, "replica set was initiated concurrently");
                        Ok(Applied::InitiateRaced)
                    }
                    Err(AdminError::Connectivity(msg)) => Err(ControllerError::Connectivity(msg)),
                    Err(e) => Err(ControllerError::Protocol(format!("initiate failed: {}", e))),
                }
            }
            Action::Reconfigure(config) => {
                let force = !target.is_primary;
                if force && !self.force_override {
                    return Err(ControllerError::NoPrimary);
                }
                if force {
                    warn!(member = %target.address, version = config.version, "forcing reconfiguration without a primary");
                } else {
                    info!(
                        member = %target.address,
                        version = config.version,
                        members = config.members.len(),
                        "reconfiguring replica set"
                    );
                }

                tokio::time::timeout(self.timeout, self.admin.reconfigure(&target.address, config, force))
                    .await?
                    .map_err(ControllerError::from)?;
                Ok(Applied::Reconfigured)
            }
        }
    }
}
