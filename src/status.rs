//! Cluster status reader
//!
//! Only the cluster's explicit "not yet initialized" answer yields
//! `Uninitialized`. Anything ambiguous is a connectivity failure, because
//! treating a live set as uninitialized would re-initiate it.

use std::time::Duration;

use tracing::debug;

use crate::admin::{AdminError, ClusterAdmin, ConfigRead};
use crate::error::{ControllerError, ControllerResult};
use crate::types::{ClusterStatus, MemberAddress};

/// Read the current status from `target`
pub async fn read_status(
    admin: &dyn ClusterAdmin,
    target: &MemberAddress,
    timeout: Duration,
) -> ControllerResult<ClusterStatus> {
    let read = tokio::time::timeout(timeout, admin.read_config(target)).await?;

    match read {
        Ok(ConfigRead::Present(config)) => {
            debug!(
                member = %target,
                version = config.version,
                members = config.members.len(),
                "read replica set configuration"
            );
            Ok(ClusterStatus::Initialized(config))
        }
        Ok(ConfigRead::NotInitialized) => {
            debug!(member = %target, "replica set not initialized");
            Ok(ClusterStatus::Uninitialized)
        }
        Err(AdminError::Connectivity(msg)) => Err(ControllerError::Connectivity(msg)),
        Err(e) => Err(ControllerError::Connectivity(format!("status read failed: {}", e))),
    }
}
