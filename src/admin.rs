//! Cluster administrative protocol
//!
//! The seam between the reconciliation engine and the database driver.
//! Every call is addressed to one member, the way an operator would run
//! an admin command against a specific `mongod`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ControllerError;
use crate::types::{ClusterConfig, MemberAddress};

/// Role a member reports for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Primary,
    Secondary,
    /// Started with a replica set name but never initiated
    Uninitialized,
    /// Arbiter, recovering, startup and the like
    Other,
}

/// Result of reading the configuration from a member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRead {
    Present(ClusterConfig),
    NotInitialized,
}

/// Administrative call failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// Initiate raced with another controller
    #[error("replica set already initialized")]
    AlreadyInitialized,

    /// Version moved underneath us or another reconfig is in flight
    #[error("configuration version conflict: {0}")]
    VersionConflict(String),

    /// The member answered and refused the command
    #[error("command rejected ({code}): {message}")]
    Rejected { code: i32, message: String },

    /// Unreachable, timed out or not authenticated
    #[error("{0}")]
    Connectivity(String),

    /// Response did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<AdminError> for ControllerError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::VersionConflict(msg) => ControllerError::VersionConflict(msg),
            AdminError::Connectivity(msg) => ControllerError::Connectivity(msg),
            other => ControllerError::Protocol(other.to_string()),
        }
    }
}

/// Administrative capabilities consumed by the status reader and the applier
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Ask a member for its role
    async fn probe(&self, target: &MemberAddress) -> Result<NodeRole, AdminError>;

    /// Read the current replica set configuration
    async fn read_config(&self, target: &MemberAddress) -> Result<ConfigRead, AdminError>;

    /// Bootstrap a new replica set with the given configuration
    async fn initiate(&self, target: &MemberAddress, config: &ClusterConfig) -> Result<(), AdminError>;

    /// Replace the configuration; `force` overrides the primary's safety checks
    async fn reconfigure(&self, target: &MemberAddress, config: &ClusterConfig, force: bool) -> Result<(), AdminError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_error_classification() {
        assert!(matches!(
            ControllerError::from(AdminError::VersionConflict("stale".into())),
            ControllerError::VersionConflict(_)
        ));
        assert!(matches!(
            ControllerError::from(AdminError::Connectivity("refused".into())),
            ControllerError::Connectivity(_)
        ));
        assert!(matches!(
            ControllerError::from(AdminError::Rejected { code: 93, message: "invalid".into() }),
            ControllerError::Protocol(_)
        ));
    }
}
