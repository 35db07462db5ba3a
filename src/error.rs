//! Error types for the replica set controller

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Stable process exit codes
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const CONFIGURATION: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const RESOLUTION: i32 = 3;
    pub const CONNECTIVITY: i32 = 4;
    pub const PROTOCOL: i32 = 5;
    pub const VERSION_CONFLICT: i32 = 6;
    pub const WOULD_EMPTY_CLUSTER: i32 = 7;
}

/// Why a reconciliation pass failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerError {
    /// No endpoint name resolved to any address
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// Cluster unreachable, timed out or refused authentication
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Members are reachable but none is a healthy primary
    #[error("No healthy primary found; pass --force-reconfigure to reconfigure through a secondary")]
    NoPrimary,

    /// Initiate or reconfigure rejected by the cluster
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// More than one member claims to be primary
    #[error("Split brain detected: {first} and {second} both report primary")]
    SplitBrain { first: String, second: String },

    /// Another writer advanced the configuration concurrently
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Applying the membership change would leave the set without a quorum of its current members
    #[error("Refusing reconfiguration: only {retained} of {current} current members would remain")]
    WouldEmptyCluster { current: usize, retained: usize },

    /// Shutdown was requested mid-pass
    #[error("Cancelled")]
    Cancelled,

    /// Invalid configuration or input
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ControllerError {
    /// Process exit status this failure maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            ControllerError::Resolution(_) => exit::RESOLUTION,
            ControllerError::Connectivity(_) | ControllerError::NoPrimary => exit::CONNECTIVITY,
            ControllerError::Protocol(_) | ControllerError::SplitBrain { .. } => exit::PROTOCOL,
            ControllerError::VersionConflict(_) => exit::VERSION_CONFLICT,
            ControllerError::WouldEmptyCluster { .. } => exit::WOULD_EMPTY_CLUSTER,
            ControllerError::Cancelled => exit::SUCCESS,
            ControllerError::Configuration(_) => exit::CONFIGURATION,
        }
    }

    /// Expected contention that heals on the next pass
    pub fn is_transient_contention(&self) -> bool {
        matches!(self, ControllerError::VersionConflict(_))
    }
}

impl From<Elapsed> for ControllerError {
    fn from(err: Elapsed) -> Self {
        ControllerError::Connectivity(format!("timed out: {}", err))
    }
}
