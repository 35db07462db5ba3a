//! Core types for the replica set controller
//!
//! Addresses, members and configuration documents shared by the
//! resolver, the differ and the administrative protocol.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Default MongoDB port, used for names that carry no explicit port
pub const DEFAULT_PORT: u16 = 27017;

/// Highest member `_id` accepted by a replica set configuration
pub const MAX_MEMBER_ID: u32 = 255;

/// A concrete host-and-port identifying one candidate member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberAddress {
    /// Host name or IP literal, without brackets
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl MemberAddress {
    /// Create a new member address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`, falling back to `default_port`
    pub fn parse_with_default(input: &str, default_port: u16) -> Result<Self, ControllerError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ControllerError::Configuration("empty address".to_string()));
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                ControllerError::Configuration(format!("unterminated IPv6 literal in {:?}", input))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(input, port)?,
                None if tail.is_empty() => default_port,
                None => {
                    return Err(ControllerError::Configuration(format!("invalid address {:?}", input)))
                }
            };
            return Ok(Self::new(host, port));
        }

        // A bare IPv6 literal has more than one colon and no port
        match input.matches(':').count() {
            0 => Ok(Self::new(input, default_port)),
            1 => {
                let (host, port) = input.split_once(':').unwrap_or((input, ""));
                if host.is_empty() {
                    return Err(ControllerError::Configuration(format!("missing host in {:?}", input)));
                }
                Ok(Self::new(host, parse_port(input, port)?))
            }
            _ => Ok(Self::new(input, default_port)),
        }
    }
}

fn parse_port(input: &str, port: &str) -> Result<u16, ControllerError> {
    port.parse::<u16>()
        .map_err(|_| ControllerError::Configuration(format!("invalid port in {:?}", input)))
}

impl fmt::Display for MemberAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for MemberAddress {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default(s, DEFAULT_PORT)
    }
}

/// One entry of the replica set member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member index (`_id` in the configuration document)
    pub id: u32,
    /// Member address
    pub host: MemberAddress,
}

impl Member {
    pub fn new(id: u32, host: MemberAddress) -> Self {
        Self { id, host }
    }
}

/// The replica set configuration document, as far as the controller cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Replica set name
    pub set_name: String,
    /// Monotonically increasing configuration version
    pub version: i64,
    /// Members ordered by index
    pub members: Vec<Member>,
}

impl ClusterConfig {
    /// Addresses of all current members
    pub fn hosts(&self) -> std::collections::BTreeSet<MemberAddress> {
        self.members.iter().map(|m| m.host.clone()).collect()
    }

    /// Highest member index in use, if any
    pub fn max_member_id(&self) -> Option<u32> {
        self.members.iter().map(|m| m.id).max()
    }
}

/// Whether the replica set has been initiated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    /// No configuration yet; the next action is an initiate
    Uninitialized,
    /// Configuration present; the next action is a reconfigure (or nothing)
    Initialized(ClusterConfig),
}

impl ClusterStatus {
    pub fn is_initialized(&self) -> bool {
        matches!(self, ClusterStatus::Initialized(_))
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Membership already matched
    NoChange,
    /// The set was bootstrapped
    Initiated,
    /// The member list was changed
    Reconfigured,
    /// The pass failed
    Failed(ControllerError),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Process exit status for this outcome in one-shot mode
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Failed(err) => err.exit_code(),
            _ => 0,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NoChange => write!(f, "no change"),
            Outcome::Initiated => write!(f, "initiated"),
            Outcome::Reconfigured => write!(f, "reconfigured"),
            Outcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_without_port() {
        let addr = MemberAddress::parse_with_default("mongo", 27017).unwrap();
        assert_eq!(addr, MemberAddress::new("mongo", 27017));
    }

    #[test]
    fn test_parse_host_with_port() {
        let addr: MemberAddress = "10.0.0.5:27018".parse().unwrap();
        assert_eq!(addr.host, "10.0.0.5");
        assert_eq!(addr.port, 27018);
    }

    #[test]
    fn test_parse_ipv6() {
        let bare = MemberAddress::parse_with_default("fd00::1", 27017).unwrap();
        assert_eq!(bare, MemberAddress::new("fd00::1", 27017));

        let bracketed: MemberAddress = "[fd00::1]:27019".parse().unwrap();
        assert_eq!(bracketed, MemberAddress::new("fd00::1", 27019));
        assert_eq!(bracketed.to_string(), "[fd00::1]:27019");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MemberAddress::parse_with_default("", 1).is_err());
        assert!(MemberAddress::parse_with_default("host:notaport", 1).is_err());
        assert!(MemberAddress::parse_with_default(":27017", 1).is_err());
        assert!(MemberAddress::parse_with_default("[fd00::1", 1).is_err());
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(Outcome::NoChange.exit_code(), 0);
        assert_eq!(Outcome::Reconfigured.exit_code(), 0);
        let failed = Outcome::Failed(ControllerError::WouldEmptyCluster { current: 3, retained: 1 });
        assert_eq!(failed.exit_code(), 7);
        assert!(failed.is_failure());
    }
}
