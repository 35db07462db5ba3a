//! # replica-controller
//!
//! Keeps the membership of a MongoDB replica set in sync with the hosts
//! behind one or more DNS names, such as container orchestrator service
//! records.
//!
//! Each reconciliation pass resolves the names, probes the members, reads
//! the current configuration, computes the membership delta and applies it
//! with `replSetInitiate` or `replSetReconfig`. The watch loop repeats
//! passes on an interval with exponential backoff after failures.

#![warn(clippy::all)]

pub mod types;
pub mod error;
pub mod config;
pub mod resolver;
pub mod admin;
pub mod mongo;
pub mod topology;
pub mod status;
pub mod differ;
pub mod applier;
pub mod reconcile;
pub mod backoff;
pub mod watch;
/// Command-line interface and argument parsing
pub mod cli;

// Re-export main types
pub use types::{ClusterConfig, ClusterStatus, Member, MemberAddress, Outcome, DEFAULT_PORT};
pub use error::{ControllerError, ControllerResult};
pub use config::ControllerConfig;
pub use resolver::{DnsResolver, EndpointResolver, NameResolver, Resolution};
pub use admin::{AdminError, ClusterAdmin, ConfigRead, NodeRole};
pub use mongo::MongoAdmin;
pub use differ::{diff, Action, Plan};
pub use reconcile::Reconciler;
pub use backoff::Backoff;
pub use watch::{run_once, WatchLoop, WatchReport, WatchSettings, WatchState};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
