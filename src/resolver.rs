//! Endpoint resolution
//!
//! Turns the operator's endpoint names into the desired member set. Each
//! name is resolved on its own; a name that fails is recorded and the
//! others still contribute. Nothing is cached between passes, since the
//! orchestrator can change what a name points at at any time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::types::MemberAddress;

/// Failure to resolve a single name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid endpoint name {0:?}")]
    InvalidName(String),

    #[error("{name} does not resolve: {reason}")]
    Lookup { name: String, reason: String },

    #[error("{0} resolved to no addresses")]
    NoAddresses(String),

    #[error("lookup of {0} timed out")]
    Timeout(String),
}

/// Name resolution capability
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve one endpoint name into concrete member addresses
    async fn resolve(&self, name: &str, default_port: u16) -> Result<BTreeSet<MemberAddress>, ResolveError>;
}

/// Resolver backed by the system resolver (`getaddrinfo`)
#[derive(Debug, Default, Clone)]
pub struct DnsResolver;

impl DnsResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, name: &str, default_port: u16) -> Result<BTreeSet<MemberAddress>, ResolveError> {
        let endpoint = MemberAddress::parse_with_default(name, default_port)
            .map_err(|_| ResolveError::InvalidName(name.to_string()))?;

        let addrs = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| ResolveError::Lookup {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        // lookup_host only yields IPv4/IPv6 stream addresses
        let resolved: BTreeSet<MemberAddress> = addrs
            .map(|sa| MemberAddress::new(sa.ip().to_string(), sa.port()))
            .collect();

        if resolved.is_empty() {
            return Err(ResolveError::NoAddresses(name.to_string()));
        }
        Ok(resolved)
    }
}

/// A name that failed during one resolution round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFailure {
    pub name: String,
    pub reason: String,
}

/// Per-round result: the union of what resolved plus what did not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub addresses: BTreeSet<MemberAddress>,
    pub failures: Vec<NameFailure>,
}

impl Resolution {
    /// True when at least one name failed but something still resolved
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.addresses.is_empty()
    }

    /// The desired member set, or a resolution failure when nothing resolved
    pub fn into_desired(self) -> ControllerResult<BTreeSet<MemberAddress>> {
        if self.addresses.is_empty() {
            let reason = if self.failures.is_empty() {
                "no endpoint names resolved to any address".to_string()
            } else {
                self.failures
                    .iter()
                    .map(|f| f.reason.clone())
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(ControllerError::Resolution(reason));
        }
        Ok(self.addresses)
    }
}

/// Resolves the configured endpoint names into the desired member set
#[derive(Clone)]
pub struct EndpointResolver {
    resolver: Arc<dyn NameResolver>,
    names: Vec<String>,
    default_port: u16,
    timeout: Duration,
}

impl EndpointResolver {
    pub fn new(resolver: Arc<dyn NameResolver>, names: Vec<String>, default_port: u16, timeout: Duration) -> Self {
        Self {
            resolver,
            names,
            default_port,
            timeout,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Resolve every name, absorbing per-name failures
    pub async fn resolve_all(&self) -> Resolution {
        let mut resolution = Resolution::default();

        for name in &self.names {
            let result = tokio::time::timeout(self.timeout, self.resolver.resolve(name, self.default_port))
                .await
                .unwrap_or_else(|_| Err(ResolveError::Timeout(name.clone())));

            match result {
                Ok(addresses) => {
                    debug!(name = %name, count = addresses.len(), "resolved endpoint");
                    resolution.addresses.extend(addresses);
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "endpoint does not resolve");
                    resolution.failures.push(NameFailure {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        resolution
    }
}
