//! In-memory collaborators for reconciliation tests

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use replica_controller::resolver::ResolveError;
use replica_controller::*;

pub fn addr(host: &str) -> MemberAddress {
    MemberAddress::new(host, 27017)
}

pub fn config(version: i64, members: &[(u32, &str)]) -> ClusterConfig {
    ClusterConfig {
        set_name: "rs".to_string(),
        version,
        members: members.iter().map(|(id, h)| Member::new(*id, addr(h))).collect(),
    }
}

/// Name table the tests can rewrite between passes
#[derive(Default)]
pub struct FakeResolver {
    table: Mutex<HashMap<String, Vec<MemberAddress>>>,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, name: &str, hosts: &[&str]) {
        self.table
            .lock()
            .unwrap()
            .insert(name.to_string(), hosts.iter().map(|h| addr(h)).collect());
    }

    pub fn remove(&self, name: &str) {
        self.table.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl NameResolver for FakeResolver {
    async fn resolve(&self, name: &str, _default_port: u16) -> Result<BTreeSet<MemberAddress>, ResolveError> {
        match self.table.lock().unwrap().get(name) {
            Some(hosts) if !hosts.is_empty() => Ok(hosts.iter().cloned().collect()),
            Some(_) => Err(ResolveError::NoAddresses(name.to_string())),
            None => Err(ResolveError::Lookup {
                name: name.to_string(),
                reason: "Name or service not known".to_string(),
            }),
        }
    }
}

/// Counts of administrative calls
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Calls {
    pub probe: usize,
    pub read: usize,
    pub initiate: usize,
    pub reconfigure: usize,
    pub forced: usize,
}

#[derive(Default)]
struct ClusterState {
    config: Option<ClusterConfig>,
    primary: Option<MemberAddress>,
    roles: HashMap<MemberAddress, NodeRole>,
    unreachable: HashSet<MemberAddress>,
    read_errors: VecDeque<AdminError>,
    initiate_errors: VecDeque<AdminError>,
    reconfigure_errors: VecDeque<AdminError>,
    /// Configuration a competing controller installs when an initiate races
    racing_config: Option<ClusterConfig>,
    read_delay: Option<Duration>,
    reconfigure_delay: Option<Duration>,
    calls: Calls,
}

/// A replica set living in memory that honors initiate and reconfigure
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An initiated set whose first member is primary
    pub fn initialized(config: ClusterConfig) -> Arc<Self> {
        let cluster = Self::new();
        {
            let mut state = cluster.state.lock().unwrap();
            state.primary = config.members.first().map(|m| m.host.clone());
            state.config = Some(config);
        }
        cluster
    }

    pub fn config(&self) -> Option<ClusterConfig> {
        self.state.lock().unwrap().config.clone()
    }

    pub fn primary(&self) -> Option<MemberAddress> {
        self.state.lock().unwrap().primary.clone()
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn set_primary(&self, host: Option<&str>) {
        self.state.lock().unwrap().primary = host.map(addr);
    }

    pub fn set_role(&self, host: &str, role: NodeRole) {
        self.state.lock().unwrap().roles.insert(addr(host), role);
    }

    pub fn set_unreachable(&self, host: &str) {
        self.state.lock().unwrap().unreachable.insert(addr(host));
    }

    pub fn fail_reads(&self, error: AdminError, times: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..times {
            state.read_errors.push_back(error.clone());
        }
    }

    pub fn fail_next_reconfigure(&self, error: AdminError) {
        self.state.lock().unwrap().reconfigure_errors.push_back(error);
    }

    /// Every config read stalls for `delay` before answering
    pub fn slow_reads(&self, delay: Duration) {
        self.state.lock().unwrap().read_delay = Some(delay);
    }

    /// Every reconfigure stalls for `delay` before taking effect
    pub fn slow_reconfigure(&self, delay: Duration) {
        self.state.lock().unwrap().reconfigure_delay = Some(delay);
    }

    /// Next initiate loses a race: the competitor's config appears and the call fails
    pub fn race_next_initiate(&self, competitor: ClusterConfig) {
        let mut state = self.state.lock().unwrap();
        state.initiate_errors.push_back(AdminError::AlreadyInitialized);
        state.racing_config = Some(competitor);
    }

    fn check_reachable(state: &ClusterState, target: &MemberAddress) -> Result<(), AdminError> {
        if state.unreachable.contains(target) {
            return Err(AdminError::Connectivity(format!("{} connection refused", target)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterAdmin for FakeCluster {
    async fn probe(&self, target: &MemberAddress) -> Result<NodeRole, AdminError> {
        let mut state = self.state.lock().unwrap();
        state.calls.probe += 1;
        Self::check_reachable(&state, target)?;

        if let Some(role) = state.roles.get(target) {
            return Ok(*role);
        }
        let is_member = state
            .config
            .as_ref()
            .map_or(false, |c| c.members.iter().any(|m| &m.host == target));

        Ok(if state.primary.as_ref() == Some(target) && is_member {
            NodeRole::Primary
        } else if is_member {
            NodeRole::Secondary
        } else {
            NodeRole::Uninitialized
        })
    }

    async fn read_config(&self, target: &MemberAddress) -> Result<ConfigRead, AdminError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.read += 1;
            state.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        Self::check_reachable(&state, target)?;
        if let Some(error) = state.read_errors.pop_front() {
            return Err(error);
        }

        match &state.config {
            Some(config) if config.members.iter().any(|m| &m.host == target) => {
                Ok(ConfigRead::Present(config.clone()))
            }
            _ => Ok(ConfigRead::NotInitialized),
        }
    }

    async fn initiate(&self, target: &MemberAddress, config: &ClusterConfig) -> Result<(), AdminError> {
        let mut state = self.state.lock().unwrap();
        state.calls.initiate += 1;
        Self::check_reachable(&state, target)?;

        if let Some(error) = state.initiate_errors.pop_front() {
            if let Some(competitor) = state.racing_config.take() {
                state.primary = competitor.members.first().map(|m| m.host.clone());
                state.config = Some(competitor);
            }
            return Err(error);
        }
        if state.config.is_some() {
            return Err(AdminError::AlreadyInitialized);
        }

        state.config = Some(config.clone());
        state.primary = Some(target.clone());
        Ok(())
    }

    async fn reconfigure(&self, target: &MemberAddress, config: &ClusterConfig, force: bool) -> Result<(), AdminError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.reconfigure += 1;
            if force {
                state.calls.forced += 1;
            }
            state.reconfigure_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        Self::check_reachable(&state, target)?;

        if let Some(error) = state.reconfigure_errors.pop_front() {
            return Err(error);
        }
        if !force && state.primary.as_ref() != Some(target) {
            return Err(AdminError::Rejected {
                code: 10107,
                message: "not primary".to_string(),
            });
        }

        let current_version = state.config.as_ref().map_or(0, |c| c.version);
        if config.version != current_version + 1 {
            return Err(AdminError::VersionConflict(format!(
                "version {} must be greater than {}",
                config.version, current_version
            )));
        }

        // Removing the primary hands leadership to the lowest member
        let primary_kept = state
            .primary
            .as_ref()
            .map_or(false, |p| config.members.iter().any(|m| &m.host == p));
        if !primary_kept || force {
            state.primary = config.members.first().map(|m| m.host.clone());
        }
        state.config = Some(config.clone());
        Ok(())
    }
}

/// Reconciler over the fakes with short timeouts
pub fn reconciler(
    names: &[&str],
    resolver: Arc<FakeResolver>,
    cluster: Arc<FakeCluster>,
    force_override: bool,
) -> Reconciler {
    let endpoints = EndpointResolver::new(
        resolver,
        names.iter().map(|n| n.to_string()).collect(),
        27017,
        Duration::from_millis(200),
    );
    Reconciler::new(endpoints, cluster, "rs", Duration::from_millis(200), force_override)
}
