//! One reconciliation pass
//!
//! resolve → probe → read status → diff → apply. Every pass starts from a
//! fresh read of the cluster. The only thing carried between passes is
//! whether an initiated set was ever seen, which rules out initiating
//! again. Cancellation is checked between steps, never inside a call.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admin::ClusterAdmin;
use crate::applier::{Applied, Applier};
use crate::config::ControllerConfig;
use crate::differ::{diff, Action};
use crate::error::{ControllerError, ControllerResult};
use crate::resolver::{EndpointResolver, NameResolver};
use crate::status::read_status;
use crate::topology::{probe_all, Target, Topology};
use crate::types::{ClusterStatus, MemberAddress, Outcome};

/// Initiate attempts per pass: the first plus one retry after a race
const INITIATE_ATTEMPTS: usize = 2;

/// Runs reconciliation passes against one replica set
#[derive(Clone)]
pub struct Reconciler {
    resolver: EndpointResolver,
    admin: Arc<dyn ClusterAdmin>,
    set_name: String,
    call_timeout: Duration,
    force_override: bool,
    /// Set once any pass has seen an initiated set; initiate is refused after that
    seen_initialized: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        resolver: EndpointResolver,
        admin: Arc<dyn ClusterAdmin>,
        set_name: impl Into<String>,
        call_timeout: Duration,
        force_override: bool,
    ) -> Self {
        Self {
            resolver,
            admin,
            set_name: set_name.into(),
            call_timeout,
            force_override,
            seen_initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a pass of this reconciler has observed an initiated set
    pub fn seen_initialized(&self) -> bool {
        self.seen_initialized.load(Ordering::Acquire)
    }

    /// Build a reconciler from configuration and the two collaborators
    pub fn from_config(
        config: &ControllerConfig,
        names: Arc<dyn NameResolver>,
        admin: Arc<dyn ClusterAdmin>,
    ) -> Self {
        let resolver = EndpointResolver::new(
            names,
            config.endpoints.clone(),
            config.default_port,
            config.resolve_timeout(),
        );
        Self::new(
            resolver,
            admin,
            config.set_name.clone(),
            config.call_timeout(),
            config.force_reconfigure,
        )
    }

    /// Run one pass and report its outcome
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Outcome {
        let outcome = match self.try_pass(cancel).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e),
        };

        match &outcome {
            Outcome::Failed(ControllerError::Cancelled) => debug!("pass cancelled"),
            Outcome::Failed(e @ ControllerError::WouldEmptyCluster { .. }) => {
                error!(error = %e, "refusing membership change; fix the endpoint list")
            }
            Outcome::Failed(e) if e.is_transient_contention() => info!(error = %e, "pass lost a race"),
            Outcome::Failed(e) => warn!(error = %e, "pass failed"),
            other => info!(outcome = %other, "pass complete"),
        }
        outcome
    }

    async fn try_pass(&self, cancel: &CancellationToken) -> ControllerResult<Outcome> {
        for attempt in 1..=INITIATE_ATTEMPTS {
            checkpoint(cancel)?;
            let resolution = self.resolver.resolve_all().await;
            if resolution.is_partial() {
                warn!(failed = resolution.failures.len(), "some endpoint names did not resolve");
            }
            let desired = resolution.into_desired()?;
            debug!(desired = ?desired, "desired members");

            checkpoint(cancel)?;
            let topology = probe_all(self.admin.as_ref(), &desired, self.call_timeout).await?;
            let mut target = topology.target()?;

            checkpoint(cancel)?;
            let status = read_status(self.admin.as_ref(), &target.address, self.call_timeout).await?;

            if let ClusterStatus::Initialized(current) = &status {
                self.seen_initialized.store(true, Ordering::Release);
                if !target.is_primary {
                    let outside: BTreeSet<MemberAddress> = current.hosts().difference(&desired).cloned().collect();
                    if let Some(primary) = self.find_primary(&outside).await {
                        target = Target {
                            address: primary,
                            is_primary: true,
                        };
                    }
                }
            }

            let plan = diff(&desired, &status, &self.set_name)?;
            if !plan.to_add.is_empty() || !plan.to_remove.is_empty() {
                info!(
                    add = ?plan.to_add,
                    remove = ?plan.to_remove,
                    "membership delta"
                );
            }

            if matches!(plan.action, Action::Initiate(_)) {
                self.check_initiate(&desired, &topology)?;
            }

            checkpoint(cancel)?;
            let applier = Applier::new(self.admin.as_ref(), self.call_timeout, self.force_override);
            match applier.apply(&plan.action, &target).await? {
                Applied::NoChange => return Ok(Outcome::NoChange),
                Applied::Initiated => {
                    self.seen_initialized.store(true, Ordering::Release);
                    return Ok(Outcome::Initiated);
                }
                Applied::Reconfigured => return Ok(Outcome::Reconfigured),
                Applied::InitiateRaced => {
                    debug!(attempt, "re-reading status after initiate race");
                }
            }
        }

        Err(ControllerError::Protocol(
            "initiate kept racing with another controller".to_string(),
        ))
    }

    /// Initiate only a set of fresh members, all of which answered
    fn check_initiate(&self, desired: &BTreeSet<MemberAddress>, topology: &Topology) -> ControllerResult<()> {
        if self.seen_initialized() {
            return Err(ControllerError::Connectivity(
                "replica set was initiated before but now reads as uninitialized; not initiating again"
                    .to_string(),
            ));
        }
        if !topology.unreachable.is_empty() {
            return Err(ControllerError::Connectivity(format!(
                "{} member(s) unreachable; not initiating until every endpoint answers",
                topology.unreachable.len()
            )));
        }
        if topology.uninitialized != *desired {
            let members: Vec<String> = desired
                .difference(&topology.uninitialized)
                .map(|a| a.to_string())
                .collect();
            return Err(ControllerError::Connectivity(format!(
                "{} already belong to a replica set; not initiating",
                members.join(", ")
            )));
        }
        Ok(())
    }

    /// Look for a primary among members that are no longer desired
    async fn find_primary(&self, candidates: &BTreeSet<MemberAddress>) -> Option<MemberAddress> {
        if candidates.is_empty() {
            return None;
        }
        match probe_all(self.admin.as_ref(), candidates, self.call_timeout).await {
            Ok(topology) => topology.primary,
            Err(e) => {
                warn!(error = %e, "probing current members failed");
                None
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> ControllerResult<()> {
    if cancel.is_cancelled() {
        return Err(ControllerError::Cancelled);
    }
    Ok(())
}
