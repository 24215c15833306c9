//! Power transitions and fleet balancing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local};
use farmerbot_client::ChainClient;
use tracing::{debug, error, info, warn};

use crate::constants::periodic_wake_up_duration;
use crate::error::{Error, PowerGuard, Result};
use crate::fleet::Fleet;
use crate::node::{Node, PowerState};

/// Drives power transitions through the chain and keeps the fleet sized to
/// its load.
#[derive(Clone)]
pub struct PowerController {
    fleet: Arc<Fleet>,
}

impl PowerController {
    #[must_use]
    pub fn new(fleet: Arc<Fleet>) -> Self {
        Self { fleet }
    }

    /// Asks the chain to wake a node. No-op when it is already up or on its
    /// way up.
    pub async fn power_on(&self, chain: &dyn ChainClient, node_id: u32) -> Result<()> {
        let mut nodes = self.fleet.guard().await;
        Self::power_on_locked(&mut nodes, chain, node_id, Local::now()).await
    }

    /// `power_on` against an already-held fleet guard.
    ///
    /// The scheduler calls this inside its reservation critical section.
    pub(crate) async fn power_on_locked(
        nodes: &mut HashMap<u32, Node>,
        chain: &dyn ChainClient,
        node_id: u32,
        now: DateTime<Local>,
    ) -> Result<()> {
        let node = nodes.get_mut(&node_id).ok_or(Error::NodeNotFound(node_id))?;
        if matches!(node.power_state, PowerState::On | PowerState::WakingUp) {
            return Ok(());
        }

        info!(node_id, "power on");
        if let Err(e) = chain.set_power_target(node_id, true).await {
            // the extrinsic may have landed regardless; the chain target is
            // authoritative
            let target = chain.power_target(node_id).await?;
            if target.target.is_down() {
                return Err(e.into());
            }
            warn!(
                node_id,
                "power target reads up although the chain call failed"
            );
        }

        node.set_power_state(PowerState::WakingUp, now);
        node.last_time_awake = now;
        Ok(())
    }

    /// Asks the chain to shut a node down, enforcing every guard condition.
    /// No-op when it is already down or on its way down.
    pub async fn power_off(&self, chain: &dyn ChainClient, node_id: u32) -> Result<()> {
        let now = Local::now();
        let mut nodes = self.fleet.guard().await;

        let on_nodes = nodes
            .values()
            .filter(|n| n.power_state == PowerState::On)
            .count();

        let node = nodes.get_mut(&node_id).ok_or(Error::NodeNotFound(node_id))?;
        if matches!(node.power_state, PowerState::Off | PowerState::ShuttingDown) {
            return Ok(());
        }

        let blocked = |guard: PowerGuard| Error::PowerActionBlocked { node_id, guard };
        if node.never_shut_down {
            return Err(blocked(PowerGuard::NeverShutDown));
        }
        if node.has_public_config {
            return Err(blocked(PowerGuard::PublicConfig));
        }
        if node.has_claimed_resources(now) {
            return Err(blocked(PowerGuard::HasClaimedResources));
        }
        if node.has_active_rent_contract {
            return Err(blocked(PowerGuard::ActiveRentContract));
        }
        if node.has_active_contracts {
            return Err(blocked(PowerGuard::ActiveContracts));
        }
        if !node.is_unused() {
            return Err(blocked(PowerGuard::InUse));
        }
        if now.signed_duration_since(node.last_time_power_state_changed)
            < periodic_wake_up_duration()
        {
            return Err(blocked(PowerGuard::InWakeUpWindow));
        }
        if on_nodes < 2 {
            return Err(blocked(PowerGuard::WouldLeaveFarmIdle));
        }

        info!(node_id, "power off");
        if let Err(e) = chain.set_power_target(node_id, false).await {
            let target = chain.power_target(node_id).await?;
            if target.target.is_up() && target.state.is_up() {
                return Err(e.into());
            }
            warn!(
                node_id,
                "power target reads down although the chain call failed"
            );
        }

        node.set_power_state(PowerState::ShuttingDown, now);
        Ok(())
    }

    /// Sizes the fleet to its utilisation.
    ///
    /// Rented nodes count as fully consumed, which forces extra capacity
    /// online while they are handed out whole.
    pub async fn balance(&self, chain: &dyn ChainClient, now: DateTime<Local>) -> Result<()> {
        let pool = self
            .fleet
            .filter_by_power_state(&[PowerState::On, PowerState::WakingUp])
            .await;
        let (mut used, mut total) = resource_usage(&pool);
        if total == 0 {
            debug!("no usable capacity online, skipping balancing");
            return Ok(());
        }

        let threshold = f64::from(self.fleet.config.power.wake_up_threshold);
        let utilisation = utilisation_percent(used, total);

        if utilisation >= threshold {
            info!(utilisation, threshold, "resource usage too high, waking a node");
            let off = self.fleet.filter_by_power_state(&[PowerState::Off]).await;
            let Some(node) = off.first() else {
                error!("no off node available to absorb the load");
                return Err(Error::NoSuitableNode);
            };
            return self.power_on(chain, node.id).await;
        }

        debug!(utilisation, threshold, "resource usage low, trying to shrink");
        let mut nodes_left_online = self
            .fleet
            .filter_by_power_state(&[PowerState::On])
            .await
            .len();

        for candidate in self.fleet.filter_allowed_to_shut_down(now).await {
            if nodes_left_online <= 1 {
                break;
            }

            let new_used = used.saturating_sub(candidate.resources.used.sum());
            let new_total = total.saturating_sub(candidate.resources.total.sum());
            if new_total == 0 {
                break;
            }
            if utilisation_percent(new_used, new_total) >= threshold {
                continue;
            }

            match self.power_off(chain, candidate.id).await {
                Ok(()) => {
                    info!(node_id = candidate.id, "resource usage low, shut down unused node");
                    used = new_used;
                    total = new_total;
                    nodes_left_online -= 1;
                }
                Err(e) => {
                    // keep the speculative subtraction reverted and move on
                    error!(node_id = candidate.id, error = %e, "failed to power off node");
                }
            }
        }

        Ok(())
    }
}

fn utilisation_percent(used: u128, total: u128) -> f64 {
    100.0 * used as f64 / total as f64
}

fn resource_usage(nodes: &[Node]) -> (u128, u128) {
    let mut used = 0u128;
    let mut total = 0u128;
    for node in nodes {
        if node.has_active_rent_contract {
            used += node.resources.total.sum();
        } else {
            used += node.resources.used.sum();
        }
        total += node.resources.total.sum();
    }
    (used, total)
}
