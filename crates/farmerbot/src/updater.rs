//! Periodic probing of managed nodes and the power-state machine.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta};
use farmerbot_client::{ChainClient, NodeClient};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constants::timeout_power_state_change;
use crate::error::{Error, Result};
use crate::fleet::Fleet;
use crate::node::{ConsumableResources, Node, PowerState};

/// Refreshes every managed node once per reconciliation tick.
pub struct Updater {
    fleet: Arc<Fleet>,
    node_client: Arc<dyn NodeClient>,
}

impl Updater {
    #[must_use]
    pub fn new(fleet: Arc<Fleet>, node_client: Arc<dyn NodeClient>) -> Self {
        Self { fleet, node_client }
    }

    /// Probes every managed node and advances its power-state machine.
    ///
    /// Per-node failures are logged and never abort the tick; writes go
    /// back into the fleet one node at a time through the mutex.
    pub async fn update_all(&self, chain: &dyn ChainClient, now: DateTime<Local>) {
        for node in self.fleet.snapshot().await {
            let node_id = node.id;
            let updated = self.probe(chain, node, now).await;
            // the node may have been deleted while we probed
            if let Err(Error::NodeNotFound(_)) = self.fleet.update_node(updated).await {
                debug!(node_id, "node disappeared during update");
            }
        }
    }

    async fn probe(&self, chain: &dyn ChainClient, mut node: Node, now: DateTime<Local>) -> Node {
        // Claimed resources must not be overwritten until their timeout, and
        // nodes expected to be off are not worth a full probe; both get a
        // cheap liveness check instead.
        let lightweight = node.has_claimed_resources(now)
            || (self.fleet.config.continue_on_power_on_err
                && matches!(node.power_state, PowerState::Off | PowerState::WakingUp));

        let reachable = if lightweight {
            self.node_client.system_version(node.twin_id).await.is_ok()
        } else {
            match self.refresh(chain, &mut node).await {
                Ok(()) => true,
                Err(e) => {
                    error!(node_id = node.id, error = %e, "failed to update node");
                    false
                }
            }
        };

        advance_power_state(&mut node, reachable, now);
        node
    }

    /// Fetches everything the fleet tracks about a node, in a fixed order.
    /// The first failure marks the node unreachable for this tick.
    async fn refresh(&self, chain: &dyn ChainClient, node: &mut Node) -> Result<()> {
        let twin = node.twin_id;
        let node_id = node.id;
        let unreachable = move |_| Error::NodeUnreachable { node_id };

        let statistics = self.node_client.statistics(twin).await.map_err(unreachable)?;
        node.update_resources(&statistics);

        node.pools = self
            .node_client
            .storage_pools(twin)
            .await
            .map_err(unreachable)?;
        node.gpus = self.node_client.gpus(twin).await.map_err(unreachable)?;

        let rent_contract = chain.node_rent_contract(node.id).await?;
        node.has_active_rent_contract = rent_contract != 0;

        let contracts = chain.node_contracts(node.id).await?;
        node.has_active_contracts = !contracts.is_empty();

        let record = chain.node(node.id).await?;
        node.has_public_config = record.public_config.is_some();
        node.certified = record.certification.is_certified();

        Ok(())
    }
}

/// Applies one step of the power-state machine.
///
/// `reachable` is the outcome of this tick's probe; stuck transitions fail
/// over once they outlive [`timeout_power_state_change`].
pub fn next_power_state(
    prior: PowerState,
    reachable: bool,
    elapsed: TimeDelta,
) -> PowerState {
    match (prior, reachable) {
        (PowerState::WakingUp, true) => PowerState::On,
        (PowerState::WakingUp, false) => {
            if elapsed < timeout_power_state_change() {
                PowerState::WakingUp
            } else {
                PowerState::Off
            }
        }
        (PowerState::ShuttingDown, true) => {
            if elapsed < timeout_power_state_change() {
                PowerState::ShuttingDown
            } else {
                PowerState::On
            }
        }
        (PowerState::ShuttingDown, false) => PowerState::Off,
        (PowerState::On, true) | (PowerState::Off, true) => PowerState::On,
        (PowerState::On, false) | (PowerState::Off, false) => PowerState::Off,
    }
}

fn advance_power_state(node: &mut Node, reachable: bool, now: DateTime<Local>) {
    let prior = node.power_state;
    let elapsed = now.signed_duration_since(node.last_time_power_state_changed);
    let next = next_power_state(prior, reachable, elapsed);

    match (prior, next) {
        (PowerState::WakingUp, PowerState::Off) => {
            warn!(node_id = node.id, "wake-up was unsuccessful, back to off");
        }
        (PowerState::ShuttingDown, PowerState::On) => {
            warn!(node_id = node.id, "shutdown was unsuccessful, back to on");
        }
        (PowerState::ShuttingDown, PowerState::Off) => {
            info!(node_id = node.id, "shutdown was successful");
        }
        (PowerState::On, PowerState::Off) => {
            warn!(node_id = node.id, "node is not responding while we expect it to");
        }
        _ => {}
    }

    node.set_power_state(next, now);
    if reachable && next == PowerState::On {
        node.last_time_awake = now;
    }
}

/// Builds a [`Node`] from scratch: chain records first, then node probes.
///
/// Used at bootstrap, when a node joins the farm and by `includenode`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn fetch_node(
    chain: &dyn ChainClient,
    node_client: &dyn NodeClient,
    config: &Config,
    node_id: u32,
    has_claimed_resources: bool,
    dedicated_farm: bool,
    old_power_state: PowerState,
    now: DateTime<Local>,
) -> Result<Node> {
    let record = chain.node(node_id).await?;
    let price = chain.dedicated_node_price(node_id).await?;
    let rent_contract = chain.node_rent_contract(node_id).await?;
    let contracts = chain.node_contracts(node_id).await?;
    let power_target = chain.power_target(node_id).await?;

    let mut node = Node {
        id: record.id,
        twin_id: record.twin_id,
        resources: ConsumableResources {
            total: record.resources,
            ..Default::default()
        },
        public_ips_used: 0,
        pools: Vec::new(),
        gpus: Vec::new(),
        certified: record.certification.is_certified(),
        dedicated: price != 0 || dedicated_farm,
        has_active_rent_contract: rent_contract != 0,
        has_active_contracts: !contracts.is_empty(),
        has_public_config: record.public_config.is_some(),
        never_shut_down: config.never_shutdown_nodes.contains(&node_id),
        power_state: old_power_state,
        timeout_claimed_resources: None,
        last_time_power_state_changed: now,
        last_time_awake: now,
        times_random_wake_ups: 0,
    };
    node.adopt_power_target(&power_target, now);

    // expected to be off; the chain totals will have to do
    if matches!(node.power_state, PowerState::Off | PowerState::WakingUp)
        && config.continue_on_power_on_err
    {
        warn!(node_id, "node state is off, skipping node probes");
        return Ok(node);
    }

    let unreachable = |_| Error::NodeUnreachable { node_id };

    if !has_claimed_resources {
        let statistics = node_client
            .statistics(node.twin_id)
            .await
            .map_err(unreachable)?;
        node.update_resources(&statistics);
    }
    node.pools = node_client
        .storage_pools(node.twin_id)
        .await
        .map_err(unreachable)?;
    node.gpus = node_client.gpus(node.twin_id).await.map_err(unreachable)?;

    Ok(node)
}
