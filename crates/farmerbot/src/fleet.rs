//! Process-wide fleet state.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use farmerbot_client::{ChainClient, NodeClient};
use farmerbot_proto::Farm;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::{Node, PowerState};
use crate::updater;

/// The single mutable structure of the bot: the farm, its managed nodes and
/// the validated configuration.
///
/// Every write goes through the one mutex; readers copy nodes out under the
/// lock and compute on the copies.
pub struct Fleet {
    pub farm: Farm,
    pub config: Config,
    nodes: Mutex<HashMap<u32, Node>>,
}

impl Fleet {
    /// Creates a fleet from already-fetched parts.
    #[must_use]
    pub fn new(farm: Farm, config: Config, nodes: HashMap<u32, Node>) -> Self {
        Self {
            farm,
            config,
            nodes: Mutex::new(nodes),
        }
    }

    /// Builds the initial fleet state from the chain.
    ///
    /// Verifies the farmer twin owns the farm, validates the configured node
    /// lists against the actual farm membership and probes every managed
    /// node once.
    pub async fn bootstrap(
        chain: &dyn ChainClient,
        node_client: &dyn NodeClient,
        mut config: Config,
        farmer_twin: u32,
        now: DateTime<Local>,
    ) -> Result<Self> {
        let farm = chain.farm(config.farm_id).await?;

        if farm.twin_id != farmer_twin {
            return Err(Error::Unauthorized {
                twin_id: farmer_twin,
                farmer_twin_id: farm.twin_id,
            });
        }

        let farm_nodes = chain.nodes_in_farm(config.farm_id).await?;
        config.validate(&farm_nodes)?;

        let mut nodes = HashMap::new();
        for node_id in config.managed_nodes(&farm_nodes) {
            debug!(node_id, "adding node");
            let node = updater::fetch_node(
                chain,
                node_client,
                &config,
                node_id,
                false,
                farm.dedicated_farm,
                PowerState::On,
                now,
            )
            .await
            .map_err(|e| {
                if !config.continue_on_power_on_err {
                    warn!("the continue_on_power_on_err flag skips node probe errors");
                }
                e
            })?;

            validate_node(&node)?;
            nodes.insert(node_id, node);
        }

        Ok(Self::new(farm, config, nodes))
    }

    /// Locks the node map for a compound read-modify-write sequence.
    pub(crate) async fn guard(&self) -> MutexGuard<'_, HashMap<u32, Node>> {
        self.nodes.lock().await
    }

    /// Copies a node out of the fleet.
    pub async fn node(&self, node_id: u32) -> Option<Node> {
        self.nodes.lock().await.get(&node_id).cloned()
    }

    /// Adds or replaces a node.
    pub async fn add_node(&self, node: Node) {
        self.nodes.lock().await.insert(node.id, node);
    }

    /// Removes a node from management.
    pub async fn delete_node(&self, node_id: u32) {
        self.nodes.lock().await.remove(&node_id);
    }

    /// Replaces an existing node; errors when the id is not managed.
    pub async fn update_node(&self, node: Node) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        match nodes.get_mut(&node.id) {
            Some(slot) => {
                *slot = node;
                Ok(())
            }
            None => Err(Error::NodeNotFound(node.id)),
        }
    }

    /// Ids of every managed node, ascending.
    pub async fn node_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.nodes.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Copies every node out of the fleet, ordered by id.
    pub async fn snapshot(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.lock().await.values().cloned().collect();
        nodes.sort_unstable_by_key(|n| n.id);
        nodes
    }

    /// Nodes currently in one of the given power states.
    pub async fn filter_by_power_state(&self, states: &[PowerState]) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .lock()
            .await
            .values()
            .filter(|n| states.contains(&n.power_state))
            .cloned()
            .collect();
        nodes.sort_unstable_by_key(|n| n.id);
        nodes
    }

    /// Nodes fleet balancing may shut down, oldest power change first.
    pub async fn filter_allowed_to_shut_down(&self, now: DateTime<Local>) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .lock()
            .await
            .values()
            .filter(|n| n.can_shut_down(now))
            .cloned()
            .collect();
        nodes.sort_unstable_by_key(|n| (n.last_time_power_state_changed, n.id));
        nodes
    }
}

fn validate_node(node: &Node) -> Result<()> {
    if node.twin_id == 0 {
        return Err(Error::ConfigInvalid(format!(
            "node {}: twin id is required",
            node.id
        )));
    }
    let total = node.resources.total;
    if total.cru == 0 || total.mru == 0 || total.sru == 0 {
        return Err(Error::ConfigInvalid(format!(
            "node {}: total CRU, MRU and SRU are required",
            node.id
        )));
    }
    Ok(())
}
