//! Node selection for tenant requests.

use std::sync::Arc;

use chrono::Local;
use farmerbot_client::ChainClient;
use farmerbot_proto::{Capacity, Gpu, NodeFilter};
use tracing::{debug, error, info};

use crate::constants::timeout_power_state_change;
use crate::error::{Error, Result};
use crate::fleet::Fleet;
use crate::node::{Node, PowerState};
use crate::power::PowerController;

/// Chooses and reserves the best node for a tenant request.
#[derive(Clone)]
pub struct Scheduler {
    fleet: Arc<Fleet>,
}

impl Scheduler {
    #[must_use]
    pub fn new(fleet: Arc<Fleet>) -> Self {
        Self { fleet }
    }

    /// Finds a node matching the filter, reserves its capacity and wakes it
    /// when necessary. Returns the node id.
    ///
    /// The whole filter → select → reserve sequence runs under the fleet
    /// mutex so the reservation is atomic; a failed wake-up rolls the
    /// reservation back before the error is returned.
    pub async fn find_node(&self, chain: &dyn ChainClient, filter: &NodeFilter) -> Result<u32> {
        info!("finding a node");
        debug!(?filter, "requested filter options");

        let now = Local::now();
        let request = filter.capacity();
        let num_gpu = filter.effective_gpu_count();
        let over_provision_cpu = self.fleet.config.power.overprovision_cpu;

        let mut nodes = self.fleet.guard().await;

        if filter.public_ips > 0 {
            let used: u64 = nodes.values().map(|n| n.public_ips_used).sum();
            if used + filter.public_ips > self.fleet.farm.public_ips.len() as u64 {
                error!(
                    farm_id = self.fleet.farm.id,
                    "not enough public ips available"
                );
                return Err(Error::NoSuitableNode);
            }
        }

        let mut candidates: Vec<&Node> = nodes
            .values()
            .filter(|node| {
                self.matches(node, filter, &request, num_gpu, over_provision_cpu)
            })
            .collect();
        if candidates.is_empty() {
            return Err(Error::NoSuitableNode);
        }

        // prefer nodes that are already on, then configured priority, then
        // the stable id order
        let priority = &self.fleet.config.priority_nodes;
        candidates.sort_by_key(|node| {
            (
                node.power_state,
                !priority.contains(&node.id),
                node.id,
            )
        });
        let node_id = candidates[0].id;
        debug!(node_id, "found a node");

        let Some(node) = nodes.get_mut(&node_id) else {
            return Err(Error::NodeNotFound(node_id));
        };
        let rollback = node.clone();

        // claim until the next data update would overwrite it
        node.timeout_claimed_resources = Some(now + timeout_power_state_change());
        if filter.dedicated || num_gpu > 0 {
            let whole = node.resources.total;
            node.claim(whole);
        } else {
            node.claim(request);
        }
        node.public_ips_used += filter.public_ips;

        if matches!(
            node.power_state,
            PowerState::Off | PowerState::ShuttingDown
        ) {
            if let Err(e) = PowerController::power_on_locked(&mut nodes, chain, node_id, now).await
            {
                error!(node_id, error = %e, "failed to wake the selected node");
                nodes.insert(node_id, rollback);
                return Err(Error::ReservationConflict { node_id });
            }
        }

        Ok(node_id)
    }

    fn matches(
        &self,
        node: &Node,
        filter: &NodeFilter,
        request: &Capacity,
        num_gpu: u8,
        over_provision_cpu: f64,
    ) -> bool {
        if num_gpu > 0 {
            let matching =
                count_matching_gpus(&node.gpus, &filter.gpu_vendors, &filter.gpu_devices);
            if matching < usize::from(num_gpu) {
                return false;
            }
        }

        if filter.certified && !node.certified {
            return false;
        }
        if filter.public_config && !node.has_public_config {
            return false;
        }
        if node.has_active_rent_contract {
            return false;
        }

        if filter.dedicated {
            if !node.dedicated || !node.is_unused() {
                return false;
            }
        } else if node.dedicated && *request != node.resources.total {
            // a dedicated node can only be rented whole
            return false;
        }

        if filter.nodes_excluded.contains(&node.id) {
            return false;
        }

        node.can_claim(request, over_provision_cpu)
    }
}

fn count_matching_gpus(gpus: &[Gpu], vendors: &[String], devices: &[String]) -> usize {
    gpus.iter()
        .filter(|gpu| vendors.is_empty() || vendors.iter().any(|v| *v == gpu.vendor))
        .filter(|gpu| devices.is_empty() || devices.iter().any(|d| *d == gpu.device))
        .count()
}
