//! Builders for the farmerbot integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, TimeDelta};
use farmerbot::{Config, ConsumableResources, Fleet, Node, PowerConfig, PowerState, WakeUpTime};
use farmerbot_client::memory::{MemoryChain, MemoryNodeClient};
use farmerbot_proto::{
    Capacity, Certification, Farm, FarmPublicIp, Gpu, NodeRecord, ZosCapacity, ZosStatistics,
};

pub const FARMER_TWIN: u32 = 50;
pub const FARMER_ADDRESS: &str = "5FarmerAddressForTests";

/// One GiB in bytes.
pub const fn gib(n: u64) -> u64 {
    n * 1024 * 1024 * 1024
}

/// Builder for test nodes.
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    /// A healthy, unused, on node with 4 cores and 8 GiB per storage
    /// dimension. Its twin id is `id + 100`.
    pub fn new(id: u32) -> Self {
        let now = Local::now();
        Self {
            node: Node {
                id,
                twin_id: id + 100,
                resources: ConsumableResources {
                    total: Capacity {
                        cru: 4,
                        mru: gib(8),
                        sru: gib(8),
                        hru: gib(8),
                    },
                    used: Capacity::ZERO,
                    system: Capacity::ZERO,
                },
                public_ips_used: 0,
                pools: Vec::new(),
                gpus: Vec::new(),
                certified: false,
                dedicated: false,
                has_active_rent_contract: false,
                has_active_contracts: false,
                has_public_config: false,
                never_shut_down: false,
                power_state: PowerState::On,
                timeout_claimed_resources: None,
                last_time_power_state_changed: now - TimeDelta::hours(2),
                last_time_awake: now,
                times_random_wake_ups: 0,
            },
        }
    }

    pub fn power_state(mut self, state: PowerState) -> Self {
        self.node.power_state = state;
        self
    }

    pub fn total(mut self, total: Capacity) -> Self {
        self.node.resources.total = total;
        self
    }

    pub fn used(mut self, used: Capacity) -> Self {
        self.node.resources.used = used;
        self
    }

    pub fn dedicated(mut self) -> Self {
        self.node.dedicated = true;
        self
    }

    pub fn certified(mut self) -> Self {
        self.node.certified = true;
        self
    }

    pub fn rent_contract(mut self) -> Self {
        self.node.has_active_rent_contract = true;
        self
    }

    pub fn public_config(mut self) -> Self {
        self.node.has_public_config = true;
        self
    }

    pub fn never_shut_down(mut self) -> Self {
        self.node.never_shut_down = true;
        self
    }

    pub fn public_ips_used(mut self, used: u64) -> Self {
        self.node.public_ips_used = used;
        self
    }

    pub fn gpus(mut self, gpus: Vec<Gpu>) -> Self {
        self.node.gpus = gpus;
        self
    }

    pub fn power_state_changed_ago(mut self, minutes: i64) -> Self {
        self.node.last_time_power_state_changed = Local::now() - TimeDelta::minutes(minutes);
        self
    }

    pub fn last_awake_ago(mut self, hours: i64) -> Self {
        self.node.last_time_awake = Local::now() - TimeDelta::hours(hours);
        self
    }

    pub fn times_random_wake_ups(mut self, times: u32) -> Self {
        self.node.times_random_wake_ups = times;
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

/// A farm owned by [`FARMER_TWIN`] with the given number of public IPs.
pub fn farm(id: u32, public_ips: usize) -> Farm {
    Farm {
        id,
        twin_id: FARMER_TWIN,
        dedicated_farm: false,
        public_ips: (0..public_ips)
            .map(|i| FarmPublicIp {
                ip: format!("185.16.5.{i}/24"),
                gateway: "185.16.5.1".to_owned(),
            })
            .collect(),
    }
}

/// A validated-shape configuration with the defaults filled in.
pub fn config(farm_id: u32) -> Config {
    Config {
        farm_id,
        power: PowerConfig {
            periodic_wake_up_start: Some(WakeUpTime::parse("08:30AM").unwrap()),
            wake_up_threshold: 80,
            periodic_wake_up_limit: 1,
            overprovision_cpu: 2.0,
        },
        ..Default::default()
    }
}

/// Assembles a fleet from pre-built nodes.
pub fn fleet(farm: Farm, config: Config, nodes: Vec<Node>) -> Arc<Fleet> {
    let map: HashMap<u32, Node> = nodes.into_iter().map(|n| (n.id, n)).collect();
    Arc::new(Fleet::new(farm, config, map))
}

/// Seeds the scripted chain with a record for every node so `fetch_node`
/// and friends succeed.
pub fn seed_chain(chain: &MemoryChain, farm: &Farm, nodes: &[Node]) {
    chain.set_farm(farm.clone());
    chain.set_farm_nodes(farm.id, nodes.iter().map(|n| n.id).collect());
    for node in nodes {
        chain.set_node(NodeRecord {
            id: node.id,
            twin_id: node.twin_id,
            resources: node.resources.total,
            public_config: None,
            certification: if node.certified {
                Certification::Certified
            } else {
                Certification::Diy
            },
        });
    }
    chain.set_twin(vec![1; 32], FARMER_TWIN);
}

/// Seeds the scripted node client so every node answers its probes with
/// its current resource usage.
pub fn seed_node_client(client: &MemoryNodeClient, nodes: &[Node]) {
    for node in nodes {
        client.set_statistics(node.twin_id, statistics(node));
    }
}

/// Statistics payload mirroring the node's current fleet state.
pub fn statistics(node: &Node) -> ZosStatistics {
    ZosStatistics {
        total: zos(node.resources.total, 0),
        used: zos(node.resources.used, node.public_ips_used),
        system: zos(node.resources.system, 0),
    }
}

fn zos(capacity: Capacity, ipv4u: u64) -> ZosCapacity {
    ZosCapacity {
        cru: capacity.cru,
        mru: capacity.mru,
        sru: capacity.sru,
        hru: capacity.hru,
        ipv4u,
    }
}

/// The `{cru: 1, mru: 1 GiB, sru: 1 GiB, hru: 1 GiB}` request used by the
/// scheduler scenarios.
pub fn unit_request() -> Capacity {
    Capacity {
        cru: 1,
        mru: gib(1),
        sru: gib(1),
        hru: gib(1),
    }
}
