//! The per-node model and its capacity arithmetic.

use chrono::{DateTime, Local};
use farmerbot_proto::{Capacity, Gpu, PowerTarget, StoragePool, ZosStatistics};
use tracing::warn;

use crate::constants::periodic_wake_up_duration;

/// Power state of a managed node.
///
/// The variant order doubles as the scheduler's preference order: an `On`
/// node beats one that must be woken, which beats one shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PowerState {
    On,
    WakingUp,
    Off,
    ShuttingDown,
}

/// Total, used and system-reserved capacity of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumableResources {
    pub total: Capacity,
    pub used: Capacity,
    pub system: Capacity,
}

/// A node under bot management.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: u32,
    /// RPC address of the node on the relay.
    pub twin_id: u32,
    pub resources: ConsumableResources,
    pub public_ips_used: u64,
    pub pools: Vec<StoragePool>,
    pub gpus: Vec<Gpu>,
    pub certified: bool,
    /// Rented whole per policy: dedicated farm or a non-zero dedicated price.
    pub dedicated: bool,
    pub has_active_rent_contract: bool,
    pub has_active_contracts: bool,
    pub has_public_config: bool,
    pub never_shut_down: bool,
    pub power_state: PowerState,
    /// Claimed resources are protected from updater overwrites until here.
    pub timeout_claimed_resources: Option<DateTime<Local>>,
    pub last_time_power_state_changed: DateTime<Local>,
    pub last_time_awake: DateTime<Local>,
    pub times_random_wake_ups: u32,
}

impl Node {
    /// Free capacity under the given CPU over-provision factor.
    ///
    /// Over-provisioning applies to CRU only; the other dimensions are
    /// physical.
    #[must_use]
    pub fn free_capacity(&self, over_provision_cpu: f64) -> Capacity {
        let mut total = self.resources.total;
        total.cru = (total.cru as f64 * over_provision_cpu).ceil() as u64;
        total.subtract(self.resources.used)
    }

    /// Whether the node can take the requested capacity. Claims are never
    /// partial.
    #[must_use]
    pub fn can_claim(&self, request: &Capacity, over_provision_cpu: f64) -> bool {
        self.resources.total.cru >= request.cru
            && self.free_capacity(over_provision_cpu).can_contain(request)
    }

    /// Adds the requested capacity to the node's used resources.
    pub fn claim(&mut self, request: Capacity) {
        self.resources.used.add(request);
    }

    /// A node is unused when nothing beyond the system reservation runs on
    /// it and it is not rented.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.resources.used.subtract(self.resources.system).is_empty()
            && !self.has_active_rent_contract
    }

    /// Whether the claimed-resources protection is still in effect.
    #[must_use]
    pub fn has_claimed_resources(&self, now: DateTime<Local>) -> bool {
        self.timeout_claimed_resources.is_some_and(|t| t > now)
    }

    /// Whether fleet balancing may shut this node down.
    ///
    /// A node that just changed power state is left alone for
    /// `periodic_wake_up_duration` so it is not flapped.
    #[must_use]
    pub fn can_shut_down(&self, now: DateTime<Local>) -> bool {
        self.power_state == PowerState::On
            && self.is_unused()
            && !self.has_public_config
            && !self.never_shut_down
            && !self.has_active_rent_contract
            && !self.has_active_contracts
            && !self.has_claimed_resources(now)
            && now.signed_duration_since(self.last_time_power_state_changed)
                >= periodic_wake_up_duration()
    }

    /// Refreshes resources and public IP usage from node statistics.
    pub fn update_resources(&mut self, statistics: &ZosStatistics) {
        self.resources.total = statistics.total.into();
        self.resources.used = statistics.used.into();
        self.resources.system = statistics.system.into();
        self.public_ips_used = statistics.used.ipv4u;
    }

    /// Moves the node into a new power state, stamping the change time.
    pub fn set_power_state(&mut self, state: PowerState, now: DateTime<Local>) {
        if self.power_state != state {
            self.power_state = state;
            self.last_time_power_state_changed = now;
        }
    }

    /// Aligns the local power state with the chain-recorded target.
    ///
    /// The chain is authoritative when it disagrees: a target of `up` over
    /// an observed `down` means somebody asked the node to wake, and so on
    /// for the other combinations.
    pub fn adopt_power_target(&mut self, target: &PowerTarget, now: DateTime<Local>) {
        let adopted = match (target.state.is_up(), target.target.is_up()) {
            (false, true) => PowerState::WakingUp,
            (true, true) => PowerState::On,
            (true, false) => PowerState::ShuttingDown,
            (false, false) => PowerState::Off,
        };
        if self.power_state != adopted {
            warn!(
                node_id = self.id,
                state = ?adopted,
                "chain power target disagrees with the local state, adopting"
            );
            if adopted == PowerState::On {
                self.last_time_awake = now;
            }
            self.set_power_state(adopted, now);
        }
    }
}
