//! The periodic fleet reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, Timelike};
use farmerbot_client::{ChainClient, ChainManager, NodeClient};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::constants::{DEFAULT_RANDOM_WAKE_UPS_A_MONTH, TIMEOUT_UPDATE};
use crate::error::Result;
use crate::fleet::Fleet;
use crate::node::{Node, PowerState};
use crate::power::PowerController;
use crate::updater::{self, Updater};

/// Why a node is being woken outside of tenant demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeReason {
    /// The daily wake-up window has started and the node slept through it.
    Periodic,
    /// The random liveness lottery picked the node.
    Random,
}

/// Drives data updating, wake-ups and balancing on a fixed tick.
pub struct Reconciler {
    fleet: Arc<Fleet>,
    updater: Updater,
    power: PowerController,
    chain_manager: Arc<dyn ChainManager>,
    node_client: Arc<dyn NodeClient>,
    rng: Mutex<SmallRng>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        fleet: Arc<Fleet>,
        updater: Updater,
        power: PowerController,
        chain_manager: Arc<dyn ChainManager>,
        node_client: Arc<dyn NodeClient>,
    ) -> Self {
        Self {
            fleet,
            updater,
            power,
            chain_manager,
            node_client,
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Runs reconciliation until the token is cancelled.
    ///
    /// A fresh chain connection is opened every tick; failures are logged
    /// and retried on the next one. An overrunning iteration makes the next
    /// tick fire immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(TIMEOUT_UPDATE);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        info!("reconciliation loop running");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("reconciliation loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let chain = match self.chain_manager.connect().await {
                Ok(chain) => chain,
                Err(e) => {
                    error!(error = %e, "failed to open chain connection");
                    continue;
                }
            };

            if let Err(e) = self.tick(chain.as_ref(), Local::now()).await {
                error!(error = %e, "reconciliation tick failed");
            }
        }
    }

    /// One reconciliation iteration.
    pub async fn tick(&self, chain: &dyn ChainClient, now: DateTime<Local>) -> Result<()> {
        debug!("fetching farm membership");
        let farm_nodes = chain.nodes_in_farm(self.fleet.farm.id).await?;

        for node_id in self.fleet.node_ids().await {
            if !farm_nodes.contains(&node_id) {
                info!(node_id, "node left the farm, dropping it");
                self.fleet.delete_node(node_id).await;
            }
        }

        for node_id in self.fleet.config.managed_nodes(&farm_nodes) {
            if self.fleet.node(node_id).await.is_none() {
                match updater::fetch_node(
                    chain,
                    self.node_client.as_ref(),
                    &self.fleet.config,
                    node_id,
                    false,
                    self.fleet.farm.dedicated_farm,
                    PowerState::On,
                    now,
                )
                .await
                {
                    Ok(node) => {
                        debug!(node_id, "node added");
                        self.fleet.add_node(node).await;
                    }
                    Err(e) => error!(node_id, error = %e, "failed to add node"),
                }
            }
        }

        self.updater.update_all(chain, now).await;

        if is_first_tick_of_month(now) {
            debug!("first tick of the month, resetting random wake-up counters");
            let mut nodes = self.fleet.guard().await;
            for node in nodes.values_mut() {
                node.times_random_wake_ups = 0;
            }
        }

        self.wake_up_round(chain, now).await;

        self.power.balance(chain, now).await
    }

    /// Forced, periodic and random wake-ups for one tick.
    async fn wake_up_round(&self, chain: &dyn ChainClient, now: DateTime<Local>) {
        let snapshot = self.fleet.snapshot().await;
        let managed = snapshot.len();
        let limit = self.fleet.config.power.periodic_wake_up_limit;
        let mut wake_up_calls: u8 = 0;

        for node in &snapshot {
            if node.power_state != PowerState::Off {
                continue;
            }

            // nodes that must be up are woken outside the per-tick budget
            if node.never_shut_down || node.has_active_rent_contract {
                debug!(node_id = node.id, "waking node that must stay up");
                if let Err(e) = self.power.power_on(chain, node.id).await {
                    error!(node_id = node.id, error = %e, "failed to power on node");
                }
                continue;
            }

            if wake_up_calls >= limit {
                continue;
            }
            let Some(reason) = self.should_wake_up(node, now, managed) else {
                continue;
            };

            match self.power.power_on(chain, node.id).await {
                Ok(()) => {
                    wake_up_calls += 1;
                    if reason == WakeReason::Random {
                        let mut nodes = self.fleet.guard().await;
                        if let Some(woken) = nodes.get_mut(&node.id) {
                            woken.times_random_wake_ups += 1;
                        }
                    }
                }
                Err(e) => error!(node_id = node.id, error = %e, "failed to power on node"),
            }
        }
    }

    fn should_wake_up(
        &self,
        node: &Node,
        now: DateTime<Local>,
        managed_nodes: usize,
    ) -> Option<WakeReason> {
        let start = self.fleet.config.power.periodic_wake_up_today(now);
        if start < now && node.last_time_awake < start {
            info!(node_id = node.id, "periodic wake-up");
            return Some(WakeReason::Periodic);
        }

        if node.times_random_wake_ups < DEFAULT_RANDOM_WAKE_UPS_A_MONTH {
            let window = random_wake_up_window(
                managed_nodes,
                self.fleet.config.power.periodic_wake_up_limit,
                TIMEOUT_UPDATE,
            );
            if self.rng.lock().gen_range(0..window) == 0 {
                info!(node_id = node.id, "random wake-up");
                return Some(WakeReason::Random);
            }
        }

        None
    }
}

/// True on the tick that opens a calendar month (day 1, during the 1 o'clock
/// tick window).
fn is_first_tick_of_month(now: DateTime<Local>) -> bool {
    now.day() == 1 && now.hour() == 1 && u64::from(now.minute()) < TIMEOUT_UPDATE.as_secs() / 60
}

/// Size of the uniform draw used for random wake-ups.
///
/// Derived from the tick cadence rather than a hard-coded ticks-per-day so
/// a different `tick` keeps the expected wake-ups per month at the budget:
/// a node that is always off is picked with probability `1/window` on each
/// of the ~`30 * ticks_per_day` monthly draws, minus the ticks already
/// covered by the daily periodic window and by other nodes' wake-ups.
pub fn random_wake_up_window(
    managed_nodes: usize,
    periodic_wake_up_limit: u8,
    tick: Duration,
) -> u64 {
    let ticks_per_day = (86_400 / tick.as_secs().max(1)).max(1);
    let wake_window_ticks =
        crate::constants::periodic_wake_up_duration().num_seconds() as u64 / tick.as_secs().max(1);
    let month_ticks = 30 * ticks_per_day.saturating_sub(wake_window_ticks);

    let budget = u64::from(DEFAULT_RANDOM_WAKE_UPS_A_MONTH);
    let nodes = managed_nodes.max(1) as u64;
    let congestion = budget * (nodes - 1) / u64::from(periodic_wake_up_limit.max(1)).min(nodes);

    (month_ticks
        .saturating_sub(budget * wake_window_ticks)
        .saturating_sub(congestion)
        / budget)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn random_window_matches_the_reference_values() {
        let tick = Duration::from_secs(300);
        // 288 ticks/day, 6 of them inside the periodic window:
        // (30 * 282 - 10 * 6 - 10 * (n - 1) / min(limit, n)) / 10
        assert_eq!(random_wake_up_window(1, 1, tick), 840);
        assert_eq!(random_wake_up_window(5, 1, tick), 836);
        assert_eq!(random_wake_up_window(5, 2, tick), 838);
    }

    #[test]
    fn random_window_scales_with_cadence() {
        let fast = random_wake_up_window(1, 1, Duration::from_secs(60));
        let slow = random_wake_up_window(1, 1, Duration::from_secs(600));
        assert!(fast > slow);
        assert!(random_wake_up_window(1, 1, Duration::from_secs(86_400)) >= 1);
    }

    #[test]
    fn first_tick_of_month_detection() {
        let first = Local.with_ymd_and_hms(2024, 3, 1, 1, 2, 0).unwrap();
        assert!(is_first_tick_of_month(first));

        let later_that_hour = Local.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        assert!(!is_first_tick_of_month(later_that_hour));

        let second_day = Local.with_ymd_and_hms(2024, 3, 2, 1, 2, 0).unwrap();
        assert!(!is_first_tick_of_month(second_day));

        let midnight = Local.with_ymd_and_hms(2024, 3, 1, 0, 2, 0).unwrap();
        assert!(!is_first_tick_of_month(midnight));
    }
}
