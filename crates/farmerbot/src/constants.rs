//! Timeouts, thresholds and defaults of the decision core.

use std::time::Duration;

use chrono::TimeDelta;

/// Period of the reconciliation loop.
pub const TIMEOUT_UPDATE: Duration = Duration::from_secs(5 * 60);

/// Default number of nodes woken per reconciliation tick for wake-up reasons.
pub const DEFAULT_PERIODIC_WAKE_UP_LIMIT: u8 = 1;

/// Default CPU over-provision factor.
pub const DEFAULT_CPU_PROVISION: f64 = 2.0;

/// Default fleet utilisation threshold that triggers waking a node.
pub const DEFAULT_WAKE_UP_THRESHOLD: u8 = 80;

/// Lowest accepted wake-up threshold; smaller values are coerced up.
pub const MIN_WAKE_UP_THRESHOLD: u8 = 50;

/// Highest accepted wake-up threshold; larger values are coerced down.
pub const MAX_WAKE_UP_THRESHOLD: u8 = 80;

/// Random wake-up budget per node per calendar month.
pub const DEFAULT_RANDOM_WAKE_UPS_A_MONTH: u32 = 10;

/// Minimum farmer balance required to run the bot at all.
pub const MIN_BALANCE_TO_RUN_TFT: f64 = 100.0;

/// Balance below which the bot warns at startup.
pub const RECOMMENDED_BALANCE_TFT: f64 = 500.0;

/// Minimum farmer balance required for a single power operation.
pub const MIN_BALANCE_PER_OP_TFT: f64 = 0.002;

/// How long a node may stay in `WakingUp`/`ShuttingDown` before the
/// transition is declared failed. Doubles as the claimed-resources timeout.
#[must_use]
pub fn timeout_power_state_change() -> TimeDelta {
    TimeDelta::minutes(30)
}

/// How long a node is left alone after a power state change.
#[must_use]
pub fn periodic_wake_up_duration() -> TimeDelta {
    TimeDelta::minutes(30)
}
