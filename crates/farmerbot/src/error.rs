//! Error types of the decision core.

use farmerbot_client::ClientError;
use thiserror::Error;

/// Errors surfaced by the decision core.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration is unusable; aborts startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The farmer account cannot cover the operation.
    #[error("balance of {available} TFT is below the required {required} TFT")]
    BalanceTooLow { available: f64, required: f64 },

    /// A chain call failed for a reason other than "not found".
    #[error("chain unavailable: {0}")]
    ChainUnavailable(#[from] ClientError),

    /// A node RPC failed this tick. Logged per node, never sent to callers.
    #[error("node {node_id} did not respond")]
    NodeUnreachable { node_id: u32 },

    /// The scheduler found no candidate for the filter.
    #[error("could not find a suitable node with the given options")]
    NoSuitableNode,

    /// A node was selected but the wake-up failed; the reservation was
    /// rolled back.
    #[error("reservation on node {node_id} failed and was rolled back")]
    ReservationConflict { node_id: u32 },

    /// A power action hit one of the named guard conditions.
    #[error("cannot change power of node {node_id}: {guard}")]
    PowerActionBlocked { node_id: u32, guard: PowerGuard },

    /// The caller's twin is not the farm owner.
    #[error(
        "twin {twin_id} is not authorized for this action, \
         only the farm owner with twin {farmer_twin_id} is"
    )]
    Unauthorized { twin_id: u32, farmer_twin_id: u32 },

    /// The node id is not managed by the bot.
    #[error("node {0} is not managed")]
    NodeNotFound(u32),
}

/// Result type for decision-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Guard conditions that block a power action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerGuard {
    NeverShutDown,
    PublicConfig,
    HasClaimedResources,
    ActiveRentContract,
    ActiveContracts,
    InUse,
    InWakeUpWindow,
    WouldLeaveFarmIdle,
}

impl std::fmt::Display for PowerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::NeverShutDown => "node is configured to never be shut down",
            Self::PublicConfig => "node has a public config",
            Self::HasClaimedResources => "node has claimed resources",
            Self::ActiveRentContract => "node has an active rent contract",
            Self::ActiveContracts => "node has active contracts",
            Self::InUse => "node is in use",
            Self::InWakeUpWindow => "node is still inside its wake-up window",
            Self::WouldLeaveFarmIdle => "at least one node must stay on in the farm",
        };
        f.write_str(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_messages_name_the_condition() {
        let err = Error::PowerActionBlocked {
            node_id: 3,
            guard: PowerGuard::NeverShutDown,
        };
        let text = err.to_string();
        assert!(text.contains("node 3"));
        assert!(text.contains("never be shut down"));
    }

    #[test]
    fn unauthorized_names_both_twins() {
        let err = Error::Unauthorized {
            twin_id: 9,
            farmer_twin_id: 2,
        };
        let text = err.to_string();
        assert!(text.contains('9'));
        assert!(text.contains('2'));
    }
}
