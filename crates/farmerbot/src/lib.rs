//! Farmerbot - autonomous power management for a farm of grid nodes.
//!
//! The bot keeps per-node state current, decides which nodes are awake,
//! which are asleep and which single node should serve an incoming tenant
//! request:
//!
//! - **Fleet state**: one mutex-guarded map of managed nodes ([`Fleet`])
//! - **Data updater**: periodic probing of every node plus the power-state
//!   machine ([`Updater`])
//! - **Power controller**: guarded power transitions and fleet balancing
//!   ([`PowerController`])
//! - **Scheduler**: atomic `findnode` reservation ([`Scheduler`])
//! - **Reconciliation loop**: membership, wake-ups and balancing on a
//!   5-minute tick ([`Reconciler`])
//! - **RPC surface**: relay handlers under `farmerbot.*` ([`Router`])

pub mod bot;
pub mod config;
pub mod constants;
pub mod error;
pub mod find_node;
pub mod fleet;
pub mod node;
pub mod power;
pub mod reconciler;
pub mod rpc;
pub mod updater;

pub use bot::FarmerBot;
pub use config::{Config, PowerConfig, WakeUpTime};
pub use error::{Error, PowerGuard, Result};
pub use find_node::Scheduler;
pub use fleet::Fleet;
pub use node::{ConsumableResources, Node, PowerState};
pub use power::PowerController;
pub use reconciler::{random_wake_up_window, Reconciler};
pub use rpc::Router;
pub use updater::{next_power_state, Updater};

/// Build version reported by `farmerbot.farmmanager.version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
