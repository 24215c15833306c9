//! Clients for the farmerbot's external collaborators.
//!
//! The decision core never talks to the outside world directly; it goes
//! through the traits defined here:
//!
//! - [`ChainClient`] / [`ChainManager`]: the chain as a remote contract
//!   store, reconnected once per reconciliation tick
//! - [`RelayBus`] / [`RelayListener`]: the relay-mediated request bus that
//!   multiplexes RPC by twin id
//! - [`NodeClient`]: the zos node RPCs, wrapped with a per-call deadline
//!
//! Concrete websocket implementations live in [`ws`]; in-memory fakes for
//! tests live in [`memory`]. The farmer's sr25519 [`Identity`] signs chain
//! power-target writes and authenticates the relay session.

mod chain;
mod error;
mod identity;
pub mod memory;
mod network;
mod relay;
mod rmb;
pub mod ws;

pub use chain::{ChainClient, ChainManager};
pub use error::{ClientError, Result};
pub use identity::{Identity, IdentityError};
pub use network::Network;
pub use relay::{RelayBus, RelayListener, RelayReplier};
pub use rmb::{NodeClient, RelayNodeClient, TIMEOUT_RMB_RESPONSE};
