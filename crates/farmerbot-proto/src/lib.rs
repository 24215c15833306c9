//! Wire and data types shared by the farmerbot components.
//!
//! This crate defines the vocabulary the bot speaks on all of its edges:
//!
//! - Resource [`Capacity`] vectors and the arithmetic used for claims
//! - The [`NodeFilter`] tenants send to `farmerbot.nodemanager.findnode`
//! - Payloads returned by the zos node RPCs (statistics, pools, GPUs)
//! - Records read from the chain (farm, node, power target, balance)
//! - The relay [`Envelope`]/[`Reply`] pair multiplexed by twin id
//!
//! All RPC-facing types serialise as JSON with the field names of the
//! original wire contract.

mod capacity;
mod chain;
mod filter;
mod relay;
mod zos;

pub use capacity::{gib_to_bytes, Capacity, GIB};
pub use chain::{
    tft_to_units, Balance, Certification, Farm, FarmPublicIp, NodeRecord, Power, PowerTarget,
    PublicConfig, TFT_UNITS,
};
pub use filter::NodeFilter;
pub use relay::{Envelope, Reply};
pub use zos::{Gpu, StoragePool, ZosCapacity, ZosStatistics};
