//! The chain as seen by the farmerbot.

use std::sync::Arc;

use async_trait::async_trait;
use farmerbot_proto::{Balance, Farm, NodeRecord, PowerTarget};

use crate::error::Result;

/// Operations the farmerbot consumes from the chain.
///
/// Implementations own the farmer identity; `set_power_target` is signed
/// with it, making the farmer the only authorized signer.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetches a farm by id.
    async fn farm(&self, farm_id: u32) -> Result<Farm>;

    /// Ids of every node registered to the farm.
    async fn nodes_in_farm(&self, farm_id: u32) -> Result<Vec<u32>>;

    /// Fetches a node record by id.
    async fn node(&self, node_id: u32) -> Result<NodeRecord>;

    /// Price set for renting the node whole, zero when not dedicated.
    async fn dedicated_node_price(&self, node_id: u32) -> Result<u64>;

    /// Id of the active rent contract on the node, zero when none.
    async fn node_rent_contract(&self, node_id: u32) -> Result<u64>;

    /// Ids of every active contract deployed on the node.
    async fn node_contracts(&self, node_id: u32) -> Result<Vec<u64>>;

    /// Reads the chain-recorded power state and target of a node.
    async fn power_target(&self, node_id: u32) -> Result<PowerTarget>;

    /// Asks the chain to change a node's power target. Returns the tx hash.
    async fn set_power_target(&self, node_id: u32, up: bool) -> Result<String>;

    /// Free balance of an account address.
    async fn balance(&self, address: &str) -> Result<Balance>;

    /// Twin id registered for a public key.
    async fn twin_by_pubkey(&self, pubkey: &[u8]) -> Result<u32>;
}

/// Factory for chain connections.
///
/// The reconciliation loop opens a fresh handle every tick and drops it at
/// the end, so a broken connection heals on the next iteration.
#[async_trait]
pub trait ChainManager: Send + Sync {
    /// Opens (or reuses) a chain connection.
    async fn connect(&self) -> Result<Arc<dyn ChainClient>>;
}
