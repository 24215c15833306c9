//! In-memory fakes for the chain, the node RPCs and the relay.
//!
//! These back the test suites of the decision core; they hold scripted data
//! behind a mutex and record the calls the bot makes so tests can assert on
//! them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use farmerbot_proto::{
    Balance, Envelope, Farm, Gpu, NodeRecord, PowerTarget, Reply, StoragePool, ZosStatistics,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::chain::{ChainClient, ChainManager};
use crate::error::{ClientError, Result};
use crate::relay::{RelayListener, RelayReplier};
use crate::rmb::NodeClient;

/// Scripted chain state.
#[derive(Default)]
pub struct MemoryChain {
    inner: Mutex<ChainState>,
}

#[derive(Default)]
struct ChainState {
    farms: HashMap<u32, Farm>,
    farm_nodes: HashMap<u32, Vec<u32>>,
    nodes: HashMap<u32, NodeRecord>,
    dedicated_prices: HashMap<u32, u64>,
    rent_contracts: HashMap<u32, u64>,
    node_contracts: HashMap<u32, Vec<u64>>,
    power_targets: HashMap<u32, PowerTarget>,
    balances: HashMap<String, Balance>,
    twins: HashMap<Vec<u8>, u32>,
    power_calls: Vec<(u32, bool)>,
    fail_power_target: bool,
}

impl MemoryChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_farm(&self, farm: Farm) {
        self.inner.lock().farms.insert(farm.id, farm);
    }

    pub fn set_farm_nodes(&self, farm_id: u32, nodes: Vec<u32>) {
        self.inner.lock().farm_nodes.insert(farm_id, nodes);
    }

    pub fn set_node(&self, record: NodeRecord) {
        self.inner.lock().nodes.insert(record.id, record);
    }

    pub fn remove_node(&self, node_id: u32) {
        let mut state = self.inner.lock();
        state.nodes.remove(&node_id);
        for nodes in state.farm_nodes.values_mut() {
            nodes.retain(|id| *id != node_id);
        }
    }

    pub fn set_dedicated_price(&self, node_id: u32, price: u64) {
        self.inner.lock().dedicated_prices.insert(node_id, price);
    }

    pub fn set_rent_contract(&self, node_id: u32, contract: u64) {
        self.inner.lock().rent_contracts.insert(node_id, contract);
    }

    pub fn set_node_contracts(&self, node_id: u32, contracts: Vec<u64>) {
        self.inner.lock().node_contracts.insert(node_id, contracts);
    }

    pub fn seed_power_target(&self, node_id: u32, target: PowerTarget) {
        self.inner.lock().power_targets.insert(node_id, target);
    }

    pub fn set_balance(&self, address: impl Into<String>, balance: Balance) {
        self.inner.lock().balances.insert(address.into(), balance);
    }

    pub fn set_twin(&self, pubkey: impl Into<Vec<u8>>, twin: u32) {
        self.inner.lock().twins.insert(pubkey.into(), twin);
    }

    /// Makes every subsequent `set_power_target` call fail.
    pub fn fail_power_target(&self, fail: bool) {
        self.inner.lock().fail_power_target = fail;
    }

    /// The `(node_id, up)` power-target writes attempted so far.
    #[must_use]
    pub fn power_calls(&self) -> Vec<(u32, bool)> {
        self.inner.lock().power_calls.clone()
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn farm(&self, farm_id: u32) -> Result<Farm> {
        self.inner
            .lock()
            .farms
            .get(&farm_id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn nodes_in_farm(&self, farm_id: u32) -> Result<Vec<u32>> {
        Ok(self
            .inner
            .lock()
            .farm_nodes
            .get(&farm_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn node(&self, node_id: u32) -> Result<NodeRecord> {
        self.inner
            .lock()
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn dedicated_node_price(&self, node_id: u32) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .dedicated_prices
            .get(&node_id)
            .copied()
            .unwrap_or(0))
    }

    async fn node_rent_contract(&self, node_id: u32) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .rent_contracts
            .get(&node_id)
            .copied()
            .unwrap_or(0))
    }

    async fn node_contracts(&self, node_id: u32) -> Result<Vec<u64>> {
        Ok(self
            .inner
            .lock()
            .node_contracts
            .get(&node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn power_target(&self, node_id: u32) -> Result<PowerTarget> {
        Ok(self
            .inner
            .lock()
            .power_targets
            .get(&node_id)
            .copied()
            .unwrap_or_default())
    }

    async fn set_power_target(&self, node_id: u32, up: bool) -> Result<String> {
        let mut state = self.inner.lock();
        state.power_calls.push((node_id, up));
        if state.fail_power_target {
            return Err(ClientError::Rpc("scripted chain failure".to_owned()));
        }
        let entry = state.power_targets.entry(node_id).or_default();
        entry.target = if up {
            farmerbot_proto::Power::Up
        } else {
            farmerbot_proto::Power::Down
        };
        Ok(format!("0xmem{node_id}"))
    }

    async fn balance(&self, address: &str) -> Result<Balance> {
        Ok(self
            .inner
            .lock()
            .balances
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn twin_by_pubkey(&self, pubkey: &[u8]) -> Result<u32> {
        self.inner
            .lock()
            .twins
            .get(pubkey)
            .copied()
            .ok_or(ClientError::NotFound)
    }
}

/// [`ChainManager`] that always hands out the same scripted chain.
pub struct MemoryChainManager {
    chain: Arc<MemoryChain>,
}

impl MemoryChainManager {
    #[must_use]
    pub fn new(chain: Arc<MemoryChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl ChainManager for MemoryChainManager {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>> {
        Ok(self.chain.clone())
    }
}

/// Scripted node RPC responses keyed by twin id.
#[derive(Default)]
pub struct MemoryNodeClient {
    inner: Mutex<HashMap<u32, NodeSim>>,
}

struct NodeSim {
    reachable: bool,
    statistics: ZosStatistics,
    pools: Vec<StoragePool>,
    gpus: Vec<Gpu>,
    version_probes: u32,
    statistics_probes: u32,
}

impl Default for NodeSim {
    fn default() -> Self {
        Self {
            reachable: true,
            statistics: ZosStatistics::default(),
            pools: Vec::new(),
            gpus: Vec::new(),
            version_probes: 0,
            statistics_probes: 0,
        }
    }
}

impl MemoryNodeClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_statistics(&self, twin: u32, statistics: ZosStatistics) {
        self.inner.lock().entry(twin).or_default().statistics = statistics;
    }

    pub fn set_pools(&self, twin: u32, pools: Vec<StoragePool>) {
        self.inner.lock().entry(twin).or_default().pools = pools;
    }

    pub fn set_gpus(&self, twin: u32, gpus: Vec<Gpu>) {
        self.inner.lock().entry(twin).or_default().gpus = gpus;
    }

    /// Marks the twin (un)reachable; every call fails while unreachable.
    pub fn set_reachable(&self, twin: u32, reachable: bool) {
        self.inner.lock().entry(twin).or_default().reachable = reachable;
    }

    /// Number of liveness probes issued against the twin.
    #[must_use]
    pub fn version_probes(&self, twin: u32) -> u32 {
        self.inner
            .lock()
            .get(&twin)
            .map_or(0, |sim| sim.version_probes)
    }

    /// Number of statistics fetches issued against the twin.
    #[must_use]
    pub fn statistics_probes(&self, twin: u32) -> u32 {
        self.inner
            .lock()
            .get(&twin)
            .map_or(0, |sim| sim.statistics_probes)
    }
}

#[async_trait]
impl NodeClient for MemoryNodeClient {
    async fn system_version(&self, twin: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let sim = inner.entry(twin).or_default();
        sim.version_probes += 1;
        if sim.reachable {
            Ok(())
        } else {
            Err(ClientError::Timeout)
        }
    }

    async fn statistics(&self, twin: u32) -> Result<ZosStatistics> {
        let mut inner = self.inner.lock();
        let sim = inner.entry(twin).or_default();
        sim.statistics_probes += 1;
        if sim.reachable {
            Ok(sim.statistics)
        } else {
            Err(ClientError::Timeout)
        }
    }

    async fn storage_pools(&self, twin: u32) -> Result<Vec<StoragePool>> {
        let inner = self.inner.lock();
        match inner.get(&twin) {
            Some(sim) if sim.reachable => Ok(sim.pools.clone()),
            _ => Err(ClientError::Timeout),
        }
    }

    async fn gpus(&self, twin: u32) -> Result<Vec<Gpu>> {
        let inner = self.inner.lock();
        match inner.get(&twin) {
            Some(sim) if sim.reachable => Ok(sim.gpus.clone()),
            _ => Err(ClientError::Timeout),
        }
    }
}

/// Test-side handle to a loopback relay.
pub struct MemoryRelayHandle {
    requests: mpsc::UnboundedSender<Envelope>,
    replies: mpsc::UnboundedReceiver<Reply>,
}

impl MemoryRelayHandle {
    /// Injects an inbound request as if it arrived from the relay.
    pub fn push(&self, envelope: Envelope) {
        let _ = self.requests.send(envelope);
    }

    /// Awaits the next reply the bot produced.
    pub async fn next_reply(&mut self) -> Option<Reply> {
        self.replies.recv().await
    }
}

/// Listener half handed to the bot's serve loop.
pub struct MemoryRelayListener {
    requests: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
impl RelayListener for MemoryRelayListener {
    async fn next(&mut self) -> Option<Envelope> {
        self.requests.recv().await
    }
}

/// Replier half handed to the bot's serve loop.
pub struct MemoryRelayReplier {
    replies: mpsc::UnboundedSender<Reply>,
}

#[async_trait]
impl RelayReplier for MemoryRelayReplier {
    async fn reply(&self, reply: Reply) -> Result<()> {
        self.replies
            .send(reply)
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}

/// Builds a loopback relay: a test handle plus the listener/replier pair the
/// bot serves on.
#[must_use]
pub fn memory_relay() -> (MemoryRelayHandle, MemoryRelayListener, Arc<MemoryRelayReplier>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    (
        MemoryRelayHandle {
            requests: request_tx,
            replies: reply_rx,
        },
        MemoryRelayListener {
            requests: request_rx,
        },
        Arc::new(MemoryRelayReplier { replies: reply_tx }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmerbot_proto::Power;

    #[tokio::test]
    async fn chain_records_power_calls() {
        let chain = MemoryChain::new();
        chain.seed_power_target(3, PowerTarget::default());

        chain
            .set_power_target(3, false)
            .await
            .expect("scripted call succeeds");

        assert_eq!(chain.power_calls(), vec![(3, false)]);
        let target = chain.power_target(3).await.unwrap();
        assert!(matches!(target.target, Power::Down));
    }

    #[tokio::test]
    async fn scripted_power_failure_keeps_target() {
        let chain = MemoryChain::new();
        chain.fail_power_target(true);

        let err = chain.set_power_target(9, true).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc(_)));
        // the attempt is still recorded
        assert_eq!(chain.power_calls(), vec![(9, true)]);
    }

    #[tokio::test]
    async fn unreachable_node_fails_every_call() {
        let client = MemoryNodeClient::new();
        client.set_reachable(5, false);

        assert!(client.system_version(5).await.is_err());
        assert!(client.statistics(5).await.is_err());
        assert_eq!(client.version_probes(5), 1);
        assert_eq!(client.statistics_probes(5), 1);
    }

    #[tokio::test]
    async fn relay_loopback_roundtrip() {
        let (mut handle, mut listener, replier) = memory_relay();

        handle.push(Envelope {
            reference: "r1".to_owned(),
            source_twin: 1,
            session: "farmerbot-1".to_owned(),
            cmd: "farmerbot.farmmanager.version".to_owned(),
            payload: serde_json::Value::Null,
        });

        let envelope = listener.next().await.unwrap();
        replier
            .reply(Reply::ok(&envelope, serde_json::json!("0.1.0")))
            .await
            .unwrap();

        let reply = handle.next_reply().await.unwrap();
        assert_eq!(reply.reference, "r1");
    }
}
