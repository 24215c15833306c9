//! Websocket implementations of the chain and relay clients.

use std::sync::Arc;

use async_trait::async_trait;
use farmerbot_proto::{Balance, Envelope, Farm, NodeRecord, PowerTarget, Reply};
use jsonrpsee::core::client::{ClientT, Error as RpcError, Subscription, SubscriptionClientT};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde_json::Value;
use tracing::warn;

use crate::chain::{ChainClient, ChainManager};
use crate::error::{ClientError, Result};
use crate::identity::Identity;
use crate::relay::{RelayBus, RelayListener, RelayReplier};

/// Error code the chain uses for missing records.
const CHAIN_NOT_FOUND_CODE: i32 = -32001;

fn map_rpc_error(error: RpcError) -> ClientError {
    match error {
        RpcError::Call(call) if call.code() == CHAIN_NOT_FOUND_CODE => ClientError::NotFound,
        RpcError::RequestTimeout => ClientError::Timeout,
        RpcError::Transport(e) => ClientError::Transport(e.to_string()),
        RpcError::RestartNeeded(e) => ClientError::Transport(e.to_string()),
        other => ClientError::Rpc(other.to_string()),
    }
}

/// Chain client over a jsonrpsee websocket connection.
pub struct WsChain {
    client: Arc<WsClient>,
    identity: Identity,
}

impl WsChain {
    /// Connects to the first reachable endpoint.
    pub async fn connect(urls: &[String], identity: Identity) -> Result<Self> {
        let mut last_error = ClientError::Transport("no chain endpoints configured".to_owned());
        for url in urls {
            match WsClientBuilder::default().build(url).await {
                Ok(client) => {
                    return Ok(Self {
                        client: Arc::new(client),
                        identity,
                    });
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "chain endpoint unreachable");
                    last_error = map_rpc_error(e);
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl ChainClient for WsChain {
    async fn farm(&self, farm_id: u32) -> Result<Farm> {
        self.client
            .request("tfgrid_farm", rpc_params![farm_id])
            .await
            .map_err(map_rpc_error)
    }

    async fn nodes_in_farm(&self, farm_id: u32) -> Result<Vec<u32>> {
        self.client
            .request("tfgrid_nodesInFarm", rpc_params![farm_id])
            .await
            .map_err(map_rpc_error)
    }

    async fn node(&self, node_id: u32) -> Result<NodeRecord> {
        self.client
            .request("tfgrid_node", rpc_params![node_id])
            .await
            .map_err(map_rpc_error)
    }

    async fn dedicated_node_price(&self, node_id: u32) -> Result<u64> {
        self.client
            .request("tfgrid_dedicatedNodePrice", rpc_params![node_id])
            .await
            .map_err(map_rpc_error)
    }

    async fn node_rent_contract(&self, node_id: u32) -> Result<u64> {
        match self
            .client
            .request("tfgrid_nodeRentContract", rpc_params![node_id])
            .await
        {
            Ok(contract) => Ok(contract),
            Err(e) => match map_rpc_error(e) {
                // no rent contract is data, not an outage
                ClientError::NotFound => Ok(0),
                other => Err(other),
            },
        }
    }

    async fn node_contracts(&self, node_id: u32) -> Result<Vec<u64>> {
        self.client
            .request("tfgrid_nodeContracts", rpc_params![node_id])
            .await
            .map_err(map_rpc_error)
    }

    async fn power_target(&self, node_id: u32) -> Result<PowerTarget> {
        self.client
            .request("tfgrid_powerTarget", rpc_params![node_id])
            .await
            .map_err(map_rpc_error)
    }

    async fn set_power_target(&self, node_id: u32, up: bool) -> Result<String> {
        let message = format!("set_power_target:{node_id}:{up}");
        let signature = hex::encode(self.identity.sign(message.as_bytes()));
        let pubkey = hex::encode(self.identity.public_key());
        self.client
            .request(
                "tfgrid_setNodePowerTarget",
                rpc_params![node_id, up, signature, pubkey],
            )
            .await
            .map_err(map_rpc_error)
    }

    async fn balance(&self, address: &str) -> Result<Balance> {
        self.client
            .request("tfgrid_balance", rpc_params![address])
            .await
            .map_err(map_rpc_error)
    }

    async fn twin_by_pubkey(&self, pubkey: &[u8]) -> Result<u32> {
        self.client
            .request("tfgrid_twinByPubkey", rpc_params![hex::encode(pubkey)])
            .await
            .map_err(map_rpc_error)
    }
}

/// Opens a fresh [`WsChain`] per call, cycling through the endpoints.
pub struct WsChainManager {
    urls: Vec<String>,
    identity: Identity,
}

impl WsChainManager {
    #[must_use]
    pub fn new(urls: Vec<String>, identity: Identity) -> Self {
        Self { urls, identity }
    }
}

#[async_trait]
impl ChainManager for WsChainManager {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>> {
        let chain = WsChain::connect(&self.urls, self.identity.clone()).await?;
        Ok(Arc::new(chain))
    }
}

/// Outbound relay handle; also sends replies for inbound requests.
pub struct WsRelayBus {
    client: Arc<WsClient>,
}

#[async_trait]
impl RelayBus for WsRelayBus {
    async fn call(&self, twin: u32, cmd: &str, payload: Value) -> Result<Value> {
        self.client
            .request("relay_call", rpc_params![twin, cmd, payload])
            .await
            .map_err(map_rpc_error)
    }
}

#[async_trait]
impl RelayReplier for WsRelayBus {
    async fn reply(&self, reply: Reply) -> Result<()> {
        self.client
            .request("relay_reply", rpc_params![reply])
            .await
            .map_err(map_rpc_error)
    }
}

/// Inbound requests addressed to our relay session.
pub struct WsRelayListener {
    subscription: Subscription<Envelope>,
}

#[async_trait]
impl RelayListener for WsRelayListener {
    async fn next(&mut self) -> Option<Envelope> {
        loop {
            match self.subscription.next().await? {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable relay envelope");
                }
            }
        }
    }
}

/// Connects to the relay and joins a session.
///
/// The session join is authenticated by signing the session id with the
/// farmer key; the relay fans every request addressed to the session into
/// the returned listener.
pub async fn connect_relay(
    url: &str,
    session: &str,
    identity: &Identity,
) -> Result<(Arc<WsRelayBus>, WsRelayListener)> {
    let client = Arc::new(
        WsClientBuilder::default()
            .build(url)
            .await
            .map_err(map_rpc_error)?,
    );

    let signature = hex::encode(identity.sign(session.as_bytes()));
    let pubkey = hex::encode(identity.public_key());
    let subscription = client
        .subscribe(
            "relay_subscribeSession",
            rpc_params![session, pubkey, signature],
            "relay_unsubscribeSession",
        )
        .await
        .map_err(map_rpc_error)?;

    Ok((
        Arc::new(WsRelayBus { client }),
        WsRelayListener { subscription },
    ))
}
