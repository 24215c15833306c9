//! The RPC surface the farmer and tenants talk to.
//!
//! Handlers are registered under `farmerbot.{farmmanager,nodemanager,
//! powermanager}` routing keys on the relay session `farmerbot-{farm_id}`.
//! Power-manager calls are restricted to the farm owner twin.

use std::sync::Arc;

use chrono::Local;
use farmerbot_client::{
    ChainClient, ChainManager, ClientError, NodeClient, RelayListener, RelayReplier,
};
use farmerbot_proto::{tft_to_units, Envelope, NodeFilter, Reply, TFT_UNITS};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::constants::MIN_BALANCE_PER_OP_TFT;
use crate::error::{Error, Result};
use crate::find_node::Scheduler;
use crate::fleet::Fleet;
use crate::node::PowerState;
use crate::power::PowerController;
use crate::updater;

const CMD_VERSION: &str = "farmerbot.farmmanager.version";
const CMD_FIND_NODE: &str = "farmerbot.nodemanager.findnode";
const CMD_INCLUDE_NODE: &str = "farmerbot.powermanager.includenode";
const CMD_POWER_ON: &str = "farmerbot.powermanager.poweron";
const CMD_POWER_OFF: &str = "farmerbot.powermanager.poweroff";

/// Dispatches relay envelopes to the decision core.
pub struct Router {
    fleet: Arc<Fleet>,
    power: PowerController,
    scheduler: Scheduler,
    chain_manager: Arc<dyn ChainManager>,
    node_client: Arc<dyn NodeClient>,
    farmer_twin: u32,
    farmer_address: String,
}

impl Router {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fleet: Arc<Fleet>,
        power: PowerController,
        scheduler: Scheduler,
        chain_manager: Arc<dyn ChainManager>,
        node_client: Arc<dyn NodeClient>,
        farmer_twin: u32,
        farmer_address: String,
    ) -> Self {
        Self {
            fleet,
            power,
            scheduler,
            chain_manager,
            node_client,
            farmer_twin,
            farmer_address,
        }
    }

    /// Serves inbound requests until the relay closes or the token fires.
    /// Every handler runs in its own task.
    pub async fn serve(
        self: Arc<Self>,
        mut listener: Box<dyn RelayListener>,
        replier: Arc<dyn RelayReplier>,
        cancel: CancellationToken,
    ) {
        info!(farm_id = self.fleet.farm.id, "rpc surface serving");
        loop {
            let envelope = tokio::select! {
                () = cancel.cancelled() => return,
                envelope = listener.next() => match envelope {
                    Some(envelope) => envelope,
                    None => {
                        warn!("relay listener closed");
                        return;
                    }
                },
            };

            let router = Arc::clone(&self);
            let replier = Arc::clone(&replier);
            tokio::spawn(async move {
                let reply = match router.dispatch(&envelope).await {
                    Ok(result) => Reply::ok(&envelope, result),
                    Err(e) => {
                        warn!(cmd = %envelope.cmd, error = %e, "request failed");
                        Reply::err(&envelope, e.to_string())
                    }
                };
                if let Err(e) = replier.reply(reply).await {
                    error!(error = %e, "failed to send reply");
                }
            });
        }
    }

    /// Routes one request. Public for the integration tests.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<Value> {
        match envelope.cmd.as_str() {
            CMD_VERSION => Ok(json!(crate::VERSION)),
            CMD_FIND_NODE => self.handle_find_node(envelope).await,
            CMD_INCLUDE_NODE => self.handle_include_node(envelope).await,
            CMD_POWER_ON => self.handle_power(envelope, true).await,
            CMD_POWER_OFF => self.handle_power(envelope, false).await,
            other => Err(Error::ConfigInvalid(format!("unknown command '{other}'"))),
        }
    }

    async fn handle_find_node(&self, envelope: &Envelope) -> Result<Value> {
        let filter: NodeFilter = decode_payload(&envelope.payload)?;
        let chain = self.chain_manager.connect().await?;
        let node_id = self.scheduler.find_node(chain.as_ref(), &filter).await?;
        Ok(json!(node_id))
    }

    async fn handle_include_node(&self, envelope: &Envelope) -> Result<Value> {
        self.authorize(envelope)?;
        let node_id: u32 = decode_payload(&envelope.payload)?;

        if self.fleet.node(node_id).await.is_some() {
            return Err(Error::ConfigInvalid(format!(
                "node {node_id} is already managed"
            )));
        }
        if !self.fleet.config.manages(node_id) {
            return Err(Error::ConfigInvalid(format!(
                "node {node_id} is excluded, cannot add it"
            )));
        }

        let chain = self.chain_manager.connect().await?;
        let node = updater::fetch_node(
            chain.as_ref(),
            self.node_client.as_ref(),
            &self.fleet.config,
            node_id,
            false,
            self.fleet.farm.dedicated_farm,
            PowerState::On,
            Local::now(),
        )
        .await?;

        info!(node_id, "node included into management");
        self.fleet.add_node(node).await;
        Ok(Value::Null)
    }

    /// Manual power control. The node leaves bot management afterwards; the
    /// farmer has to include it again for the bot to touch it.
    async fn handle_power(&self, envelope: &Envelope, up: bool) -> Result<Value> {
        self.authorize(envelope)?;
        let node_id: u32 = decode_payload(&envelope.payload)?;

        let chain = self.chain_manager.connect().await?;
        validate_balance(chain.as_ref(), &self.farmer_address, MIN_BALANCE_PER_OP_TFT).await?;

        if up {
            self.power.power_on(chain.as_ref(), node_id).await?;
        } else {
            self.power.power_off(chain.as_ref(), node_id).await?;
        }

        info!(node_id, up, "manual power action, removing node from management");
        self.fleet.delete_node(node_id).await;
        Ok(Value::Null)
    }

    fn authorize(&self, envelope: &Envelope) -> Result<()> {
        if envelope.source_twin != self.farmer_twin {
            return Err(Error::Unauthorized {
                twin_id: envelope.source_twin,
                farmer_twin_id: self.farmer_twin,
            });
        }
        Ok(())
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::ConfigInvalid(format!("failed to load request payload: {e}")))
}

/// Checks the farmer account covers `required_tft`, returning the available
/// balance in TFT. A missing account counts as empty.
pub(crate) async fn validate_balance(
    chain: &dyn ChainClient,
    address: &str,
    required_tft: f64,
) -> Result<f64> {
    let balance = match chain.balance(address).await {
        Ok(balance) => balance,
        Err(ClientError::NotFound) => farmerbot_proto::Balance { free: 0 },
        Err(e) => return Err(e.into()),
    };

    let available = balance.free as f64 / TFT_UNITS as f64;
    if balance.free < tft_to_units(required_tft) {
        return Err(Error::BalanceTooLow {
            available,
            required: required_tft,
        });
    }
    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_decoding() {
        let node_id: u32 = decode_payload(&json!(42)).unwrap();
        assert_eq!(node_id, 42);

        let filter: NodeFilter = decode_payload(&json!({"cru": 2, "public_ips": 1})).unwrap();
        assert_eq!(filter.cru, 2);
        assert_eq!(filter.public_ips, 1);

        assert!(decode_payload::<u32>(&json!("not a number")).is_err());
    }
}
