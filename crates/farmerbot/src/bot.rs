//! Wiring of the decision core into a runnable bot.

use std::sync::Arc;

use chrono::Local;
use farmerbot_client::{ChainManager, Identity, NodeClient, RelayListener, RelayReplier};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::constants::{MIN_BALANCE_TO_RUN_TFT, RECOMMENDED_BALANCE_TFT};
use crate::error::Result;
use crate::find_node::Scheduler;
use crate::fleet::Fleet;
use crate::power::PowerController;
use crate::reconciler::Reconciler;
use crate::rpc::{self, Router};
use crate::updater::Updater;

/// The assembled farmerbot.
pub struct FarmerBot {
    fleet: Arc<Fleet>,
    reconciler: Arc<Reconciler>,
    router: Arc<Router>,
}

impl FarmerBot {
    /// Boots the decision core: resolves the farmer twin, checks the
    /// account balance, builds the initial fleet state and wires every
    /// component together.
    pub async fn new(
        config: Config,
        identity: &Identity,
        chain_manager: Arc<dyn ChainManager>,
        node_client: Arc<dyn NodeClient>,
    ) -> Result<Self> {
        let chain = chain_manager.connect().await?;

        let farmer_twin = chain.twin_by_pubkey(&identity.public_key()).await?;
        let address = identity.address();

        let available =
            rpc::validate_balance(chain.as_ref(), &address, MIN_BALANCE_TO_RUN_TFT).await?;
        if available < RECOMMENDED_BALANCE_TFT {
            warn!(
                available,
                recommended = RECOMMENDED_BALANCE_TFT,
                "farmer balance is below the recommended amount"
            );
        }

        let fleet = Arc::new(
            Fleet::bootstrap(
                chain.as_ref(),
                node_client.as_ref(),
                config,
                farmer_twin,
                Local::now(),
            )
            .await?,
        );

        let power = PowerController::new(Arc::clone(&fleet));
        let scheduler = Scheduler::new(Arc::clone(&fleet));
        let updater = Updater::new(Arc::clone(&fleet), Arc::clone(&node_client));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&fleet),
            updater,
            power.clone(),
            Arc::clone(&chain_manager),
            Arc::clone(&node_client),
        ));
        let router = Arc::new(Router::new(
            Arc::clone(&fleet),
            power,
            scheduler,
            chain_manager,
            node_client,
            farmer_twin,
            address,
        ));

        info!(
            farm_id = fleet.farm.id,
            farmer_twin, "farmerbot initialised"
        );
        Ok(Self {
            fleet,
            reconciler,
            router,
        })
    }

    /// Relay session the bot answers on.
    #[must_use]
    pub fn session(&self) -> String {
        format!("farmerbot-{}", self.fleet.farm.id)
    }

    /// The fleet state, for inspection.
    #[must_use]
    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    /// Runs the RPC surface and the reconciliation loop until cancelled.
    pub async fn run(
        &self,
        listener: Box<dyn RelayListener>,
        replier: Arc<dyn RelayReplier>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let serve = tokio::spawn(
            Arc::clone(&self.router).serve(listener, replier, cancel.clone()),
        );

        info!("up and running");
        self.reconciler.run(cancel).await;

        let _ = serve.await;
        Ok(())
    }
}
