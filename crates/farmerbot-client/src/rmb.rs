//! Node RPC wrapper over the relay bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use farmerbot_proto::{Gpu, StoragePool, ZosStatistics};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::relay::RelayBus;

/// Deadline for a single node RPC response.
pub const TIMEOUT_RMB_RESPONSE: Duration = Duration::from_secs(120);

const CMD_SYSTEM_VERSION: &str = "zos.system.version";
const CMD_STATISTICS: &str = "zos.statistics.get";
const CMD_STORAGE_POOLS: &str = "zos.storage.pools";
const CMD_GPU_LIST: &str = "zos.gpu.list";

/// Calls a node exposes over the relay.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Liveness probe; the version payload itself is discarded.
    async fn system_version(&self, twin: u32) -> Result<()>;

    /// Total/used/system capacity counters plus public IPv4 usage.
    async fn statistics(&self, twin: u32) -> Result<ZosStatistics>;

    /// Storage pools of the node.
    async fn storage_pools(&self, twin: u32) -> Result<Vec<StoragePool>>;

    /// GPUs present on the node.
    async fn gpus(&self, twin: u32) -> Result<Vec<Gpu>>;
}

/// [`NodeClient`] implementation over a [`RelayBus`].
///
/// Every call is bounded by [`TIMEOUT_RMB_RESPONSE`]; a node that misses the
/// deadline is reported as unreachable for the tick.
pub struct RelayNodeClient {
    bus: Arc<dyn RelayBus>,
    timeout: Duration,
}

impl RelayNodeClient {
    /// Creates a node client with the default response deadline.
    #[must_use]
    pub fn new(bus: Arc<dyn RelayBus>) -> Self {
        Self {
            bus,
            timeout: TIMEOUT_RMB_RESPONSE,
        }
    }

    /// Overrides the response deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call<T: DeserializeOwned>(&self, twin: u32, cmd: &str) -> Result<T> {
        let response = tokio::time::timeout(self.timeout, self.bus.call(twin, cmd, Value::Null))
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(serde_json::from_value(response)?)
    }
}

#[async_trait]
impl NodeClient for RelayNodeClient {
    async fn system_version(&self, twin: u32) -> Result<()> {
        self.call::<Value>(twin, CMD_SYSTEM_VERSION).await?;
        Ok(())
    }

    async fn statistics(&self, twin: u32) -> Result<ZosStatistics> {
        self.call(twin, CMD_STATISTICS).await
    }

    async fn storage_pools(&self, twin: u32) -> Result<Vec<StoragePool>> {
        self.call(twin, CMD_STORAGE_POOLS).await
    }

    async fn gpus(&self, twin: u32) -> Result<Vec<Gpu>> {
        self.call(twin, CMD_GPU_LIST).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedBus {
        calls: Mutex<Vec<(u32, String)>>,
        response: Value,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl RelayBus for ScriptedBus {
        async fn call(&self, twin: u32, cmd: &str, _payload: Value) -> Result<Value> {
            self.calls.lock().push((twin, cmd.to_owned()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn statistics_decodes_counters() {
        let bus = Arc::new(ScriptedBus {
            calls: Mutex::new(Vec::new()),
            response: json!({
                "total": {"cru": 8, "mru": 16, "sru": 32, "hru": 0, "ipv4u": 0},
                "used": {"cru": 1, "mru": 2, "sru": 3, "hru": 0, "ipv4u": 1},
                "system": {}
            }),
            delay: None,
        });
        let client = RelayNodeClient::new(bus.clone());

        let stats = client.statistics(42).await.unwrap();
        assert_eq!(stats.total.cru, 8);
        assert_eq!(stats.used.ipv4u, 1);
        assert_eq!(bus.calls.lock()[0], (42, CMD_STATISTICS.to_owned()));
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let bus = Arc::new(ScriptedBus {
            calls: Mutex::new(Vec::new()),
            response: Value::Null,
            delay: Some(Duration::from_millis(50)),
        });
        let client = RelayNodeClient::new(bus).with_timeout(Duration::from_millis(5));

        let err = client.system_version(1).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }

    #[tokio::test]
    async fn gpu_list_decodes() {
        let bus = Arc::new(ScriptedBus {
            calls: Mutex::new(Vec::new()),
            response: json!([
                {"id": "0000:28:00.0", "vendor": "nvidia", "device": "a100", "contract": 0}
            ]),
            delay: None,
        });
        let client = RelayNodeClient::new(bus);

        let gpus = client.gpus(7).await.unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].vendor, "nvidia");
    }
}
