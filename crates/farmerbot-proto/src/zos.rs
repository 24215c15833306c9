//! Payload types returned by the zos node RPCs.

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;

/// Capacity counters as reported by `zos.statistics.get`.
///
/// Mirrors the node-side layout: `cru` in cores, the storage and memory
/// dimensions in bytes, plus the number of public IPv4 addresses in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZosCapacity {
    pub cru: u64,
    pub mru: u64,
    pub sru: u64,
    pub hru: u64,
    pub ipv4u: u64,
}

impl From<ZosCapacity> for Capacity {
    fn from(counters: ZosCapacity) -> Self {
        Self {
            cru: counters.cru,
            mru: counters.mru,
            sru: counters.sru,
            hru: counters.hru,
        }
    }
}

/// Statistics reported by a node over `zos.statistics.get`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZosStatistics {
    pub total: ZosCapacity,
    pub used: ZosCapacity,
    pub system: ZosCapacity,
}

/// A storage pool reported by `zos.storage.pools`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePool {
    pub name: String,
    #[serde(rename = "type")]
    pub pool_type: String,
    pub size: u64,
    pub used: u64,
}

/// A GPU reported by `zos.gpu.list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gpu {
    pub id: String,
    pub vendor: String,
    pub device: String,
    /// Id of the contract currently holding the GPU, zero when free.
    pub contract: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_decode() {
        let json = r#"{
            "total": {"cru": 8, "mru": 34359738368, "sru": 512110190592, "hru": 0, "ipv4u": 0},
            "used": {"cru": 2, "mru": 4294967296, "sru": 10737418240, "hru": 0, "ipv4u": 1},
            "system": {"cru": 0, "mru": 1073741824, "sru": 2147483648, "hru": 0, "ipv4u": 0}
        }"#;
        let stats: ZosStatistics = serde_json::from_str(json).unwrap();
        assert_eq!(stats.total.cru, 8);
        assert_eq!(stats.used.ipv4u, 1);
        let total: Capacity = stats.total.into();
        assert_eq!(total.mru, 34_359_738_368);
    }

    #[test]
    fn pool_type_field_rename() {
        let json = r#"{"name": "pool-a", "type": "ssd", "size": 100, "used": 10}"#;
        let pool: StoragePool = serde_json::from_str(json).unwrap();
        assert_eq!(pool.pool_type, "ssd");
    }
}
