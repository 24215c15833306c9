//! The node filter tenants send to `farmerbot.nodemanager.findnode`.

use serde::{Deserialize, Serialize};

use crate::capacity::{gib_to_bytes, Capacity};

/// Selection criteria for a tenant node request.
///
/// Storage and memory sizes are expressed in GiB on the wire and converted
/// to bytes before any comparison against node capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFilter {
    /// Node ids the tenant does not want.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes_excluded: Vec<u32>,
    /// Number of GPUs required.
    #[serde(skip_serializing_if = "is_zero_u8")]
    pub num_gpu: u8,
    /// Acceptable GPU vendors.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpu_vendors: Vec<String>,
    /// Acceptable GPU device names.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpu_devices: Vec<String>,
    /// Require a certified node.
    #[serde(skip_serializing_if = "is_false")]
    pub certified: bool,
    /// Rent the node whole.
    #[serde(skip_serializing_if = "is_false")]
    pub dedicated: bool,
    /// Require a node with a public config.
    #[serde(skip_serializing_if = "is_false")]
    pub public_config: bool,
    /// Number of public IPs to reserve.
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub public_ips: u64,
    /// HDD storage in GiB.
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub hru: u64,
    /// SSD storage in GiB.
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub sru: u64,
    /// Compute units (cores).
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub cru: u64,
    /// Memory in GiB.
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub mru: u64,
}

impl NodeFilter {
    /// Returns the requested capacity with sizes converted to bytes.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        Capacity {
            cru: self.cru,
            mru: gib_to_bytes(self.mru),
            sru: gib_to_bytes(self.sru),
            hru: gib_to_bytes(self.hru),
        }
    }

    /// Number of GPUs the request effectively asks for.
    ///
    /// A vendor or device constraint implies at least one GPU even when the
    /// tenant left `num_gpu` unset.
    #[must_use]
    pub fn effective_gpu_count(&self) -> u8 {
        if self.num_gpu == 0 && (!self.gpu_vendors.is_empty() || !self.gpu_devices.is_empty()) {
            1
        } else {
            self.num_gpu
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero_u8(value: &u8) -> bool {
    *value == 0
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}
