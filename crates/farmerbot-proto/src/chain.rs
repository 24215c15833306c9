//! Records read from the chain.

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;

/// Number of chain balance units per TFT.
pub const TFT_UNITS: u64 = 10_000_000;

/// Converts a TFT amount into chain balance units.
#[must_use]
pub fn tft_to_units(tft: f64) -> u128 {
    (tft * TFT_UNITS as f64) as u128
}

/// A farm as recorded on chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Farm {
    pub id: u32,
    /// Twin id of the farm owner.
    pub twin_id: u32,
    /// Every node on a dedicated farm is rented whole.
    pub dedicated_farm: bool,
    /// Public IPs owned by the farm, in chain order.
    pub public_ips: Vec<FarmPublicIp>,
}

/// A public IP entry of a farm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmPublicIp {
    pub ip: String,
    pub gateway: String,
}

/// A node as recorded on chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: u32,
    /// RPC address of the node on the relay.
    pub twin_id: u32,
    /// Total resources registered for the node.
    pub resources: Capacity,
    pub public_config: Option<PublicConfig>,
    pub certification: Certification,
}

/// Network configuration of a node that is publicly reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicConfig {
    pub ipv4: String,
    pub ipv6: String,
    pub domain: String,
}

/// Certification level of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Certification {
    #[default]
    Diy,
    Certified,
}

impl Certification {
    /// Returns true for certified hardware.
    #[must_use]
    pub const fn is_certified(self) -> bool {
        matches!(self, Self::Certified)
    }
}

/// Desired and observed power state recorded on chain for a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerTarget {
    /// Last state the node reported.
    pub state: Power,
    /// State the farmer asked for.
    pub target: Power,
}

/// Chain-side power value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    #[default]
    Up,
    Down,
}

impl Power {
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }

    #[must_use]
    pub const fn is_down(self) -> bool {
        matches!(self, Self::Down)
    }
}

/// Account balance of the farmer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Free balance in chain units (`TFT_UNITS` per TFT).
    pub free: u128,
}
