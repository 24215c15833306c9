//! Grid networks and their fixed endpoints.

use std::fmt;
use std::str::FromStr;

/// A grid network the bot can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Dev,
    Qa,
    Test,
    Main,
}

impl Network {
    /// Chain websocket endpoints, tried in order.
    #[must_use]
    pub fn chain_urls(self) -> Vec<String> {
        match self {
            Self::Dev => vec![
                "wss://tfchain.dev.grid.tf/ws".to_owned(),
                "wss://tfchain.dev.grid.tf:443".to_owned(),
            ],
            Self::Qa => vec![
                "wss://tfchain.qa.grid.tf/ws".to_owned(),
                "wss://tfchain.qa.grid.tf:443".to_owned(),
            ],
            Self::Test => vec![
                "wss://tfchain.test.grid.tf/ws".to_owned(),
                "wss://tfchain.test.grid.tf:443".to_owned(),
            ],
            Self::Main => vec![
                "wss://tfchain.grid.tf/ws".to_owned(),
                "wss://tfchain.grid.tf:443".to_owned(),
            ],
        }
    }

    /// Relay endpoint for the network.
    #[must_use]
    pub fn relay_url(self) -> String {
        match self {
            Self::Dev => "wss://relay.dev.grid.tf".to_owned(),
            Self::Qa => "wss://relay.qa.grid.tf".to_owned(),
            Self::Test => "wss://relay.test.grid.tf".to_owned(),
            Self::Main => "wss://relay.grid.tf".to_owned(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dev => "dev",
            Self::Qa => "qa",
            Self::Test => "test",
            Self::Main => "main",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "qa" => Ok(Self::Qa),
            "test" => Ok(Self::Test),
            "main" => Ok(Self::Main),
            other => Err(format!(
                "network must be one of dev, qa, test and main, not '{other}'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        for name in ["dev", "qa", "test", "main"] {
            let network: Network = name.parse().unwrap();
            assert_eq!(network.to_string(), name);
        }
        assert!("staging".parse::<Network>().is_err());
    }

    #[test]
    fn main_endpoints_omit_the_network_segment() {
        assert!(Network::Main.chain_urls()[0].contains("tfchain.grid.tf"));
        assert!(Network::Dev.chain_urls()[0].contains("tfchain.dev.grid.tf"));
        assert_eq!(Network::Main.relay_url(), "wss://relay.grid.tf");
    }
}
