//! Configuration of the farmerbot.

use std::path::Path;

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::constants::{
    DEFAULT_CPU_PROVISION, DEFAULT_PERIODIC_WAKE_UP_LIMIT, DEFAULT_WAKE_UP_THRESHOLD,
    MAX_WAKE_UP_THRESHOLD, MIN_WAKE_UP_THRESHOLD,
};
use crate::error::{Error, Result};

/// Farmerbot configuration as read from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Farm to manage.
    pub farm_id: u32,
    /// Only these nodes are managed when non-empty.
    #[serde(default)]
    pub included_nodes: Vec<u32>,
    /// Nodes never managed by the bot.
    #[serde(default)]
    pub excluded_nodes: Vec<u32>,
    /// Nodes the bot must never power off.
    #[serde(default)]
    pub never_shutdown_nodes: Vec<u32>,
    /// Nodes preferred by the scheduler, in order.
    #[serde(default)]
    pub priority_nodes: Vec<u32>,
    /// Keep going when a node cannot be probed while powering on.
    #[serde(default)]
    pub continue_on_power_on_err: bool,
    /// Power management tuning.
    #[serde(default)]
    pub power: PowerConfig,
}

/// Power management tuning knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Wall-clock time of the daily periodic wake-up.
    #[serde(default)]
    pub periodic_wake_up_start: Option<WakeUpTime>,
    /// Fleet utilisation percentage above which a node is woken.
    #[serde(default)]
    pub wake_up_threshold: u8,
    /// Max nodes woken per reconciliation tick for wake-up reasons.
    #[serde(default)]
    pub periodic_wake_up_limit: u8,
    /// CPU over-provision factor in `[1, 4]`.
    #[serde(default)]
    pub overprovision_cpu: f64,
}

impl Config {
    /// Loads the configuration from a file, choosing the format by
    /// extension, with a `FARMERBOT_` environment overlay on top.
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let figment = match extension.as_str() {
            "yml" | "yaml" => Figment::from(Yaml::file(path)),
            "json" => Figment::from(Json::file(path)),
            "toml" => Figment::from(Toml::file(path)),
            other => {
                return Err(Error::ConfigInvalid(format!(
                    "unsupported config file format '{other}'"
                )))
            }
        };

        figment
            .merge(Env::prefixed("FARMERBOT_").split("__"))
            .extract()
            .map_err(|e| Error::ConfigInvalid(e.to_string()))
    }

    /// Returns true when the node id is under bot management.
    #[must_use]
    pub fn manages(&self, node_id: u32) -> bool {
        !self.excluded_nodes.contains(&node_id)
            && (self.included_nodes.is_empty() || self.included_nodes.contains(&node_id))
    }

    /// The subset of the farm the bot manages, in farm order.
    #[must_use]
    pub fn managed_nodes(&self, farm_nodes: &[u32]) -> Vec<u32> {
        farm_nodes
            .iter()
            .copied()
            .filter(|id| self.manages(*id))
            .collect()
    }

    /// Validates the configuration against the actual farm membership and
    /// fills in defaults, coercing out-of-range power settings.
    pub fn validate(&mut self, farm_nodes: &[u32]) -> Result<()> {
        if self.farm_id == 0 {
            return Err(Error::ConfigInvalid("farm_id is required".to_owned()));
        }

        for id in &self.included_nodes {
            if !farm_nodes.contains(id) {
                return Err(Error::ConfigInvalid(format!(
                    "included node {id} does not belong to farm {}",
                    self.farm_id
                )));
            }
        }
        for id in &self.excluded_nodes {
            if !farm_nodes.contains(id) {
                return Err(Error::ConfigInvalid(format!(
                    "excluded node {id} does not belong to farm {}",
                    self.farm_id
                )));
            }
            if self.included_nodes.contains(id) {
                return Err(Error::ConfigInvalid(format!(
                    "node {id} cannot be both included and excluded"
                )));
            }
        }
        for id in &self.priority_nodes {
            if !self.manages(*id) || !farm_nodes.contains(id) {
                return Err(Error::ConfigInvalid(format!(
                    "priority node {id} is not among the managed nodes"
                )));
            }
        }
        for id in &self.never_shutdown_nodes {
            if !self.manages(*id) || !farm_nodes.contains(id) {
                return Err(Error::ConfigInvalid(format!(
                    "never-shutdown node {id} is not among the managed nodes"
                )));
            }
        }

        if self.managed_nodes(farm_nodes).len() < 2 {
            return Err(Error::ConfigInvalid(
                "at least 2 managed nodes are required".to_owned(),
            ));
        }

        self.power.validate()
    }
}

impl PowerConfig {
    fn validate(&mut self) -> Result<()> {
        if self.overprovision_cpu == 0.0 {
            self.overprovision_cpu = DEFAULT_CPU_PROVISION;
        }
        if !(1.0..=4.0).contains(&self.overprovision_cpu) {
            return Err(Error::ConfigInvalid(format!(
                "cpu over-provision must be between 1 and 4, not {}",
                self.overprovision_cpu
            )));
        }

        if self.wake_up_threshold == 0 {
            warn!(
                default = DEFAULT_WAKE_UP_THRESHOLD,
                "wake_up_threshold not set, using the default"
            );
            self.wake_up_threshold = DEFAULT_WAKE_UP_THRESHOLD;
        }
        if self.wake_up_threshold < MIN_WAKE_UP_THRESHOLD {
            warn!(
                threshold = self.wake_up_threshold,
                minimum = MIN_WAKE_UP_THRESHOLD,
                "wake_up_threshold below the minimum, coercing"
            );
            self.wake_up_threshold = MIN_WAKE_UP_THRESHOLD;
        }
        if self.wake_up_threshold > MAX_WAKE_UP_THRESHOLD {
            warn!(
                threshold = self.wake_up_threshold,
                maximum = MAX_WAKE_UP_THRESHOLD,
                "wake_up_threshold above the maximum, coercing"
            );
            self.wake_up_threshold = MAX_WAKE_UP_THRESHOLD;
        }

        if self.periodic_wake_up_limit == 0 {
            self.periodic_wake_up_limit = DEFAULT_PERIODIC_WAKE_UP_LIMIT;
        }

        if self.periodic_wake_up_start.is_none() {
            let now = WakeUpTime(Local::now().time());
            warn!(
                start = %now,
                "periodic_wake_up_start not set, using the current time"
            );
            self.periodic_wake_up_start = Some(now);
        }

        Ok(())
    }

    /// The periodic wake-up moment of the day `now` falls in.
    ///
    /// Falls back to `now` itself when the start was never validated in.
    #[must_use]
    pub fn periodic_wake_up_today(&self, now: DateTime<Local>) -> DateTime<Local> {
        self.periodic_wake_up_start
            .map_or(now, |start| start.today(now))
    }
}

/// A 12-hour-clock wall time like `08:30AM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeUpTime(pub NaiveTime);

impl WakeUpTime {
    const FORMAT: &'static str = "%I:%M%p";

    /// Parses `HH:MMAM|PM`.
    pub fn parse(input: &str) -> std::result::Result<Self, chrono::ParseError> {
        NaiveTime::parse_from_str(input.trim(), Self::FORMAT).map(Self)
    }

    /// Resolves the wall time against the day `now` falls in, local time.
    #[must_use]
    pub fn today(&self, now: DateTime<Local>) -> DateTime<Local> {
        Local
            .from_local_datetime(&now.date_naive().and_time(self.0))
            .earliest()
            .unwrap_or(now)
    }
}

impl std::fmt::Display for WakeUpTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl Serialize for WakeUpTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WakeUpTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|e| {
            D::Error::custom(format!("invalid wake-up time '{raw}': {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_config() -> Config {
        Config {
            farm_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn wake_up_time_parses_12_hour_clock() {
        let morning = WakeUpTime::parse("08:30AM").unwrap();
        assert_eq!(morning.0, NaiveTime::from_hms_opt(8, 30, 0).unwrap());

        let evening = WakeUpTime::parse("08:30PM").unwrap();
        assert_eq!(evening.0, NaiveTime::from_hms_opt(20, 30, 0).unwrap());

        assert!(WakeUpTime::parse("25:00AM").is_err());
        assert!(WakeUpTime::parse("8:30").is_err());
    }

    #[test]
    fn wake_up_time_display_roundtrip() {
        let time = WakeUpTime::parse("11:45PM").unwrap();
        assert_eq!(time.to_string(), "11:45PM");
        assert_eq!(WakeUpTime::parse(&time.to_string()).unwrap(), time);
    }

    #[test]
    fn yaml_config_parses() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "farm_id: 7\n\
             included_nodes: [1, 2, 3]\n\
             never_shutdown_nodes: [1]\n\
             power:\n\
             \x20 periodic_wake_up_start: \"08:30AM\"\n\
             \x20 wake_up_threshold: 60\n\
             \x20 overprovision_cpu: 1.5\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.farm_id, 7);
        assert_eq!(config.included_nodes, vec![1, 2, 3]);
        assert_eq!(config.power.wake_up_threshold, 60);
        assert_eq!(
            config.power.periodic_wake_up_start,
            Some(WakeUpTime::parse("08:30AM").unwrap())
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn validate_fills_defaults() {
        let mut config = base_config();
        config.validate(&[1, 2, 3]).unwrap();

        assert_eq!(config.power.wake_up_threshold, DEFAULT_WAKE_UP_THRESHOLD);
        assert_eq!(
            config.power.periodic_wake_up_limit,
            DEFAULT_PERIODIC_WAKE_UP_LIMIT
        );
        assert_eq!(config.power.overprovision_cpu, DEFAULT_CPU_PROVISION);
        assert!(config.power.periodic_wake_up_start.is_some());
    }

    #[test]
    fn validate_coerces_threshold_into_range() {
        let mut config = base_config();
        config.power.wake_up_threshold = 10;
        config.validate(&[1, 2]).unwrap();
        assert_eq!(config.power.wake_up_threshold, MIN_WAKE_UP_THRESHOLD);

        let mut config = base_config();
        config.power.wake_up_threshold = 95;
        config.validate(&[1, 2]).unwrap();
        assert_eq!(config.power.wake_up_threshold, MAX_WAKE_UP_THRESHOLD);
    }

    #[test]
    fn validate_rejects_bad_overprovision() {
        let mut config = base_config();
        config.power.overprovision_cpu = 5.0;
        assert!(matches!(
            config.validate(&[1, 2]),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn validate_rejects_cross_listed_nodes() {
        let mut config = base_config();
        config.included_nodes = vec![1, 2];
        config.excluded_nodes = vec![2];
        assert!(matches!(
            config.validate(&[1, 2, 3]),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn validate_rejects_foreign_nodes() {
        let mut config = base_config();
        config.included_nodes = vec![1, 99];
        assert!(matches!(
            config.validate(&[1, 2, 3]),
            Err(Error::ConfigInvalid(_))
        ));

        let mut config = base_config();
        config.priority_nodes = vec![42];
        assert!(matches!(
            config.validate(&[1, 2, 3]),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn validate_requires_two_managed_nodes() {
        let mut config = base_config();
        config.included_nodes = vec![1];
        assert!(matches!(
            config.validate(&[1, 2, 3]),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn priority_must_be_within_included() {
        let mut config = base_config();
        config.included_nodes = vec![1, 2];
        config.priority_nodes = vec![3];
        assert!(matches!(
            config.validate(&[1, 2, 3]),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn manages_respects_both_lists() {
        let mut config = base_config();
        config.excluded_nodes = vec![4];
        assert!(config.manages(1));
        assert!(!config.manages(4));

        config.included_nodes = vec![1, 2];
        assert!(config.manages(2));
        assert!(!config.manages(3));
        assert_eq!(config.managed_nodes(&[1, 2, 3, 4]), vec![1, 2]);
    }
}
