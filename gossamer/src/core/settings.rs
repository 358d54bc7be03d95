use crate::core::{DetectorConfig, Distribution, GossipError, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which active gossiper a [`GossipManager`](crate::cluster::GossipManager) runs. Resolved once,
/// when the manager starts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveGossipStrategy {
  /// Gossip with peers chosen uniformly at random.
  Simple,
  /// Prefer peers whose `datacenter` property matches ours.
  DatacenterRackAware,
}
impl FromStr for ActiveGossipStrategy {
  type Err = GossipError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "simple" => Ok(ActiveGossipStrategy::Simple),
      "datacenter_rack_aware" => Ok(ActiveGossipStrategy::DatacenterRackAware),
      _ => Err(GossipError::UnknownStrategy(s.to_string())),
    }
  }
}
impl fmt::Display for ActiveGossipStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ActiveGossipStrategy::Simple => write!(f, "simple"),
      ActiveGossipStrategy::DatacenterRackAware => write!(f, "datacenter_rack_aware"),
    }
  }
}

/// Configures a [`GossipManager`](crate::cluster::GossipManager).
///
/// Durations are written as milliseconds when the settings come from TOML. Every field is
/// optional in the file; missing ones take the default listed here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipSettings {
  /// How often the active gossiper wakes up to exchange digests.
  ///
  /// default: `10 milliseconds`
  #[serde(with = "millis")]
  pub gossip_interval: Duration,
  /// How often expired per-node and shared data is reaped.
  ///
  /// default: `5 seconds`
  #[serde(with = "millis")]
  pub cleanup_interval: Duration,
  /// How often live members are checked against the conviction threshold.
  ///
  /// default: `100 milliseconds`
  #[serde(with = "millis")]
  pub liveness_interval: Duration,
  /// How often ring state and user data are written to disk, when persistence is enabled.
  ///
  /// default: `60 seconds`
  #[serde(with = "millis")]
  pub persist_interval: Duration,
  /// How long the active gossiper waits for a digest reply before moving on.
  ///
  /// default: `250 milliseconds`
  #[serde(with = "millis")]
  pub response_timeout: Duration,
  /// How long shutdown waits for in-flight inbound messages before aborting them.
  ///
  /// default: `10 milliseconds`
  #[serde(with = "millis")]
  pub shutdown_grace: Duration,
  /// The number of heartbeat gaps each failure detector keeps.
  ///
  /// default: `5000`
  pub window_size: usize,
  /// The number of heartbeat gaps needed before a failure detector gives a phi value.
  ///
  /// default: `5`
  pub minimum_samples: usize,
  /// The distribution heartbeat gaps are assumed to follow.
  ///
  /// default: `normal`
  pub distribution: Distribution,
  /// The phi value at or above which a live member is declared dead.
  ///
  /// default: `10.0`
  pub convict_threshold: f64,
  /// The active gossip strategy.
  ///
  /// default: `simple`
  pub active_gossip: ActiveGossipStrategy,
  /// The number of live peers each gossip round talks to.
  ///
  /// default: `1`
  pub gossip_disperse: usize,
  /// For the datacenter aware strategy, the chance of picking a peer in our own datacenter.
  ///
  /// default: `0.8`
  pub same_datacenter_probability: f64,
  /// Skip the sender of the last digest we received when choosing whom to gossip with, unless
  /// it is the only candidate.
  ///
  /// default: `false`
  pub exclude_last_sender: bool,
  /// Ship user data in bulk messages instead of one message per entry.
  ///
  /// default: `false`
  pub bulk_transfer: bool,
  /// The maximum number of entries in one bulk message.
  ///
  /// default: `100`
  pub bulk_transfer_size: usize,
  /// Periodically write the known members to disk and reload them on startup.
  ///
  /// default: `false`
  pub persist_ring_state: bool,
  /// Periodically write per-node and shared data to disk and reload it on startup.
  ///
  /// default: `false`
  pub persist_data_state: bool,
  /// Directory the ring state file lives in.
  ///
  /// default: `./`
  pub path_to_ring_state: PathBuf,
  /// Directory the user data files live in.
  ///
  /// default: `./`
  pub path_to_data_state: PathBuf,
  /// Encoding for persisted files.
  ///
  /// default: `json`
  pub serializer: Serializer,
}
impl Default for GossipSettings {
  #[inline]
  fn default() -> Self {
    GossipSettings {
      gossip_interval: Duration::from_millis(10),
      cleanup_interval: Duration::from_millis(5000),
      liveness_interval: Duration::from_millis(100),
      persist_interval: Duration::from_secs(60),
      response_timeout: Duration::from_millis(250),
      shutdown_grace: Duration::from_millis(10),
      window_size: 5000,
      minimum_samples: 5,
      distribution: Distribution::Normal,
      convict_threshold: 10.0,
      active_gossip: ActiveGossipStrategy::Simple,
      gossip_disperse: 1,
      same_datacenter_probability: 0.8,
      exclude_last_sender: false,
      bulk_transfer: false,
      bulk_transfer_size: 100,
      persist_ring_state: false,
      persist_data_state: false,
      path_to_ring_state: PathBuf::from("./"),
      path_to_data_state: PathBuf::from("./"),
      serializer: Serializer::Json,
    }
  }
}
impl GossipSettings {
  pub fn from_toml(s: &str) -> Result<GossipSettings, GossipError> {
    let settings: GossipSettings = toml::from_str(s)?;
    settings.validate()?;
    Ok(settings)
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<GossipSettings, GossipError> {
    Self::from_toml(&std::fs::read_to_string(path)?)
  }

  pub fn validate(&self) -> Result<(), GossipError> {
    let zero = [
      ("gossip_interval", self.gossip_interval),
      ("cleanup_interval", self.cleanup_interval),
      ("liveness_interval", self.liveness_interval),
      ("persist_interval", self.persist_interval),
    ];
    if let Some((name, _)) = zero.iter().find(|(_, d)| d.as_millis() == 0) {
      return Err(GossipError::InvalidSetting(format!("{} must be at least 1ms", name)));
    }
    if self.window_size == 0 {
      return Err(GossipError::InvalidSetting("window_size must be positive".to_string()));
    }
    if self.bulk_transfer_size == 0 {
      return Err(GossipError::InvalidSetting("bulk_transfer_size must be positive".to_string()));
    }
    if !self.convict_threshold.is_finite() || self.convict_threshold < 0.0 {
      return Err(GossipError::InvalidSetting(format!(
        "convict_threshold must be a non-negative number, got {}",
        self.convict_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.same_datacenter_probability) {
      return Err(GossipError::InvalidSetting(format!(
        "same_datacenter_probability must be within [0, 1], got {}",
        self.same_datacenter_probability
      )));
    }
    Ok(())
  }

  pub fn detector_config(&self) -> DetectorConfig {
    DetectorConfig {
      window_size: self.window_size,
      minimum_samples: self.minimum_samples,
      distribution: self.distribution,
    }
  }
}

mod millis {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
  }
}

#[test]
fn test_settings_from_toml() {
  let settings = GossipSettings::from_toml(
    r#"
      gossip_interval = 100
      window_size = 1000
      minimum_samples = 1
      convict_threshold = 1.6
      distribution = "exponential"
      active_gossip = "datacenter_rack_aware"
      serializer = "cbor"
    "#,
  )
  .unwrap();
  assert_eq!(settings.gossip_interval, Duration::from_millis(100));
  assert_eq!(settings.window_size, 1000);
  assert_eq!(settings.minimum_samples, 1);
  assert_eq!(settings.distribution, Distribution::Exponential);
  assert_eq!(settings.active_gossip, ActiveGossipStrategy::DatacenterRackAware);
  assert_eq!(settings.serializer, Serializer::Cbor);
  assert_eq!(settings.cleanup_interval, Duration::from_millis(5000));
  assert!((settings.convict_threshold - 1.6).abs() < f64::EPSILON);
}

#[test]
fn test_settings_rejects_bad_values() {
  assert!(GossipSettings::from_toml("distribution = \"gaussian\"").is_err());
  assert!(GossipSettings::from_toml("window_size = 0").is_err());
  assert!(GossipSettings::from_toml("gossip_interval = 0").is_err());
  assert!(GossipSettings::from_toml("convict_threshold = -1.0").is_err());
  assert!(GossipSettings::from_toml("active_gossip = \"reflection\"").is_err());
  assert!(GossipSettings::default().validate().is_ok());
}
