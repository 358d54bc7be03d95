use gossamer::core::{ActiveGossipStrategy, Distribution, GossipError, GossipSettings};
use std::fs;
use std::time::Duration;

#[test]
fn load_settings_from_file() {
  let path = std::env::temp_dir().join(format!("gossamer-{}.toml", uuid::Uuid::new_v4()));
  fs::write(
    &path,
    r#"
      gossip_interval = 50
      response_timeout = 500
      convict_threshold = 8.0
      distribution = "normal"
      active_gossip = "simple"
      gossip_disperse = 3
      exclude_last_sender = true
      persist_ring_state = true
      path_to_ring_state = "/var/lib/gossamer"
    "#,
  )
  .unwrap();
  let settings = GossipSettings::load(&path).unwrap();
  fs::remove_file(&path).unwrap();
  assert_eq!(settings.gossip_interval, Duration::from_millis(50));
  assert_eq!(settings.response_timeout, Duration::from_millis(500));
  assert_eq!(settings.distribution, Distribution::Normal);
  assert_eq!(settings.active_gossip, ActiveGossipStrategy::Simple);
  assert_eq!(settings.gossip_disperse, 3);
  assert!(settings.exclude_last_sender);
  assert!(settings.persist_ring_state);
  assert!(!settings.persist_data_state);
  assert_eq!(settings.path_to_ring_state.to_str(), Some("/var/lib/gossamer"));
  assert_eq!(settings.detector_config().window_size, 5000);
}

#[test]
fn settings_errors() {
  match GossipSettings::load("/definitely/not/here.toml") {
    Err(GossipError::Io(_)) => {}
    other => panic!("expected an io error, got {:?}", other.map(|_| ())),
  }
  match GossipSettings::from_toml("gossip_disperse = \"many\"") {
    Err(GossipError::Toml(_)) => {}
    other => panic!("expected a toml error, got {:?}", other.map(|_| ())),
  }
  match GossipSettings::from_toml("same_datacenter_probability = 1.5") {
    Err(GossipError::InvalidSetting(_)) => {}
    other => panic!("expected an invalid setting, got {:?}", other.map(|_| ())),
  }
  match "gaussian".parse::<Distribution>() {
    Err(GossipError::UnknownDistribution(name)) => assert_eq!(name, "gaussian"),
    other => panic!("expected an unknown distribution, got {:?}", other),
  }
  match "gossipy".parse::<ActiveGossipStrategy>() {
    Err(GossipError::UnknownStrategy(name)) => assert_eq!(name, "gossipy"),
    other => panic!("expected an unknown strategy, got {:?}", other),
  }
}
