mod common;

use common::{dead_ids, eventually, live_ids, member, node, settings};
use gossamer::cluster::ClusterEvent;
use gossamer::core::{now_millis, Distribution, MemberState, Socket};
use gossamer::model::{PerNodeDataMessage, SharedDataMessage};
use gossamer::testkit::{FailureConfig, FailureConfigMap, LoopbackNetwork};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

const LIMIT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cluster_converges_from_one_seed() {
  let network = LoopbackNetwork::reliable();
  let ids = ["a", "b", "c", "d"];
  let nodes = ids
    .iter()
    .enumerate()
    .map(|(i, id)| {
      let seeds = if i == 0 { vec![] } else { vec![member("a", 3000)] };
      node(&network, id, 3000 + i as u16, settings(), seeds)
    })
    .collect::<Vec<_>>();
  nodes.iter().for_each(|n| n.start());

  eventually(LIMIT, "convergence", || {
    nodes.iter().zip(ids.iter()).all(|(n, id)| {
      let others = ids.iter().filter(|x| *x != id).map(|x| x.to_string()).collect::<Vec<_>>();
      live_ids(n) == others
    })
  })
  .await;

  nodes[3].gossip_shared_data(SharedDataMessage::new("motd", b"hello".to_vec(), 1));
  nodes[2].gossip_per_node_data(PerNodeDataMessage::new("", "load", vec![42], 1));
  eventually(LIMIT, "data to spread", || {
    nodes.iter().all(|n| {
      n.find_shared_data("motd").map(|m| m.payload) == Some(b"hello".to_vec())
        && n.find_per_node_data("c", "load").map(|m| m.payload) == Some(vec![42])
    })
  })
  .await;

  for n in &nodes {
    n.shutdown().await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_propagates_and_stale_gossip_cannot_revive() {
  let network = LoopbackNetwork::reliable();
  let a = node(&network, "a", 3100, settings(), vec![]);
  let b = node(&network, "b", 3101, settings(), vec![member("a", 3100)]);
  let c = node(&network, "c", 3102, settings(), vec![member("a", 3100)]);
  let mut events = a.subscribe();
  for n in [&a, &b, &c] {
    n.start();
  }
  eventually(LIMIT, "convergence", || {
    live_ids(&a) == ["b", "c"] && live_ids(&b) == ["a", "c"] && live_ids(&c) == ["a", "b"]
  })
  .await;

  let before = a.core().registry().get("c").unwrap();
  c.shutdown().await;
  eventually(LIMIT, "c to be dead everywhere", || {
    dead_ids(&a) == ["c"] && dead_ids(&b) == ["c"]
  })
  .await;
  let mut downed = false;
  loop {
    match events.try_recv() {
      Ok(ClusterEvent::Downed(m)) => downed |= m.id == "c",
      Ok(_) | Err(TryRecvError::Lagged(_)) => {}
      Err(_) => break,
    }
  }
  assert!(downed);

  a.core().merge_members(&[before]);
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(a.core().registry().state("c"), Some(MemberState::Dead));
  assert_eq!(b.core().registry().state("c"), Some(MemberState::Dead));

  // A new instance on the same address outruns the recorded shutdown.
  let c = node(&network, "c", 3102, settings(), vec![member("a", 3100)]);
  c.start();
  eventually(LIMIT, "c to come back", || {
    live_ids(&a) == ["b", "c"] && live_ids(&b) == ["a", "c"]
  })
  .await;

  for n in [&a, &b, &c] {
    n.shutdown().await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_member_is_convicted() {
  let network = LoopbackNetwork::reliable();
  let a = node(&network, "a", 3200, settings(), vec![]);
  let b = node(&network, "b", 3201, settings(), vec![member("a", 3200)]);
  a.start();
  b.start();
  eventually(LIMIT, "convergence", || live_ids(&a) == ["b"] && live_ids(&b) == ["a"]).await;
  eventually(LIMIT, "enough heartbeats", || {
    a.core().registry().phi("b", now_millis()).is_some()
  })
  .await;

  // Silence b without a shutdown message: it stops hearing a, forgets it, and stops gossiping.
  network.disconnect(&Socket::localhost(3201));
  tokio::time::sleep(Duration::from_millis(100)).await;
  b.core().registry().forget("a");
  b.shutdown().await;
  eventually(LIMIT, "b to be convicted", || dead_ids(&a) == ["b"]).await;
  a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unresponsive_peer_does_not_take_others_down() {
  // c hears nothing, so digests sent to c are never answered. c still gossips outwards.
  let mut failures = FailureConfigMap::default();
  failures.node_wide.insert(Socket::localhost(3302), FailureConfig::dropping(1.0));
  let network = LoopbackNetwork::new(failures);
  let mut s = settings();
  s.distribution = Distribution::Exponential;
  s.response_timeout = Duration::from_secs(1);
  let a = node(&network, "a", 3300, s.clone(), vec![]);
  let b = node(&network, "b", 3301, s.clone(), vec![member("a", 3300)]);
  let c = node(&network, "c", 3302, s, vec![member("a", 3300)]);
  for n in [&a, &b, &c] {
    n.start();
  }
  eventually(LIMIT, "a and b to see everyone", || {
    live_ids(&a) == ["b", "c"] && live_ids(&b) == ["a", "c"]
  })
  .await;
  eventually(LIMIT, "enough heartbeats", || {
    let now = now_millis();
    ["b", "c"].iter().all(|id| a.core().registry().phi(id, now).is_some())
      && ["a", "c"].iter().all(|id| b.core().registry().phi(id, now).is_some())
  })
  .await;

  let mut events = vec![a.subscribe(), b.subscribe()];
  tokio::time::sleep(Duration::from_millis(1500)).await;
  let mut downed = Vec::new();
  for rx in events.iter_mut() {
    loop {
      match rx.try_recv() {
        Ok(ClusterEvent::Downed(m)) => downed.push(m.id),
        Ok(_) | Err(TryRecvError::Lagged(_)) => {}
        Err(_) => break,
      }
    }
  }
  assert!(downed.is_empty(), "falsely convicted: {:?}", downed);
  assert_eq!(live_ids(&a), ["b", "c"]);
  assert_eq!(live_ids(&b), ["a", "c"]);

  for n in [&a, &b, &c] {
    n.shutdown().await;
  }
}
