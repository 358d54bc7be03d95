//! Membership of a gossip cluster.
//!
//! Every member keeps its own view of who else is in the cluster, and that view spreads by
//! gossip: on each round a member picks a few peers, sends them a digest of the members it
//! believes alive, and merges whatever they answer with. Nothing coordinates the rounds. Views
//! converge because heartbeats only move forward and the larger heartbeat always wins.
//!
//! ### Failure Detection
//! A member never pings another one directly. Instead, each time gossip shows that a peer's
//! heartbeat has advanced, the arrival time is recorded in that peer's [`FailureDetector`]. The
//! gaps between arrivals form a distribution (normal by default, exponential if configured), and
//! the time since the latest arrival is scored against it as
//! [phi](https://doi.org/10.1109/RELDIS.2004.1353004), `-log10(1 - CDF(elapsed))`. Once phi
//! reaches the convict threshold the peer is marked dead. A dead peer comes back as soon as
//! gossip carries a heartbeat newer than the one it died with.
//!
//! ### Shutting Down
//! A member that leaves on purpose tells its live peers with a
//! [`ShutdownMessage`](crate::model::ShutdownMessage), and records the shutdown as per-node data
//! so peers that missed the message still hear of it by gossip. Peers raise its known heartbeat
//! to the shutdown time, so stale gossip cannot bring it back.
//!
//! ### Using [`cluster`](crate::cluster)
//! Build a [`GossipManager`] with a [`GossipManagerBuilder`], start it, and subscribe to it for
//! [`ClusterEvent`]s. User data is spread with the same rounds, see
//! [`GossipManager::gossip_per_node_data`] and [`GossipManager::gossip_shared_data`].

mod active_gossiper;
mod data;
mod failure_detector;
mod gossip_core;
mod manager;
mod persistence;
mod registry;

#[rustfmt::skip]
pub use {
  active_gossiper::gossip_round,
  active_gossiper::ActiveGossiper,
  data::DataStore,
  data::PerNodeSnapshot,
  data::SharedSnapshot,
  failure_detector::FailureDetector,
  gossip_core::GossipCore,
  manager::GossipManager,
  manager::GossipManagerBuilder,
  persistence::RingStatePersister,
  persistence::UserDataPersister,
  registry::ClusterEvent,
  registry::MemberRegistry,
};
