//! Gossip-based cluster membership.
//!
//! Each member keeps its own view of which peers are alive, spreads that view by exchanging
//! digests with randomly chosen peers, and judges silence with a
//! [phi-accrual failure detector](cluster::FailureDetector). Inbound messages go through a
//! [typed handler pipeline](handlers) that applications can extend, and user data rides on the
//! same gossip under a per-message [replication policy](replication).
//!
//! Start with [`GossipManagerBuilder`](cluster::GossipManagerBuilder).

pub mod cluster;
pub mod core;
pub mod handlers;
pub mod model;
pub mod replication;
pub mod testkit;
pub mod transport;
extern crate gossamer_macros;

pub use gossamer_macros::GossipInterface;
