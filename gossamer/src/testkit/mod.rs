//! Helpers for running several members inside one process: an in-memory network that can drop
//! and delay messages, and a one-call logging setup.

mod failure_config;
mod logging;
mod loopback;

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  logging::init_logging,
  logging::LogLevel,
  loopback::LoopbackNetwork,
  loopback::LoopbackTransport,
};
