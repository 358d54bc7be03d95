//! Everything that travels between members.

mod messages;

#[rustfmt::skip]
pub use {
  messages::ActiveGossipMessage,
  messages::ActiveGossipOk,
  messages::GossipMessage,
  messages::PerNodeDataBulkMessage,
  messages::PerNodeDataMessage,
  messages::SharedDataBulkMessage,
  messages::SharedDataMessage,
  messages::ShutdownMessage,
  messages::NEVER_EXPIRES,
  messages::SHUTDOWN_KEY,
};
