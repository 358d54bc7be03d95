//! The vocabulary every other module speaks: members and their addresses, settings, errors, the
//! wall clock and the serializer handed to persisters and transports.

mod clock;
mod error;
mod member;
mod remoting;
mod serial;
mod settings;

#[rustfmt::skip]
pub use {
  clock::now_millis,
  error::GossipError,
  member::DetectorConfig,
  member::Distribution,
  member::Member,
  member::MemberState,
  remoting::Host,
  remoting::Socket,
  serial::Serializer,
  settings::ActiveGossipStrategy,
  settings::GossipSettings,
};
