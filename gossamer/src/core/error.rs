use thiserror::Error;

/// Everything that can go wrong while setting up or running a gossip member.
///
/// Only the setup variants (`NullHandlers`, `NullHandler`, `MissingField`, `InvalidSetting`,
/// `UnknownDistribution`, `UnknownStrategy`) are meant to be fatal. The rest come out of the
/// transport and persistence collaborators, and the gossip loops log them and carry on.
#[derive(Debug, Error)]
pub enum GossipError {
  #[error("handler list cannot be absent")]
  NullHandlers,
  #[error("found an absent handler at position {0}")]
  NullHandler(usize),
  #[error("`{0}` is required")]
  MissingField(&'static str),
  #[error("invalid setting: {0}")]
  InvalidSetting(String),
  #[error("unknown failure distribution `{0}`, expected `normal` or `exponential`")]
  UnknownDistribution(String),
  #[error("unknown active gossip strategy `{0}`, expected `simple` or `datacenter_rack_aware`")]
  UnknownStrategy(String),
  #[error("could not resolve `{0}` to a socket address")]
  Resolve(String),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Cbor(#[from] serde_cbor::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Toml(#[from] toml::de::Error),
  #[error("a {0} byte message does not fit in one datagram")]
  Oversized(usize),
  #[error("transport is closed")]
  Closed,
}
