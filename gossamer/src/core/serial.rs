use crate::core::GossipError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The encoding used by a transport or persister. Each collaborator is handed its own value at
/// construction, nothing reaches for a shared instance.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
  Cbor,
  Json,
}
impl Serializer {
  pub fn to_vec<T: Serialize>(&self, item: &T) -> Result<Vec<u8>, GossipError> {
    match self {
      Serializer::Cbor => Ok(serde_cbor::to_vec(item)?),
      Serializer::Json => Ok(serde_json::to_vec(item)?),
    }
  }

  pub fn from_slice<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, GossipError> {
    match self {
      Serializer::Cbor => Ok(serde_cbor::from_slice(bytes)?),
      Serializer::Json => Ok(serde_json::from_slice(bytes)?),
    }
  }

  pub fn extension(&self) -> &'static str {
    match self {
      Serializer::Cbor => "cbor",
      Serializer::Json => "json",
    }
  }
}
impl Default for Serializer {
  fn default() -> Self {
    Serializer::Json
  }
}
