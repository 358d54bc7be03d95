use crate::cluster::{DataStore, PerNodeSnapshot, SharedSnapshot};
use crate::core::{GossipError, Member, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

fn file_name(dir: &Path, kind: &str, cluster: &str, id: &str, serializer: Serializer) -> PathBuf {
  dir.join(format!("{}.{}.{}.{}", kind, cluster, id, serializer.extension()))
}

/// A missing file reads as `T::default()`. Any other failure is logged and reads the same way.
fn read_or_default<T: DeserializeOwned + Default>(path: &Path, serializer: Serializer) -> T {
  let bytes = match fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
    Err(e) => {
      error!("could not read {}: {}", path.display(), e);
      return T::default();
    }
  };
  match serializer.from_slice(&bytes) {
    Ok(item) => item,
    Err(e) => {
      error!("could not decode {}: {}", path.display(), e);
      T::default()
    }
  }
}

/// Writes next to `path` first and renames over it, so readers never see half a file.
fn write<T: Serialize>(path: &Path, serializer: Serializer, item: &T) -> Result<(), GossipError> {
  let bytes = serializer.to_vec(item)?;
  if let Some(dir) = path.parent() {
    fs::create_dir_all(dir)?;
  }
  let tmp = path.with_extension("tmp");
  fs::write(&tmp, bytes)?;
  fs::rename(&tmp, path)?;
  debug!("wrote {}", path.display());
  Ok(())
}

fn write_logged<T: Serialize>(path: &Path, serializer: Serializer, item: &T) {
  if let Err(e) = write(path, serializer, item) {
    error!("could not write {}: {}", path.display(), e);
  }
}

/// Remembers which members we knew about, so a restarted member can find its way back into the
/// cluster without seeds.
pub struct RingStatePersister {
  path: PathBuf,
  serializer: Serializer,
}
impl RingStatePersister {
  pub fn new<P: AsRef<Path>>(
    dir: P,
    cluster: &str,
    id: &str,
    serializer: Serializer,
  ) -> RingStatePersister {
    RingStatePersister {
      path: file_name(dir.as_ref(), "ringstate", cluster, id, serializer),
      serializer: serializer,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn load(&self) -> Vec<Member> {
    read_or_default(&self.path, self.serializer)
  }

  pub fn save(&self, members: &[Member]) {
    write_logged(&self.path, self.serializer, &members)
  }
}

pub struct UserDataPersister {
  per_node_path: PathBuf,
  shared_path: PathBuf,
  serializer: Serializer,
}
impl UserDataPersister {
  pub fn new<P: AsRef<Path>>(
    dir: P,
    cluster: &str,
    id: &str,
    serializer: Serializer,
  ) -> UserDataPersister {
    let dir = dir.as_ref();
    UserDataPersister {
      per_node_path: file_name(dir, "pernodedata", cluster, id, serializer),
      shared_path: file_name(dir, "shareddata", cluster, id, serializer),
      serializer: serializer,
    }
  }

  pub fn load_per_node(&self) -> PerNodeSnapshot {
    read_or_default(&self.per_node_path, self.serializer)
  }

  pub fn load_shared(&self) -> SharedSnapshot {
    read_or_default(&self.shared_path, self.serializer)
  }

  pub fn save(&self, data: &DataStore) {
    write_logged(&self.per_node_path, self.serializer, &data.per_node_snapshot());
    write_logged(&self.shared_path, self.serializer, &data.shared_snapshot());
  }
}

#[cfg(test)]
use crate::core::Socket;
#[cfg(test)]
use crate::model::{PerNodeDataMessage, SharedDataMessage};

#[cfg(test)]
fn temp_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("gossamer-{}-{}", name, uuid::Uuid::new_v4()));
  fs::create_dir_all(&dir).unwrap();
  dir
}

#[test]
fn test_ring_state_round_trip() {
  let dir = temp_dir("ring");
  for serializer in [Serializer::Json, Serializer::Cbor] {
    let persister = RingStatePersister::new(&dir, "c", "me", serializer);
    assert!(persister.load().is_empty());
    let members = vec![
      Member::new("c", "a", Socket::localhost(1)).with_heartbeat(5),
      Member::new("c", "b", Socket::localhost(2)).with_property("datacenter", "east"),
    ];
    persister.save(&members);
    assert!(persister.path().ends_with(format!("ringstate.c.me.{}", serializer.extension())));
    let loaded = persister.load();
    assert_eq!(loaded, members);
    assert_eq!(loaded[0].heartbeat, 5);
    assert_eq!(loaded[1].property("datacenter"), Some("east"));
  }
  fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_user_data_round_trip() {
  let dir = temp_dir("data");
  let persister = UserDataPersister::new(&dir, "c", "me", Serializer::Json);
  assert!(persister.load_per_node().is_empty());
  assert!(persister.load_shared().is_empty());
  let data = DataStore::new();
  data.merge_per_node(PerNodeDataMessage::new("a", "k", vec![1], 3));
  data.merge_shared(SharedDataMessage::new("s", vec![2], 4));
  persister.save(&data);
  let restored = DataStore::new();
  restored.restore(persister.load_per_node(), persister.load_shared());
  assert_eq!(restored.per_node("a", "k").unwrap().payload, vec![1]);
  assert_eq!(restored.shared("s").unwrap().timestamp, 4);
  fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_corrupt_file_reads_empty() {
  let dir = temp_dir("corrupt");
  let persister = RingStatePersister::new(&dir, "c", "me", Serializer::Json);
  fs::write(persister.path(), b"{ not json").unwrap();
  assert!(persister.load().is_empty());
  fs::remove_dir_all(&dir).unwrap();
}
