use crate::cluster::{ActiveGossiper, GossipCore};
use crate::core::GossipError;
use crate::handlers::{Handler, MessageKind};
use crate::model::GossipMessage;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Owns the receive loop and the active gossiper of one member.
///
/// Each inbound message is dispatched to the handler chain on its own task, so a slow handler
/// never holds up the socket. Shutdown stops receiving first, then gives dispatches still in
/// flight `shutdown_grace` to finish before aborting them.
pub struct TransportManager {
  core: Arc<GossipCore>,
  handler: Handler<GossipMessage>,
  gossiper: ActiveGossiper,
  inbound: Arc<Mutex<JoinSet<()>>>,
  receiver: Mutex<Option<JoinHandle<()>>>,
  stop: watch::Sender<bool>,
}
impl TransportManager {
  pub fn new(core: Arc<GossipCore>, handler: Handler<GossipMessage>) -> TransportManager {
    let (stop, _) = watch::channel(false);
    TransportManager {
      gossiper: ActiveGossiper::new(core.clone()),
      core: core,
      handler: handler,
      inbound: Arc::new(Mutex::new(JoinSet::new())),
      receiver: Mutex::new(None),
      stop: stop,
    }
  }

  pub fn gossiper(&self) -> &ActiveGossiper {
    &self.gossiper
  }

  /// Starts receiving. Calling it twice does nothing.
  pub fn start_endpoint(&self) {
    let mut receiver = self.receiver.lock();
    if receiver.is_some() {
      return;
    }
    let core = self.core.clone();
    let handler = self.handler.clone();
    let inbound = self.inbound.clone();
    let mut stop = self.stop.subscribe();
    info!("{}: listening on {}", core.id(), core.transport().local());
    *receiver = Some(tokio::spawn(async move {
      loop {
        let received = tokio::select! {
          _ = stop.changed() => break,
          r = core.transport().recv() => r,
        };
        let msg = match received {
          Ok(msg) => msg,
          Err(GossipError::Closed) => break,
          Err(e) => {
            warn!("{}: receive failed: {}", core.id(), e);
            continue;
          }
        };
        let core = core.clone();
        let handler = handler.clone();
        let mut tasks = inbound.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
          if !handler.invoke(&core, &msg) {
            debug!("{}: nothing handled {} {}", core.id(), msg.kind(), msg.key());
          }
        });
      }
      debug!("{}: endpoint stopped", core.id());
    }));
  }

  pub fn start_active_gossiper(&self) {
    self.gossiper.start();
  }

  pub async fn shutdown(&self) {
    let _ = self.stop.send(true);
    let receiver = self.receiver.lock().take();
    if let Some(receiver) = receiver {
      if let Err(e) = receiver.await {
        warn!("{}: endpoint ended badly: {}", self.core.id(), e);
      }
    }
    self.gossiper.shutdown().await;
    let mut inbound = mem::replace(&mut *self.inbound.lock(), JoinSet::new());
    let grace = self.core.settings().shutdown_grace;
    let drained = timeout(grace, async {
      while inbound.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
      warn!(
        "{}: {} dispatches still running after {:?}, aborting them",
        self.core.id(),
        inbound.len(),
        grace
      );
      inbound.abort_all();
    }
  }
}

#[cfg(test)]
use crate::core::{GossipSettings, Member, Socket};
#[cfg(test)]
use crate::handlers::default_handler;
#[cfg(test)]
use crate::model::SharedDataMessage;
#[cfg(test)]
use crate::testkit::LoopbackNetwork;
#[cfg(test)]
use crate::transport::Transport;
#[cfg(test)]
use std::time::Duration;

#[tokio::test]
async fn test_endpoint_dispatches_to_handler() {
  let network = LoopbackNetwork::reliable();
  let socket = Socket::localhost(5100);
  let core = Arc::new(GossipCore::new(
    Member::new("c", "me", socket.clone()),
    GossipSettings::default(),
    network.bind(socket.clone()),
  ));
  let handler = Arc::new(default_handler::<GossipMessage>());
  let manager = TransportManager::new(core.clone(), handler);
  manager.start_endpoint();
  let other = network.bind(Socket::localhost(5101));
  let msg: GossipMessage = SharedDataMessage::new("k", vec![4], 1).into();
  other.send(&socket, &msg).await.unwrap();
  for _ in 0..100 {
    if core.data().shared("k").is_some() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert_eq!(core.data().shared("k").unwrap().payload, vec![4]);
  manager.shutdown().await;
}
