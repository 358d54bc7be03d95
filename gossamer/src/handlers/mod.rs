//! Routes inbound messages to the code that understands them.
//!
//! A message union (any enum deriving [`GossipInterface`](crate::GossipInterface)) is handed to a
//! [`MessageHandler`], which returns whether it did something with it. [`Typed`] narrows a
//! handler to one variant of the union, and [`ConcurrentHandler`] broadcasts a message to several
//! handlers at once. Composites nest freely. [`default_handler`] is the composite a
//! [`GossipManager`](crate::cluster::GossipManager) runs unless it is given another.

mod defaults;

use crate::cluster::GossipCore;
use crate::core::GossipError;
use std::marker::PhantomData;
use std::sync::Arc;

#[rustfmt::skip]
pub use {
  defaults::default_handler,
  defaults::ActiveGossipMessageHandler,
  defaults::PerNodeDataBulkMessageHandler,
  defaults::PerNodeDataMessageHandler,
  defaults::ResponseHandler,
  defaults::SharedDataBulkMessageHandler,
  defaults::SharedDataMessageHandler,
  defaults::ShutdownMessageHandler,
};

pub(crate) use defaults::recorded_shutdowns;

/// Picks the `T` out of a union, if that is the variant it holds. Generated by the
/// `GossipInterface` derive.
pub trait Case<T> {
  fn project(&self) -> Option<&T>;
}

/// The name of the variant a union holds, for logging.
pub trait MessageKind {
  fn kind(&self) -> &'static str;
}

pub trait MessageHandler<M>: Send + Sync {
  /// Returns true if the message was handled.
  fn invoke(&self, core: &GossipCore, msg: &M) -> bool;
}
impl<M, F> MessageHandler<M> for F
where
  F: Fn(&GossipCore, &M) -> bool + Send + Sync,
{
  fn invoke(&self, core: &GossipCore, msg: &M) -> bool {
    self(core, msg)
  }
}

pub type Handler<M> = Arc<dyn MessageHandler<M>>;

/// Runs the inner handler only for the `T` variant of a union. Any other variant is not handled
/// and the inner handler never sees it.
pub struct Typed<T, H> {
  handler: H,
  _variant: PhantomData<fn(&T)>,
}
impl<T, H: MessageHandler<T>> Typed<T, H> {
  pub fn new(handler: H) -> Typed<T, H> {
    Typed {
      handler: handler,
      _variant: PhantomData,
    }
  }
}
impl<M, T, H> MessageHandler<M> for Typed<T, H>
where
  M: Case<T>,
  H: MessageHandler<T>,
{
  fn invoke(&self, core: &GossipCore, msg: &M) -> bool {
    match msg.project() {
      Some(item) => self.handler.invoke(core, item),
      None => false,
    }
  }
}

/// Hands every message to all of its children, in order, and reports it handled if any child
/// did.
pub struct ConcurrentHandler<M> {
  handlers: Vec<Handler<M>>,
}
impl<M> ConcurrentHandler<M> {
  pub fn new(handlers: Vec<Handler<M>>) -> ConcurrentHandler<M> {
    ConcurrentHandler { handlers: handlers }
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }
}
impl<M> MessageHandler<M> for ConcurrentHandler<M> {
  fn invoke(&self, core: &GossipCore, msg: &M) -> bool {
    self.handlers.iter().filter(|h| h.invoke(core, msg)).count() > 0
  }
}

/// Builds a [`ConcurrentHandler`] from a list that may be missing or have holes, failing on
/// either.
pub fn concurrent_handler<M: 'static>(
  handlers: Option<Vec<Option<Handler<M>>>>,
) -> Result<Handler<M>, GossipError> {
  let handlers = handlers.ok_or(GossipError::NullHandlers)?;
  let mut children = Vec::with_capacity(handlers.len());
  for (i, handler) in handlers.into_iter().enumerate() {
    children.push(handler.ok_or(GossipError::NullHandler(i))?);
  }
  Ok(Arc::new(ConcurrentHandler::new(children)))
}

#[cfg(test)]
use crate as gossamer;
#[cfg(test)]
use crate::core::{GossipSettings, Member, Socket};
#[cfg(test)]
use crate::testkit::LoopbackNetwork;
#[cfg(test)]
use crate::GossipInterface;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(test)]
#[derive(Debug)]
struct FakeMessage;

#[cfg(test)]
#[derive(Debug)]
struct FakeMessageData(usize);

#[cfg(test)]
#[derive(GossipInterface)]
enum TestMessage {
  #[gossip]
  Fake(FakeMessage),
  #[gossip]
  Data(FakeMessageData),
  Other,
}

#[cfg(test)]
fn core() -> GossipCore {
  let socket = Socket::localhost(6000);
  let transport = LoopbackNetwork::reliable().bind(socket.clone());
  GossipCore::new(Member::new("c", "me", socket), GossipSettings::default(), transport)
}

#[cfg(test)]
fn counting(count: &Arc<AtomicUsize>) -> Handler<TestMessage> {
  let count = count.clone();
  Arc::new(Typed::<FakeMessage, _>::new(move |_: &GossipCore, _: &FakeMessage| {
    count.fetch_add(1, Ordering::SeqCst);
    true
  }))
}

#[test]
fn test_typed_handler_ignores_other_variants() {
  let core = core();
  let count = Arc::new(AtomicUsize::new(0));
  let handler = counting(&count);
  assert!(handler.invoke(&core, &TestMessage::Fake(FakeMessage)));
  assert_eq!(count.load(Ordering::SeqCst), 1);
  assert!(!handler.invoke(&core, &TestMessage::Other));
  assert!(!handler.invoke(&core, &TestMessage::Data(FakeMessageData(3))));
  assert_eq!(count.load(Ordering::SeqCst), 1);
  assert!(handler.invoke(&core, &FakeMessage.into()));
  assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_concurrent_handler_broadcasts() {
  let core = core();
  let never: Handler<TestMessage> = Arc::new(|_: &GossipCore, _: &TestMessage| false);
  let handler = concurrent_handler(Some(vec![Some(never)])).unwrap();
  assert!(!handler.invoke(&core, &TestMessage::Fake(FakeMessage)));

  let count = Arc::new(AtomicUsize::new(0));
  let handler =
    concurrent_handler(Some(vec![Some(counting(&count)), Some(counting(&count))])).unwrap();
  assert!(handler.invoke(&core, &TestMessage::Fake(FakeMessage)));
  assert!(!handler.invoke(&core, &TestMessage::Other));
  assert_eq!(count.load(Ordering::SeqCst), 2);

  let handler = concurrent_handler(Some(vec![Some(handler), Some(counting(&count))])).unwrap();
  assert!(handler.invoke(&core, &TestMessage::Fake(FakeMessage)));
  assert_eq!(count.load(Ordering::SeqCst), 5);
}

#[test]
fn test_concurrent_handler_two_levels() {
  let core = core();
  let count = Arc::new(AtomicUsize::new(0));
  let left: Handler<TestMessage> =
    Arc::new(ConcurrentHandler::new(vec![counting(&count), counting(&count)]));
  let right: Handler<TestMessage> =
    Arc::new(ConcurrentHandler::new(vec![counting(&count), counting(&count)]));
  let both = ConcurrentHandler::new(vec![left, right]);
  assert!(both.invoke(&core, &TestMessage::Fake(FakeMessage)));
  assert_eq!(count.load(Ordering::SeqCst), 4);
}

#[test]
fn test_concurrent_handler_ships_data() {
  let core = core();
  let seen = Arc::new(AtomicUsize::new(0));
  let inner = seen.clone();
  let data: Handler<TestMessage> =
    Arc::new(Typed::<FakeMessageData, _>::new(move |_: &GossipCore, d: &FakeMessageData| {
      inner.store(d.0, Ordering::SeqCst);
      true
    }));
  let empty = concurrent_handler::<TestMessage>(Some(vec![])).unwrap();
  let handler = concurrent_handler(Some(vec![Some(empty), Some(data)])).unwrap();
  assert!(handler.invoke(&core, &TestMessage::Data(FakeMessageData(101))));
  assert_eq!(seen.load(Ordering::SeqCst), 101);
}

#[test]
fn test_concurrent_handler_rejects_missing() {
  let count = Arc::new(AtomicUsize::new(0));
  match concurrent_handler::<TestMessage>(None) {
    Err(GossipError::NullHandlers) => {}
    _ => panic!("expected NullHandlers"),
  }
  let handlers = vec![Some(counting(&count)), None, Some(counting(&count))];
  match concurrent_handler(Some(handlers)) {
    Err(GossipError::NullHandler(1)) => {}
    _ => panic!("expected NullHandler(1)"),
  }
}
