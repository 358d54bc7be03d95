use gossamer::cluster::GossipCore;
use gossamer::core::{GossipSettings, Member, Socket};
use gossamer::handlers::{
  default_handler, Case, ConcurrentHandler, Handler, MessageHandler, MessageKind, Typed,
};
use gossamer::model::{
  ActiveGossipMessage, ActiveGossipOk, PerNodeDataBulkMessage, PerNodeDataMessage,
  SharedDataBulkMessage, SharedDataMessage, ShutdownMessage,
};
use gossamer::testkit::LoopbackNetwork;
use gossamer::GossipInterface;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct Ping(u32);

#[derive(GossipInterface)]
enum AppMessage {
  #[gossip]
  Response(ActiveGossipOk),
  #[gossip]
  Shutdown(ShutdownMessage),
  #[gossip]
  PerNodeData(PerNodeDataMessage),
  #[gossip]
  SharedData(SharedDataMessage),
  #[gossip]
  ActiveGossip(ActiveGossipMessage),
  #[gossip]
  PerNodeDataBulk(PerNodeDataBulkMessage),
  #[gossip]
  SharedDataBulk(SharedDataBulkMessage),
  #[gossip]
  Ping(Ping),
  #[gossip(no_from)]
  Note(String),
  Tick,
}

fn core() -> GossipCore {
  let socket = Socket::localhost(3400);
  let transport = LoopbackNetwork::reliable().bind(socket.clone());
  GossipCore::new(Member::new("c", "me", socket), GossipSettings::default(), transport)
}

#[test]
fn derive_projects_variants() {
  let ping: AppMessage = Ping(7).into();
  assert_eq!(Case::<Ping>::project(&ping), Some(&Ping(7)));
  assert_eq!(Case::<String>::project(&ping), None);
  assert_eq!(ping.kind(), "Ping");

  let note = AppMessage::Note("hi".to_string());
  assert_eq!(Case::<String>::project(&note).map(|s| s.as_str()), Some("hi"));
  assert_eq!(note.kind(), "Note");
  assert_eq!(AppMessage::Tick.kind(), "Tick");
  assert!(Case::<Ping>::project(&AppMessage::Tick).is_none());
}

#[test]
fn application_union_runs_default_and_custom_handlers() {
  let core = core();
  let pings = Arc::new(AtomicUsize::new(0));
  let counter = pings.clone();
  let custom: Handler<AppMessage> = Arc::new(Typed::<Ping, _>::new(
    move |_: &GossipCore, p: &Ping| {
      counter.fetch_add(p.0 as usize, Ordering::SeqCst);
      true
    },
  ));
  let defaults: Handler<AppMessage> = Arc::new(default_handler::<AppMessage>());
  let handler = ConcurrentHandler::new(vec![defaults, custom]);

  assert!(handler.invoke(&core, &Ping(3).into()));
  assert_eq!(pings.load(Ordering::SeqCst), 3);
  assert!(handler.invoke(&core, &SharedDataMessage::new("k", vec![1], 1).into()));
  assert_eq!(core.data().shared("k").unwrap().payload, vec![1]);
  assert!(!handler.invoke(&core, &AppMessage::Tick));
  assert!(!handler.invoke(&core, &AppMessage::Note("nobody listens".to_string())));
}
