use gossamer::cluster::{ClusterEvent, GossipManager};
use gossamer::core::{GossipError, GossipSettings, Member, Serializer, Socket};
use gossamer::testkit::{init_logging, LogLevel};
use gossamer::transport::UdpTransport;
use std::env::{args, var};
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};

const USAGE: &str =
  "usage: gossip-node <settings.toml|-> <cluster> <id> <host:port> [seed-id@host:port ...]";

struct Args {
  settings: GossipSettings,
  cluster: String,
  id: String,
  socket: Socket,
  seeds: Vec<Member>,
}

fn parse_seed(cluster: &str, s: &str) -> Result<Member, GossipError> {
  let (id, socket) = s
    .split_once('@')
    .ok_or_else(|| GossipError::InvalidSetting(format!("seed `{}` is not id@host:port", s)))?;
  Ok(Member::new(cluster, id, socket.parse()?))
}

fn parse_args() -> Result<Args, GossipError> {
  let args = args().skip(1).collect::<Vec<_>>();
  if args.len() < 4 {
    return Err(GossipError::InvalidSetting(USAGE.to_string()));
  }
  let settings = match args[0].as_str() {
    "-" => GossipSettings::default(),
    path => GossipSettings::load(path)?,
  };
  let cluster = args[1].clone();
  let seeds = args[4..]
    .iter()
    .map(|s| parse_seed(&cluster, s))
    .collect::<Result<Vec<_>, _>>()?;
  Ok(Args {
    settings: settings,
    id: args[2].clone(),
    socket: args[3].parse()?,
    cluster: cluster,
    seeds: seeds,
  })
}

async fn run(args: Args) -> Result<(), GossipError> {
  let transport = UdpTransport::bind(args.socket.clone(), Serializer::Cbor).await?;
  let manager = GossipManager::builder()
    .cluster(args.cluster)
    .id(args.id)
    .socket(args.socket)
    .settings(args.settings)
    .seeds(args.seeds)
    .transport(Arc::new(transport))
    .build()?;
  let mut events = manager.subscribe();
  manager.start();
  loop {
    tokio::select! {
      signal = tokio::signal::ctrl_c() => {
        signal?;
        break;
      }
      event = events.recv() => match event {
        Ok(ClusterEvent::Added(m)) => info!("{} joined", m),
        Ok(ClusterEvent::Revived(m)) => info!("{} is back", m),
        Ok(ClusterEvent::Downed(m)) => info!("{} is down", m),
        Err(e) => info!("missed events: {}", e),
      },
    }
  }
  manager.shutdown().await;
  Ok(())
}

#[tokio::main]
async fn main() {
  let level = var("GOSSAMER_LOG")
    .ok()
    .and_then(|l| l.parse::<LogLevel>().ok())
    .unwrap_or(LogLevel::Info);
  init_logging(level);
  let args = match parse_args() {
    Ok(args) => args,
    Err(e) => {
      eprintln!("{}", e);
      exit(2);
    }
  };
  if let Err(e) = run(args).await {
    error!("{}", e);
    exit(1);
  }
}
