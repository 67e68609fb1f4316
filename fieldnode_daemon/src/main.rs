mod bridge;
mod feature;
mod host;

use anyhow::Context;
use bridge::{BridgeServer, BridgedRequest};
use clap::Parser;
use feature::Heartbeat;
use fieldnode_core::platform::fs::FsStorage;
use fieldnode_core::platform::sim::LoopbackBus;
use fieldnode_core::platform::SystemClock;
use fieldnode_core::{FirmwareInfo, NodeConfig, NodeRuntime, NodeStatus, Platform};
use host::{HostLink, HostSystem};
use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pause between two runtime iterations
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// The only bus server this host build can reach
const LOOPBACK_BROKER: &str = "loopback";

#[derive(Parser, Debug, Clone)]
#[command(name = "fieldnode_daemon")]
#[command(about = "Run a field node on this host", version)]
struct Args {
    /// Directory holding the node's documents
    #[arg(long, default_value = "./fieldnode-data")]
    data_dir: PathBuf,

    /// Address of the configuration portal
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Node name used until one is stored
    #[arg(long, default_value = "node")]
    node_name: String,

    /// Hardware id as 12 hex digits; derived from the host name when absent
    #[arg(long)]
    hardware_id: Option<String>,

    /// Bus server used until one is stored. Only the in-process broker
    /// `loopback` is supported; it ignores host and port, so a server set in
    /// the portal only decides whether the node connects at all.
    #[arg(long, default_value = LOOPBACK_BROKER, value_parser = parse_broker)]
    broker: String,

    /// Seconds between heartbeat messages
    #[arg(long, default_value_t = 60)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldnode_daemon=debug,fieldnode_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let hardware_id = match &args.hardware_id {
        Some(text) => host::parse_hardware_id(text)
            .with_context(|| format!("invalid hardware id '{}'", text))?,
        None => {
            let hostname = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "fieldnode".to_string());
            host::derived_hardware_id(&hostname)
        }
    };

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating {}", args.data_dir.display()))?;

    let (portal, incoming) = bridge::channel();
    let shutdown = Arc::new(AtomicBool::new(false));

    let node_thread = {
        let args = args.clone();
        let shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name("fieldnode-runtime".to_string())
            .spawn(move || run_node(&args, hardware_id, incoming, &shutdown))?
    };

    let app = bridge::router(portal);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!("configuration portal listening on {}", args.listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
        }
        tracing::info!("shutting down");
    })
    .await?;

    shutdown.store(true, Ordering::Relaxed);
    match tokio::task::spawn_blocking(move || node_thread.join()).await? {
        Ok(result) => result,
        Err(_) => anyhow::bail!("runtime thread panicked"),
    }
}

fn parse_broker(value: &str) -> Result<String, String> {
    if value == LOOPBACK_BROKER {
        Ok(value.to_string())
    } else {
        Err(format!(
            "only the in-process '{}' broker is supported",
            LOOPBACK_BROKER
        ))
    }
}

/// Run the node until shutdown, rebuilding it after every restart
fn run_node(
    args: &Args,
    hardware_id: [u8; 6],
    incoming: mpsc::UnboundedReceiver<BridgedRequest>,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let incoming = Rc::new(RefCell::new(incoming));
    // survives restarts like an external broker would
    let bus = LoopbackBus::new();
    let addr = args.listen.ip();
    let mut boots = 0u32;

    while !shutdown.load(Ordering::Relaxed) {
        boots += 1;

        let platform = Platform {
            clock: Rc::new(SystemClock::new()),
            link: Box::new(HostLink::open(&args.data_dir, addr)?),
            bus: Box::new(bus.clone()),
            storage: Box::new(FsStorage::new(&args.data_dir)?),
            portal: Box::new(BridgeServer::new(incoming.clone())),
            system: Box::new(HostSystem::new(hardware_id, &args.data_dir)),
        };

        let mut defaults = NodeConfig::new(&args.node_name);
        defaults.bus.server = args.broker.clone();

        let mut node = NodeRuntime::new(
            FirmwareInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            defaults,
            platform,
        );
        node.add_feature(Box::new(Heartbeat::new(Duration::from_secs(
            args.heartbeat_secs,
        ))));

        tracing::info!(boots, "starting node");
        node.setup();
        let server = &node.config().bus.server;
        if !server.is_empty() && server != LOOPBACK_BROKER {
            tracing::warn!(
                server = %server,
                "bus server is not reachable from this host build, using the in-process broker"
            );
        }

        let status = loop {
            let status = node.tick();
            if !status.is_running() || shutdown.load(Ordering::Relaxed) {
                break status;
            }
            std::thread::sleep(TICK_INTERVAL);
        };

        match status {
            NodeStatus::RestartRequested(reason) => {
                tracing::info!(%reason, "node restarting");
            }
            NodeStatus::Running => {
                tracing::info!(unique_name = node.unique_name(), "node stopped");
            }
        }
    }

    Ok(())
}
