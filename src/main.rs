use clap::Parser;
use log::{error, info};
use simplegs::config::{Args, ServerConfig};
use simplegs::dispatcher::Dispatcher;
use simplegs::downstream::HttpDownstream;
use simplegs::lifecycle::{HttpSidecar, LifecycleController};
use simplegs::registry::SessionRegistry;
use simplegs::transport::{LoopExit, UdpServer};
use std::sync::Arc;

/// Wires the process together: configuration, downstream clients, the
/// lifecycle controller, and the UDP transport loop. Readiness is
/// signaled only after the socket is bound, and the process exits when
/// the environment delivers a termination signal.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::resolve(&args);

    let downstream = Arc::new(HttpDownstream::new(
        config.statistics_url.clone(),
        config.inventory_url.clone(),
    )?);
    let sidecar = Arc::new(HttpSidecar::new(config.sidecar_port)?);
    let lifecycle = Arc::new(LifecycleController::new(sidecar));
    let dispatcher = Dispatcher::new(SessionRegistry::new(), downstream, Arc::clone(&lifecycle));

    let mut server = UdpServer::bind(&config.bind_addr, dispatcher).await?;

    Arc::clone(&lifecycle).spawn_watch(|report| {
        info!(
            "Watching gameserver: state={} labels={:?} annotations={:?}",
            report.state, report.labels, report.annotations
        );
    });

    info!("Readying");
    if let Err(e) = lifecycle.ready().await {
        error!("Could not send ready message: {}", e);
        return Err(e.into());
    }
    info!("Ready");

    tokio::select! {
        result = server.run() => match result? {
            LoopExit::Crash => {
                std::process::exit(1);
            }
        },
        _ = lifecycle.done() => {
            info!("Termination signal received, exiting");
        }
    }

    Ok(())
}
