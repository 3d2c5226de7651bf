//! Composition root: discovery → identity → transport → check-in loop.

use crate::beacon::Beacon;
use crate::config::Config;
use crate::discovery::{self, hosts};
use crate::error::Result;
use crate::identity::Identity;
use crate::results::ResultSink;
use crate::transport::Transport;
use crate::util::spawn_detached;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Run the agent. Returns only on a fatal startup error; once the check-in
/// loop starts, the process runs until a shutdown signal.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let discovered = discover_controller(&config).await;

    // No usable identity means nothing else can run.
    let identity = Identity::load(&config)?;
    let transport = Arc::new(Transport::setup(&identity, &config, discovered)?);

    install_shutdown_handler(config.rewrite_hosts);

    let deferred = crate::embedded::load_deferred();
    let sink = Arc::new(ResultSink::new(&config, &transport));

    tracing::info!(
        agent_id = %config.agent_id,
        url = %config.controller_url,
        interval = ?config.checkin_interval,
        "starting check-in loop"
    );
    Beacon::new(Arc::clone(&config), transport)
        .run(sink, deferred)
        .await;
    Ok(())
}

/// Discovery is best-effort: without it the agent still starts and relies on
/// whatever name resolution the host provides.
async fn discover_controller(config: &Config) -> Option<Ipv4Addr> {
    match discovery::discover().await {
        Ok(addr) => {
            tracing::info!(%addr, "discovered controller address");
            if config.rewrite_hosts
                && let Err(e) = hosts::write_override(addr)
            {
                tracing::info!("hosts override not written, relying on DNS bypass: {e}");
            }
            Some(addr)
        }
        Err(e) => {
            tracing::warn!("controller discovery failed, proceeding without it: {e}");
            None
        }
    }
}

/// Interrupt/termination tears down the hosts override and exits immediately;
/// in-flight tasks are neither awaited nor cancelled.
fn install_shutdown_handler(cleanup_hosts: bool) {
    spawn_detached(async move {
        wait_for_shutdown().await;
        tracing::info!("shutdown signal received, cleaning up");
        if cleanup_hosts
            && let Err(e) = hosts::remove_override()
        {
            tracing::info!("hosts override not removed: {e}");
        }
        std::process::exit(0);
    });
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
