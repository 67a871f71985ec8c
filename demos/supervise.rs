// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Capataz Supervisor Demo
//!
//! Supervises the groups listed in a TOML file (or a built-in ticker
//! group), prints every lifecycle event, and shuts everything down on
//! Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Built-in ticker group on ports 7000 and 7001
//! cargo run --example supervise
//!
//! # Groups from a config file, one child per group on port 7000
//! cargo run --example supervise -- capataz.toml
//!
//! # Also announce this supervisor over multicast
//! cargo run --example supervise -- --discovery
//!
//! RUST_LOG=capataz_core=debug cargo run --example supervise
//! ```
//!
//! # Config
//!
//! ```toml
//! log_dir = "/tmp/capataz-logs"
//! log_rotate_at = "03:00"
//! log_ttl = "3days"
//!
//! [[groups]]
//! name = "ticker"
//! executable = "/bin/sh"
//! args = ["-c", "echo ready >&3; while sleep 1; do date; done"]
//! ready_event = "ready"
//! graceful_timeout = "2s"
//! ```

use std::sync::Arc;

use anyhow::Context;
use capataz::prelude::*;
use tracing_subscriber::EnvFilter;

const TICKER: &str = "echo ready >&3; while sleep 1; do echo \"tick from $CAPATAZ_GROUP:$CAPATAZ_PORT\"; done";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let with_discovery = args.iter().any(|a| a == "--discovery");
    let path = args.iter().find(|a| !a.starts_with("--"));
    let config = match path {
        Some(path) => SupervisorConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => SupervisorConfig {
            log_dir: Some(std::env::temp_dir().join("capataz-demo")),
            groups: vec![
                GroupConfig::new("ticker", "/bin/sh")
                    .with_args(["-c", TICKER])
                    .with_ready_event("ready"),
            ],
            ..SupervisorConfig::default()
        },
    };

    let sink = Arc::new(BroadcastSink::default());
    let supervisor = Supervisor::with_sink(config.clone(), sink.clone())?;
    println!("[INIT] Supervisor {} v{}", supervisor.id(), Supervisor::version());
    if let Some(dir) = &config.log_dir {
        println!("[INIT] Logs in {}", dir.display());
    }

    let relay = EventRelay::connect(sink.subscribe(), Some(supervisor.id())).await?;
    relay.on(
        "*",
        &SubscribeOptions::new().handled(true),
        handler(|name, info, data| {
            let origin = match (&info.group, info.port) {
                (Some(group), Some(port)) => format!("{group}:{port}"),
                _ => "-".to_string(),
            };
            println!("[EVENT] {name:<9} {origin:<14} handled={} {data:?}", info.handled);
        }),
    );

    let maintenance = supervisor.spawn_log_maintenance();

    let discovery = with_discovery.then(|| {
        let discovery = Arc::new(Discovery::new(DiscoveryConfig::default()));
        let mut events = discovery.subscribe();
        let runner = Arc::clone(&discovery);
        tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                tracing::error!(error = %e, "discovery stopped");
            }
        });
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    DiscoveryEvent::Pulse(beat) => tracing::debug!(peer = %beat.key(), "pulse"),
                    DiscoveryEvent::Timeout(beat) => println!("[PEER] lost {}", beat.key()),
                }
            }
        });
        discovery
    });

    let ports: &[u16] = if path.is_none() { &[7000, 7001] } else { &[7000] };
    for group in &config.groups {
        for &port in ports {
            let response = supervisor.start(&ChildConfig::new(group.name.clone(), port)).await?;
            println!(
                "[START] {}:{port} started={} ready={} crashed={}",
                group.name, response.started, response.ready, response.crashed
            );
        }
    }

    for (key, info) in supervisor.info(&[])? {
        println!(
            "[INFO] {key} status={} pid={:?} crashes={}",
            info.status, info.pid, info.crash_count
        );
    }
    println!("[RUN] Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!("[SHUTDOWN] Stopping all children...");
    supervisor.kill().await;
    supervisor.wait_for_shutdown().await;

    if let Some(task) = maintenance {
        task.abort();
    }
    if let Some(discovery) = discovery {
        println!("[SHUTDOWN] {} peers were live", discovery.peers().len());
    }
    println!("[SHUTDOWN] Done");
    Ok(())
}
