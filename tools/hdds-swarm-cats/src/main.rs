// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hdds-swarm-cats - Swarm RPC smoke test
//!
//! Starts a few masters and a handful of drones in one process. Every drone
//! serves `cats(name) -> "sup, {name}"`; every master then calls it on all
//! registered providers and logs who answered and when.
//!
//! # Usage
//!
//! ```bash
//! # Random swarm (2-3 masters, 2-10 drones)
//! hdds-swarm-cats
//!
//! # Fixed size, sniff master traffic
//! hdds-swarm-cats --masters 2 --drones 5 --sniff --log-level debug
//! ```

use clap::Parser;
use hdds_swarm::{
    Channel, Context, Drone, DroneHandle, Master, MasterEndpoints, MemoryEnsemble, Registry,
    SwarmConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const REP_ENDPOINT: &str = "inproc://swarm.cats.rep";
const REQ_ENDPOINT: &str = "inproc://swarm.cats.req";

/// Swarm RPC smoke test: cats(name) -> "sup, {name}"
#[derive(Parser, Debug)]
#[command(name = "hdds-swarm-cats")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of masters (random 2-3 when absent)
    #[arg(short, long)]
    masters: Option<usize>,

    /// Number of drones (random 2-10 when absent)
    #[arg(short, long)]
    drones: Option<usize>,

    /// Per-call timeout in milliseconds
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log every frame seen on the masters' outbound channels
    #[arg(long)]
    sniff: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_names(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let base = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            SwarmConfig::from_file(path)?
        }
        None => SwarmConfig::default(),
    };

    let nmasters = args.masters.unwrap_or_else(|| fastrand::usize(2..=3));
    let ndrones = args.drones.unwrap_or_else(|| fastrand::usize(2..=10));

    let ctx = Context::new();
    let ensemble = MemoryEnsemble::new();
    let registry = || Registry::new(Arc::new(ensemble.session()));
    let mut aliases: HashMap<String, String> = HashMap::new();

    let mut masters = Vec::with_capacity(nmasters);
    for n in 0..nmasters {
        let mut config = base.clone();
        config.node.name = Some(format!("master-{}", n));
        config.master = Some(MasterEndpoints::direct(
            format!("{}.{}", REP_ENDPOINT, n),
            format!("{}.{}", REQ_ENDPOINT, n),
        ));
        let master = Master::new(&ctx, registry(), &config)?;
        aliases.insert(master.address().to_string(), master.name().to_string());
        masters.push(master);
    }

    let sniffing = Arc::new(AtomicBool::new(args.sniff));
    let mut sniffers: Vec<JoinHandle<()>> = Vec::new();
    if args.sniff {
        for master in &masters {
            let sniffer = master.node().sniffer(Channel::Out);
            let running = Arc::clone(&sniffing);
            let name = format!("{}.out.sniffer", master.name());
            sniffers.push(thread::Builder::new().name(name).spawn(move || {
                while running.load(Ordering::SeqCst) {
                    if sniffer.sniff_once(Duration::from_millis(50)).is_err() {
                        break;
                    }
                }
            })?);
        }
    }

    info!("{} masters:", masters.len());
    for master in &masters {
        info!("  {}: {}", master.name(), master.address());
    }

    let mut drones: Vec<(DroneHandle, JoinHandle<()>)> = Vec::with_capacity(ndrones);
    for n in 0..ndrones {
        let mut config = base.clone();
        config.node.name = Some(format!("drone-{}", n));
        config.master = None;
        let mut drone = Drone::new(&ctx, registry(), &config)?;
        drone.register("cats", |args: Vec<Value>| {
            let name = args.first().and_then(Value::as_str).unwrap_or("nobody");
            json!(format!("sup, {}", name))
        })?;
        info!("  {}: {}", drone.name(), drone.address());
        aliases.insert(drone.address().to_string(), drone.name().to_string());

        let handle = drone.handle();
        let join = thread::Builder::new()
            .name(drone.name().to_string())
            .spawn(move || {
                if let Err(e) = drone.run() {
                    warn!("drone exited: {}", e);
                }
            })?;
        drones.push((handle, join));
    }
    info!("{} drones started", drones.len());

    if args.sniff {
        for master in &masters {
            let mut readiness = HashMap::new();
            master.node().watch_readiness(&mut readiness)?;
        }
    }

    let alias = |address: &str| -> String {
        aliases
            .get(address)
            .cloned()
            .unwrap_or_else(|| address.to_string())
    };

    info!("RPC test begins");
    let timeout = Duration::from_millis(args.timeout_ms);
    for master in &masters {
        info!(master = %master.name(), "testing RPC");
        let catname = format!("Squeak [{}]", master.name());
        let providers: Vec<String> = master.providers_by_registry("cats")?.into_iter().collect();
        for provider in &providers {
            info!(master = %master.name(), "provider:{}", alias(provider));
        }

        info!(master = %master.name(), "RPC style: prefetched providers, generator");
        let started = Instant::now();
        let stream = master.stream_known_providers(
            "cats",
            vec![json!(catname)],
            Some(providers),
            false,
            Some(timeout),
        )?;
        let mut answered = 0usize;
        for response in stream {
            let response = response?;
            answered += 1;
            info!(
                master = %master.name(),
                "@{:.5} {}:{}",
                started.elapsed().as_secs_f64(),
                alias(&response.provider),
                response.value.unwrap_or(serde_json::Value::Null)
            );
        }
        info!(
            master = %master.name(),
            "...took {:.5}s ({} answers)",
            started.elapsed().as_secs_f64(),
            answered
        );
    }
    info!("RPC testing DONE");

    for (handle, _) in &drones {
        handle.stop();
    }
    for (_, join) in drones {
        let _ = join.join();
    }
    sniffing.store(false, Ordering::SeqCst);
    for join in sniffers {
        let _ = join.join();
    }
    drop(masters);
    ctx.stop();

    Ok(())
}
