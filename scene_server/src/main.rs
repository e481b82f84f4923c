//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p scene_server -- [ip] [-v[v...]] [-n] [-b bytes/s] [-m] [-l] [-k n_lights]
//!
//! - `-v`: more verbose logs (repeat for trace)
//! - `-n`: no colored logs
//! - `-b`: limit outbound UDP bandwidth
//! - `-m`: don't move objects
//! - `-l`: don't change lights
//! - `-k`: number of dynamic point lights
//!
//! The server serves procedural demo content to one client at a time until
//! stdin is closed or `quit` is typed.

use std::{env, io::BufRead, process, sync::Arc};

use anyhow::Context;
use scene_server::{
    demo::{demo_catalog, demo_store, DemoLoader},
    sim::SimOptions,
    Server,
};
use scene_shared::{config::SyncConfig, logging};
use tracing::info;

struct Args {
    cfg: SyncConfig,
    sim: SimOptions,
    n_lights: usize,
}

fn usage() -> ! {
    eprintln!(
        "Usage: server [ip] [-v[vvv...]] [-n (no colored logs)] [-b (max bytes per second)] \
         [-m (don't move objects)] [-l (don't change lights)] [-k (n dyn lights)]"
    );
    process::exit(1);
}

fn parse_args() -> Args {
    let mut args = Args {
        cfg: SyncConfig::default(),
        sim: SimOptions::default(),
        n_lights: 4,
    };
    let argv: Vec<String> = env::args().collect();
    let mut i = 1;
    let mut positional = 0;
    while i < argv.len() {
        let arg = argv[i].as_str();
        match arg {
            "-n" => args.cfg.log.colored = false,
            "-m" => args.sim.move_objects = false,
            "-l" => args.sim.change_lights = false,
            "-b" if i + 1 < argv.len() => {
                args.cfg.bandwidth_limit = argv[i + 1].parse().ok();
                i += 1;
            }
            "-k" if i + 1 < argv.len() => {
                args.n_lights = argv[i + 1].parse().unwrap_or_else(|_| usage());
                i += 1;
            }
            v if v.starts_with("-v") && v[1..].chars().all(|c| c == 'v') => {
                args.cfg.log.verbosity = (v.len() - 1) as u8;
            }
            a if a.starts_with('-') => usage(),
            a => {
                if positional == 0 {
                    args.cfg.server_ip = a.to_string();
                }
                positional += 1;
            }
        }
        i += 1;
    }
    args
}

fn main() -> anyhow::Result<()> {
    let args = parse_args();
    logging::init(&args.cfg.log);

    let store = demo_store(args.n_lights).context("build demo store")?;
    info!(
        addr = %args.cfg.tcp_addr(),
        n_lights = args.n_lights,
        bandwidth_limit = ?args.cfg.bandwidth_limit,
        "Starting server"
    );

    let server = Server::new(args.cfg, store, Arc::new(DemoLoader))
        .context("create server")?
        .with_catalog(demo_catalog())
        .with_simulation(args.sim);
    let handle = server.start().context("start server")?;
    info!(local = %handle.local_tcp_addr(), "Server listening");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        match line.trim() {
            "quit" | "exit" => break,
            "status" => info!(
                connected = handle.is_client_connected(),
                sent = handle.sent_ids().len(),
                pending_geometry = handle.pending_geometry(),
                "status"
            ),
            "" => {}
            other => info!(command = other, "unknown command (status, quit)"),
        }
    }

    info!("Shutting down");
    handle.shutdown();
    Ok(())
}
