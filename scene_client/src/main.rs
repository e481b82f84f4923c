//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p scene_client -- [ip] [-v[v...]] [-n] [-r model_index]...
//!
//! The client connects to the server, requests the given models, orbits its
//! camera around the origin and keeps every received resource in memory.
//!
//! Console commands:
//!   status       - Show received resources
//!   req <index>  - Request a catalog model
//!   quit         - Disconnect and exit

use std::{env, io::BufRead, process, sync::Arc, thread, time::Duration};

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver};
use scene_client::{ClientResources, SceneClient};
use scene_shared::{logging, prelude::*};
use tracing::{info, warn};

const ORBIT_RADIUS: f32 = 6.0;
const FRAME: Duration = Duration::from_millis(33);

struct Args {
    cfg: SyncConfig,
    requests: Vec<u16>,
}

fn usage() -> ! {
    eprintln!("Usage: client [ip] [-v[vvv...]] [-n (no colored logs)] [-r model_index]...");
    process::exit(1);
}

fn parse_args() -> Args {
    let mut args = Args {
        cfg: SyncConfig::default(),
        requests: Vec::new(),
    };
    let argv: Vec<String> = env::args().collect();
    let mut i = 1;
    let mut positional = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "-n" => args.cfg.log.colored = false,
            "-r" if i + 1 < argv.len() => {
                args.requests
                    .push(argv[i + 1].parse().unwrap_or_else(|_| usage()));
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

fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_status(resources: &ClientResources) {
    let s = resources.lock();
    info!(
        models = s.models.len(),
        materials = s.materials.len(),
        textures = s.textures.len(),
        lights = s.lights.len(),
        shaders = s.shaders.len(),
        transforms = s.transforms.len(),
        geometry_applied = s.geometry_applied,
        exchanges = s.exchanges_completed,
        "status"
    );
}

fn main() -> anyhow::Result<()> {
    let args = parse_args();
    logging::init(&args.cfg.log);

    info!(server = %args.cfg.tcp_addr(), "Starting client");
    let resources = Arc::new(ClientResources::from_config(&args.cfg));
    let client = SceneClient::connect(&args.cfg, resources.clone()).context("connect")?;
    info!(telemetry = %client.server_udp_addr(), "Connected");
    for index in &args.requests {
        client.request_model(*index)?;
    }

    let console = stdin_lines();
    let mut angle = 0.0f32;
    while client.is_connected() {
        angle += FRAME.as_secs_f32() * 0.5;
        client.set_camera(Camera {
            position: Vec3::new(ORBIT_RADIUS * angle.cos(), 2.0, ORBIT_RADIUS * angle.sin()),
            yaw: angle + std::f32::consts::PI,
            pitch: -0.2,
        });

        while let Ok(line) = console.try_recv() {
            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some("quit" | "exit"), _) => {
                    info!("Disconnecting");
                    client.disconnect();
                    return Ok(());
                }
                (Some("status"), _) => print_status(&resources),
                (Some("req"), Some(index)) => match index.parse() {
                    Ok(index) => client.request_model(index)?,
                    Err(_) => warn!(index, "bad model index"),
                },
                (None, _) => {}
                (Some(other), _) => info!(command = other, "unknown command (status, req <n>, quit)"),
            }
        }
        thread::sleep(FRAME);
    }

    info!("Server closed the connection");
    print_status(&resources);
    Ok(())
}
