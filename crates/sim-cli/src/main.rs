use std::env;
use std::net::SocketAddr;

use contracts::SimConfig;
use sim_api::{serve, ServiceCore};

fn print_usage() {
    println!("sim-cli <command>");
    println!("commands:");
    println!("  serve [addr] [config.json]");
    println!("    default addr: 127.0.0.1:8080");
    println!("  tick [n] [config.json]");
    println!("  demo [config.json]");
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn load_config(path: Option<&String>) -> Result<SimConfig, String> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|err| format!("cannot read {path}: {err}"))?;
            serde_json::from_str(&raw).map_err(|err| format!("invalid config {path}: {err}"))
        }
        None => Ok(SimConfig::default()),
    }
}

/// A small seeded world for poking at the engine without a client.
fn demo_core(config: SimConfig) -> ServiceCore {
    let mut core = ServiceCore::new(config, None);
    for (npc_id, role, faction) in [
        ("vera", "gate guard", "guards"),
        ("marcus", "merchant", "traders"),
        ("edda", "healer", "citizens"),
    ] {
        if let Err(err) = core.init_agent(npc_id, role, None, Some(faction.to_string()), None) {
            eprintln!("demo init failed for {npc_id}: {err}");
        }
    }
    core
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("serve") => {
            let addr = match parse_socket_addr(args.get(2)) {
                Ok(addr) => addr,
                Err(err) => {
                    eprintln!("error: {err}");
                    print_usage();
                    std::process::exit(2);
                }
            };
            let config = match load_config(args.get(3)) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(2);
                }
            };
            println!("serving simulation on http://{addr}");
            if let Err(err) = serve(addr, config).await {
                eprintln!("server error: {err}");
                std::process::exit(1);
            }
        }
        Some("tick") => {
            let steps = args.get(2).and_then(|v| v.parse::<u64>().ok()).unwrap_or(1);
            let config = match load_config(args.get(3)) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(2);
                }
            };
            let mut core = demo_core(config);
            for _ in 0..steps {
                let report = core.tick(None);
                println!(
                    "tick {} -> {} ({} agents, {} gossip)",
                    report.tick,
                    core.world.time(),
                    report.agents_processed,
                    report.gossip_exchanges,
                );
            }
        }
        Some("demo") => {
            let config = match load_config(args.get(2)) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(2);
                }
            };
            let mut core = demo_core(config);
            let reports = match core.advance(24.0) {
                Ok(reports) => reports,
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(1);
                }
            };
            println!(
                "advanced one day in {} ticks; world at {}",
                reports.len(),
                core.world.time(),
            );
            for event in core.recent_events(10) {
                println!("  [{}] {}", event.at, event.summary);
            }
        }
        _ => print_usage(),
    }
}
