//! Real-time connection hub server.
//!
//! Accepts WebSocket links, tracks which user and which room each link
//! belongs to, and routes envelopes between links.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-server
//! cargo run --bin hiroba-server -- --host 0.0.0.0 --port 3000
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use hiroba_server::{
    hub::{Hub, HubConfig, spawn_sweeper},
    infrastructure::InMemoryConnectionLog,
    ui::Server,
};
use hiroba_shared::{logger::setup_logger, time::SystemClock};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Real-time connection hub with room-scoped routing", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Outbound queue capacity per connection (frames)
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,

    /// Idle window in seconds before the sweeper evicts a silent connection
    #[arg(long, default_value_t = 600)]
    idle_timeout_secs: u64,

    /// Sweep period in seconds
    #[arg(long, default_value_t = 300)]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    // Initialize dependencies in order:
    // 1. Clock
    // 2. ConnectionLog (lifecycle ledger)
    // 3. Hub (registry + router)
    // 4. Liveness sweeper
    // 5. Server

    let config = HubConfig {
        queue_capacity: args.queue_capacity,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        ..HubConfig::default()
    };

    // 1. Clock shared by the hub and the connection log
    let clock = Arc::new(SystemClock);

    // 2. ConnectionLog (in-memory lifecycle ledger)
    let log = Arc::new(InMemoryConnectionLog::new(clock.clone(), config.idle_timeout));

    // 3. Hub
    let hub = Arc::new(Hub::new(log, clock, config));

    // 4. Liveness sweeper
    let _sweeper = spawn_sweeper(hub.clone());

    // 5. Create and run the server
    let server = Server::new(hub);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
