use clap::Parser;
use log::info;
use presence_client::input::HELP;
use presence_client::network::{Client, ClientConfig};
use presence_shared::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Display name shown to other participants
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Avatar reference (image path or URL)
    #[arg(short = 'a', long)]
    avatar: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    heartbeat_interval: u64,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    println!("{}", HELP);

    let config = ClientConfig {
        server: args.server,
        user_name: args.name.filter(|name| !name.trim().is_empty()),
        selected_avatar: args.avatar,
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval),
        fake_ping_ms: args.fake_ping,
    };

    let mut client = Client::new(config).await?;
    client.run().await?;

    Ok(())
}
