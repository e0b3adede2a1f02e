use clap::Parser;
use log::info;
use presence_server::network::{Server, ServerConfig};
use presence_shared::{DEFAULT_CLIENT_TIMEOUT_SECS, DEFAULT_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "256")]
    max_clients: usize,

    /// Seconds of silence before a connection is dropped
    #[arg(short = 't', long, default_value_t = DEFAULT_CLIENT_TIMEOUT_SECS)]
    client_timeout: u64,

    /// How often to look for silent connections, in milliseconds
    #[arg(long, default_value = "1000")]
    timeout_check_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.client_timeout),
        timeout_check_interval: Duration::from_millis(args.timeout_check_interval),
    };

    info!("Starting presence server...");
    let mut server = Server::new(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
