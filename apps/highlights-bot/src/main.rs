use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use highlights_bot::config::Config;

#[derive(Parser, Debug)]
#[command(about = "Telegram highlights bot: webhook, highlight intake and donations")]
struct Args {
    /// Overrides HIGHLIGHTS_BIND_ADDR.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "HIGHLIGHTS_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = Config::from_env()?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    highlights_bot::serve(config).await
}
