use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomchat::protocol::DEFAULT_ROOM;
use roomchat::server::Server;

#[derive(Parser)]
#[command(name = "server", about = "Room-scoped chat relay server")]
struct Args {
    /// TCP address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Room used when a join does not name one
    #[arg(long, default_value = DEFAULT_ROOM)]
    default_room: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let srv = Arc::new(Server::new(args.default_room));

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down");
        std::process::exit(0);
    });

    srv.listen_and_serve(&args.addr).await?;
    Ok(())
}
