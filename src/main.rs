//! querylens binary entry point.

use clap::Parser;
use querylens::config::AppConfig;
use querylens::logging::init_tracing;
use querylens::server::create_app;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Natural-language analytics query service.
#[derive(Debug, Parser)]
#[command(name = "querylens", version)]
struct Args {
    /// Host to bind, overriding configuration.
    #[arg(long, env = "QUERYLENS_HOST")]
    host: Option<String>,

    /// Port to bind, overriding configuration.
    #[arg(long, env = "QUERYLENS_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "querylens listening");
    axum::serve(listener, app).await?;

    Ok(())
}
