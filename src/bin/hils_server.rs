use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use geltouch::config::AppConfig;
use geltouch::sync::HilsServer;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(
    name = "hils_server",
    about = "Shared-state HILS simulator server for gel-pad impedance sensing"
)]
struct Cli {
    /// Configuration file (JSON); defaults apply when missing
    #[arg(long, default_value = "geltouch.json")]
    config: PathBuf,
    /// Override the configured listen host
    #[arg(long)]
    host: Option<String>,
    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> ExitCode {
    geltouch::init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load_from_file(&cli.config);
    if let Some(host) = cli.host {
        config.sync.host = host;
    }
    if let Some(port) = cli.port {
        config.sync.port = port;
    }

    let server = HilsServer::new(
        &config.geometry,
        &config.measurement,
        config.simulation.clone(),
    )
    .context("building server from configuration")?;
    let addr = config.sync.addr();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(async move {
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        log::info!("HILS server listening on {addr} (Ctrl+C to stop)");
        tokio::select! {
            result = server.serve(listener) => result.context("server loop"),
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                Ok(())
            }
        }
    })
}
