use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use foulkon_proxy::config::{CommonConfig, PathSet, ProxyConfig};
use foulkon_proxy::proxy::factory::ProxyFactory;
use log::{error, info, warn};

/// Authorization reverse proxy. Routes are loaded from the Authorization API
/// and refreshed periodically without restarting the listener.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct ProxyArgs {
    /// Directory holding `proxy.toml`. Defaults to $FOULKON_CONFIG, then
    /// /etc/foulkon.
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Print proxy configuration data (JSON) and exit.
    #[arg(long)]
    pub print_config: bool,
}

async fn run(args: ProxyArgs) -> Result<()> {
    let ps = PathSet::new(args.config_path);
    let cfg: ProxyConfig = ps.load_config("proxy", ProxyConfig::default)?;

    if args.print_config {
        let json = serde_json::to_string_pretty(&cfg).context("encode config")?;
        println!("{json}");
        return Ok(());
    }

    cfg.logs.init()?;
    if !ps.config_file("proxy").exists() {
        warn!(
            "Config file {} not found, using defaults",
            ps.config_file("proxy").display()
        );
    }

    let factory = ProxyFactory::new(cfg);
    let (server, reconciler) = factory.build().await?;

    tokio::spawn(reconciler.run());

    server.run().await.context("run proxy server")?;

    info!("Proxy exited by user");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = ProxyArgs::parse();
    match run(args).await {
        Ok(()) => {}
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
