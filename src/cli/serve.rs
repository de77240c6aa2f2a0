use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Runtime;

use crate::{
    config::{CanopyConfig, DEFAULT_PORT},
    host::Host,
    web::LiveServer,
};

use super::resolve_path;

const DEFAULT_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Open workspace roots and serve their trees to client windows.
#[derive(Debug, Parser)]
pub struct ServeCommand {
    /// Directories to open. Defaults to the roots listed in the config file,
    /// or the current directory if there are none.
    pub roots: Vec<PathBuf>,

    /// Config file to use. Defaults to `canopy.toml` in the current directory
    /// if it exists.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The IP address to listen on. Defaults to `127.0.0.1`.
    #[clap(long)]
    pub address: Option<IpAddr>,

    /// The port to listen on. Defaults to the config's preference, or `34877`
    /// if it has none.
    #[clap(long)]
    pub port: Option<u16>,
}

impl ServeCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let config = match &self.config {
            Some(path) => CanopyConfig::load(&resolve_path(path)?)?,
            None => CanopyConfig::load_from_dir(&env::current_dir()?)?.unwrap_or_default(),
        };

        let host = Arc::new(Host::new(config.scan_rules()?, config.log_capacity));

        let roots = if !self.roots.is_empty() {
            self.roots.clone()
        } else if !config.roots.is_empty() {
            config.roots.clone()
        } else {
            vec![env::current_dir()?]
        };

        for root in &roots {
            let root = resolve_path(root)?;
            host.add_root(&root)
                .with_context(|| format!("Could not open root {}", root.display()))?;
        }

        let ip = self
            .address
            .or(config.serve_address)
            .unwrap_or(DEFAULT_BIND_ADDRESS.into());
        let port = self.port.or(config.serve_port).unwrap_or(DEFAULT_PORT);
        let address: SocketAddr = (ip, port).into();

        let display_host = if ip.is_loopback() {
            "localhost".to_owned()
        } else {
            ip.to_string()
        };

        let runtime = Runtime::new()?;
        runtime.block_on(async move {
            let listener = LiveServer::bind(address)
                .await
                .with_context(|| format!("Failed to bind to {}", address))?;

            log::info!("Listening: http://{}:{}", display_host, port);
            for info in host.root_infos() {
                log::info!("Serving {}", info.root_path.display());
            }

            LiveServer::new(host).serve(listener).await?;
            Ok(())
        })
    }
}
