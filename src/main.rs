use clap::Parser;
use distro_naming::config::{NamingConfig, logging};
use distro_naming::server::Node;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "distro-naming", version, about = "Service registry and discovery server")]
struct Args {
    /// TOML/JSON/YAML config file; `NAMING__*` environment variables override it.
    #[arg(long, env = "NAMING_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP API address, also this node's identity in the server list.
    #[arg(long)]
    http: Option<SocketAddr>,

    /// UDP gossip address.
    #[arg(long)]
    gossip: Option<SocketAddr>,

    /// Gossip address of an existing member; repeat for several.
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    #[arg(long)]
    standalone: bool,

    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut NamingConfig) {
        if let Some(http) = self.http {
            config.server.http_addr = http;
        }
        if let Some(gossip) = self.gossip {
            config.server.gossip_addr = gossip;
        }
        if !self.seeds.is_empty() {
            config.server.seeds = self.seeds.clone();
        }
        if self.standalone {
            config.server.standalone = true;
        }
        if let Some(dir) = &self.data_dir {
            config.server.data_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NamingConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    logging::init(&config.log)?;

    tracing::info!("Starting naming node on {}", config.server.http_addr);
    if config.server.standalone {
        tracing::info!("Running standalone");
    } else if config.server.seeds.is_empty() {
        tracing::info!("Starting as seed node (founder)");
    } else {
        tracing::info!("Seed nodes: {:?}", config.server.seeds);
    }

    let listener = tokio::net::TcpListener::bind(config.server.http_addr).await?;
    let node = Node::build(config).await?;

    if let Some(membership) = node.membership.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let list = membership.server_list();
                tracing::info!(
                    "Cluster stats: {} servers, {} healthy",
                    list.all.len(),
                    list.healthy.len()
                );
            }
        });
    }

    tracing::info!("Press Ctrl+C to shutdown");
    node.serve(listener).await
}
