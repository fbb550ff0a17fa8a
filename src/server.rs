//! Node bootstrap
//!
//! Builds every subsystem from a [`NamingConfig`] in dependency order and
//! hands back a [`Node`] whose router can be served on any listener.

use anyhow::{Context as _, Result};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{self, Context};
use crate::auth;
use crate::config::NamingConfig;
use crate::config::switches::Switches;
use crate::consistency::raft::RaftCore;
use crate::consistency::{DelegateConsistencyService, DistroConsistencyService, RaftConsistencyService};
use crate::distro::mapper::DistroMapper;
use crate::membership::service::MembershipService;
use crate::push::{PushService, UdpPushTransport};
use crate::registry::ServiceManager;
use crate::registry::operator::{self, InstanceOperator};
use crate::registry::status_sync::ServiceStatusSynchronizer;
use crate::registry::switch_manager::SwitchManager;
use crate::storage::{KvStorage, MemoryKvStorage};
use crate::transport::{HttpPeerTransport, PeerClient};

pub struct Node {
    pub config: NamingConfig,
    pub membership: Option<Arc<MembershipService>>,
    pub mapper: Arc<DistroMapper>,
    pub distro: Arc<DistroConsistencyService>,
    pub raft: Arc<RaftCore>,
    pub push: Arc<PushService>,
    pub manager: Arc<ServiceManager>,
    pub operator: Arc<dyn InstanceOperator>,
    pub status_sync: Arc<ServiceStatusSynchronizer>,
    pub context: Arc<Context>,
}

impl Node {
    /// Wire the node. Nothing runs in the background until [`Node::start`].
    pub async fn build(config: NamingConfig) -> Result<Self> {
        let local = config.server.local_address();
        let standalone = config.server.standalone;
        info!(
            "building naming node {} ({})",
            local,
            if standalone { "standalone" } else { "cluster" }
        );

        let switches = Switches::new(config.switches.clone());
        let mapper = DistroMapper::new(local.clone(), standalone, switches.clone());

        let peers = PeerClient::new(config.distro.request_timeout(), config.distro.retry_attempts);
        let transport = Arc::new(HttpPeerTransport::new(peers.clone(), config.raft.publish_timeout()));

        let distro = DistroConsistencyService::new(
            mapper.clone(),
            switches.clone(),
            transport.clone(),
            config.distro.clone(),
        );

        let raft_storage: Arc<dyn KvStorage> =
            Arc::new(MemoryKvStorage::with_snapshot_dir(config.server.data_dir.join("raft")));
        let raft = RaftCore::new(local.clone(), raft_storage, transport.clone(), config.raft.clone());
        raft.init().context("failed to restore raft state")?;

        let membership = if standalone {
            raft.set_peers(vec![local.clone()]);
            None
        } else {
            let membership = MembershipService::bind(&config.server)
                .await
                .context("failed to bind gossip socket")?;
            membership.add_listener(mapper.clone());
            membership.add_listener(raft.clone());
            Some(membership)
        };

        let consistency = Arc::new(DelegateConsistencyService::new(
            distro.clone(),
            Arc::new(RaftConsistencyService::new(raft.clone())),
        ));

        let push_transport = UdpPushTransport::bind(config.push.udp_bind)
            .await
            .context("failed to bind push socket")?;
        let push = PushService::new(config.push.clone(), switches.clone(), Arc::new(push_transport));

        let manager = ServiceManager::new(
            config.registry.clone(),
            config.health.clone(),
            consistency.clone(),
            mapper.clone(),
            switches.clone(),
            push.clone(),
        );
        let switch_manager = SwitchManager::new(switches, consistency);
        let status_sync = ServiceStatusSynchronizer::new(manager.clone(), transport);
        let operator = operator::build(&config.registry, manager.clone(), push.clone());

        // login lockouts are node-local
        let authenticator = auth::build(&config.auth, Arc::new(MemoryKvStorage::new()));

        let context = Arc::new(Context {
            manager: manager.clone(),
            operator: operator.clone(),
            push: push.clone(),
            switches: switch_manager,
            status_sync: status_sync.clone(),
            distro: distro.clone(),
            raft: raft.clone(),
            peers,
            auth: authenticator,
            auth_enabled: config.auth.enabled,
        });

        Ok(Self {
            config,
            membership,
            mapper,
            distro,
            raft,
            push,
            manager,
            operator,
            status_sync,
            context,
        })
    }

    /// Spawn the background loops of every subsystem.
    pub async fn start(&self) {
        if let Some(membership) = &self.membership {
            membership.clone().start().await;
        }
        self.distro.clone().start().await;
        self.raft.clone().start().await;
        self.push.clone().start().await;
        self.status_sync.clone().start().await;
        self.operator.clone().start();
        info!("naming node {} started", self.mapper.local_address());
    }

    pub fn router(&self) -> Router {
        api::router(self.context.clone())
    }

    /// Start the background work and serve the API until Ctrl+C.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.start().await;
        let addr = listener.local_addr()?;
        info!("HTTP API listening on {}", addr);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await?;

        info!("shutting down {}", addr);
        if let Some(membership) = &self.membership {
            membership.leave().await;
        }
        Ok(())
    }
}
