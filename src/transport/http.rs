use async_trait::async_trait;
use std::time::Duration;

use super::PeerClient;
use crate::consistency::protocol::{
    BeatRequest, DatumFetchRequest, DeleteRequest, ENDPOINT_BEAT, ENDPOINT_DATUM_FETCH, ENDPOINT_DELETE,
    ENDPOINT_FORWARD_DELETE, ENDPOINT_FORWARD_PUBLISH, ENDPOINT_PUBLISH, ENDPOINT_VOTE, ForwardDeleteRequest,
    ForwardPublishRequest, PublishRequest, VoteRequest, VoteResponse,
};
use crate::consistency::raft::RaftTransport;
use crate::distro::protocol::{
    ChecksumReport, DatumBatch, DatumQuery, DistroTransport, ENDPOINT_CHECKSUM, ENDPOINT_DATUM,
    ENDPOINT_DATUM_QUERY, ENDPOINT_SERVICE_HEALTH, ENDPOINT_SERVICE_STATUS, ENDPOINT_SNAPSHOT, ServiceHealth,
    ServiceHealthQuery, ServiceStatusReport,
};
use crate::model::datum::{Datum, Record};

/// Distro and raft transports over the internal HTTP endpoints.
pub struct HttpPeerTransport {
    client: PeerClient,
    /// Calls that wait on the leader's majority round.
    forward: PeerClient,
}

impl HttpPeerTransport {
    pub fn new(client: PeerClient, publish_timeout: Duration) -> Self {
        let forward = client.with_timeout(client.timeout() + publish_timeout);
        Self { client, forward }
    }
}

#[async_trait]
impl DistroTransport for HttpPeerTransport {
    async fn sync_checksums(&self, server: &str, report: &ChecksumReport) -> anyhow::Result<()> {
        self.client.post(server, ENDPOINT_CHECKSUM, report).await
    }

    async fn sync_datums(&self, server: &str, batch: &DatumBatch) -> anyhow::Result<()> {
        self.client.post(server, ENDPOINT_DATUM, batch).await
    }

    async fn fetch_datums(&self, server: &str, keys: &[String]) -> anyhow::Result<Vec<Datum>> {
        let query = DatumQuery { keys: keys.to_vec() };
        self.client.post_json(server, ENDPOINT_DATUM_QUERY, &query).await
    }

    async fn fetch_snapshot(&self, server: &str) -> anyhow::Result<Vec<Datum>> {
        self.client.get_json(server, ENDPOINT_SNAPSHOT).await
    }

    async fn sync_service_status(&self, server: &str, report: &ServiceStatusReport) -> anyhow::Result<()> {
        self.client.post(server, ENDPOINT_SERVICE_STATUS, report).await
    }

    async fn fetch_service_health(&self, server: &str, query: &ServiceHealthQuery) -> anyhow::Result<ServiceHealth> {
        self.client.post_json(server, ENDPOINT_SERVICE_HEALTH, query).await
    }
}

#[async_trait]
impl RaftTransport for HttpPeerTransport {
    async fn request_vote(&self, peer: &str, req: &VoteRequest) -> anyhow::Result<VoteResponse> {
        self.client.post_json(peer, ENDPOINT_VOTE, req).await
    }

    async fn send_beat(&self, peer: &str, beat: &BeatRequest) -> anyhow::Result<()> {
        self.client.post(peer, ENDPOINT_BEAT, beat).await
    }

    async fn publish(&self, peer: &str, req: &PublishRequest) -> anyhow::Result<()> {
        self.client.post(peer, ENDPOINT_PUBLISH, req).await
    }

    async fn delete(&self, peer: &str, req: &DeleteRequest) -> anyhow::Result<()> {
        self.client.post(peer, ENDPOINT_DELETE, req).await
    }

    async fn forward_publish(&self, leader: &str, key: &str, value: &Record) -> anyhow::Result<()> {
        let request = ForwardPublishRequest {
            key: key.to_string(),
            value: value.clone(),
        };
        self.forward.post(leader, ENDPOINT_FORWARD_PUBLISH, &request).await
    }

    async fn forward_delete(&self, leader: &str, key: &str) -> anyhow::Result<()> {
        let request = ForwardDeleteRequest { key: key.to_string() };
        self.forward.post(leader, ENDPOINT_FORWARD_DELETE, &request).await
    }

    async fn fetch_datums(&self, peer: &str, keys: &[String]) -> anyhow::Result<Vec<Datum>> {
        let request = DatumFetchRequest { keys: keys.to_vec() };
        self.client.post_json(peer, ENDPOINT_DATUM_FETCH, &request).await
    }
}
