//! Raft Network Protocol
//!
//! Endpoints and payloads of the persistent (CP) path.

use serde::{Deserialize, Serialize};

use crate::model::datum::{Datum, Record};

// --- API Endpoints ---

pub const ENDPOINT_VOTE: &str = "/v1/ns/raft/vote";
pub const ENDPOINT_BEAT: &str = "/v1/ns/raft/beat";
/// Leader to follower: apply a committed-by-leader datum.
pub const ENDPOINT_PUBLISH: &str = "/v1/ns/raft/datum/commit";
/// Leader to follower: remove a key.
pub const ENDPOINT_DELETE: &str = "/v1/ns/raft/datum/delete";
/// Follower to leader: publish on my behalf.
pub const ENDPOINT_FORWARD_PUBLISH: &str = "/v1/ns/raft/datum";
/// Follower to leader: delete on my behalf.
pub const ENDPOINT_FORWARD_DELETE: &str = "/v1/ns/raft/datum/remove";
pub const ENDPOINT_DATUM_FETCH: &str = "/v1/ns/raft/datum/fetch";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate: String,
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub voter: String,
    pub term: u64,
    /// Whom the voter backs for `term`.
    pub voted_for: Option<String>,
}

/// One `(key, timestamp)` pair advertised by the leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatEntry {
    pub key: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatRequest {
    pub leader: String,
    pub term: u64,
    pub entries: Vec<BeatEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub source: String,
    pub term: u64,
    pub datum: Datum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub source: String,
    pub term: u64,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardPublishRequest {
    pub key: String,
    pub value: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardDeleteRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatumFetchRequest {
    pub keys: Vec<String>,
}
