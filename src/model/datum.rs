use serde::{Deserialize, Serialize};

use super::instance::Instance;
use super::service::{Service, md5_hex};
use crate::config::switches::SwitchDomain;

/// Instance list stored under an instance-list key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instances {
    pub instance_list: Vec<Instance>,
}

impl Instances {
    pub fn new(instance_list: Vec<Instance>) -> Self {
        Self { instance_list }
    }

    /// Order-independent digest of the list.
    pub fn checksum(&self) -> String {
        let mut rendered: Vec<String> = self
            .instance_list
            .iter()
            .map(Instance::sort_key)
            .collect();
        rendered.sort();

        let mut joined = String::new();
        for line in rendered {
            joined.push_str(&line);
            joined.push(',');
        }
        md5_hex(&joined)
    }
}

/// Value half of a replicated key/value pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Record {
    Instances(Instances),
    Service(Box<Service>),
    Switch(Box<SwitchDomain>),
}

impl Record {
    pub fn checksum(&self) -> String {
        match self {
            Record::Instances(instances) => instances.checksum(),
            Record::Service(service) => service.to_record().checksum().to_string(),
            Record::Switch(domain) => md5_hex(&format!("{domain:?}")),
        }
    }

    pub fn as_instances(&self) -> Option<&Instances> {
        match self {
            Record::Instances(instances) => Some(instances),
            _ => None,
        }
    }
}

/// Unit of replication: `(key, value, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datum {
    pub key: String,
    pub value: Record,
    /// Per-key version; higher wins.
    pub timestamp: u64,
}

impl Datum {
    pub fn new(key: impl Into<String>, value: Record, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }
}
