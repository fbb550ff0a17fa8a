//! Consumer-side instance filtering.
//!
//! A label selector keeps the providers whose labels equal the consumer's for
//! every key named in its expression, e.g.
//! `CONSUMER.label.site = PROVIDER.label.site & CONSUMER.label.env = PROVIDER.label.env`.
//! If the consumer carries none of the keys, or nothing matches, every provider
//! is returned (same-site priority, never an empty answer because of labels).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::instance::Instance;
use crate::error::{NamingError, Result};

const CONSUMER_PREFIX: &str = "CONSUMER.label.";
const PROVIDER_PREFIX: &str = "PROVIDER.label.";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Selector {
    #[default]
    None,
    Label {
        expression: String,
    },
}

/// Resolves labels for a consumer address (CMDB lookups and the like).
pub trait LabelSource: Send + Sync {
    fn labels_of(&self, ip: &str) -> BTreeMap<String, String>;
}

/// Source for deployments without any label inventory.
pub struct NoLabels;

impl LabelSource for NoLabels {
    fn labels_of(&self, _ip: &str) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

impl Selector {
    pub fn label(expression: impl Into<String>) -> Self {
        Selector::Label {
            expression: expression.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Selector::None => Ok(()),
            Selector::Label { expression } => parse_label_keys(expression).map(|_| ()),
        }
    }

    pub fn select(&self, consumer: &BTreeMap<String, String>, providers: Vec<Instance>) -> Vec<Instance> {
        let Selector::Label { expression } = self else {
            return providers;
        };

        // validated on write; a record that fails to parse here filters nothing
        let Ok(keys) = parse_label_keys(expression) else {
            return providers;
        };

        let wanted: Vec<(&String, &String)> = keys
            .iter()
            .filter_map(|key| consumer.get(key).map(|value| (key, value)))
            .collect();

        if wanted.is_empty() {
            return providers;
        }

        let matched: Vec<Instance> = providers
            .iter()
            .filter(|instance| {
                wanted
                    .iter()
                    .all(|(key, value)| instance.metadata.get(*key) == Some(*value))
            })
            .cloned()
            .collect();

        if matched.is_empty() { providers } else { matched }
    }
}

fn parse_label_keys(expression: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();

    for term in expression.split('&').map(str::trim).filter(|t| !t.is_empty()) {
        let (left, right) = term
            .split_once('=')
            .ok_or_else(|| NamingError::invalid(format!("bad selector term: {term}")))?;

        let consumer_key = left
            .trim()
            .strip_prefix(CONSUMER_PREFIX)
            .ok_or_else(|| NamingError::invalid(format!("left side must be {CONSUMER_PREFIX}*: {term}")))?;
        let provider_key = right
            .trim()
            .strip_prefix(PROVIDER_PREFIX)
            .ok_or_else(|| NamingError::invalid(format!("right side must be {PROVIDER_PREFIX}*: {term}")))?;

        if consumer_key.is_empty() || consumer_key != provider_key {
            return Err(NamingError::invalid(format!(
                "selector must compare the same label on both sides: {term}"
            )));
        }
        keys.push(consumer_key.to_string());
    }

    if keys.is_empty() {
        return Err(NamingError::invalid("empty selector expression"));
    }
    Ok(keys)
}
