//! Document-to-shard routing.
//!
//! Hash sharding uses the 31-multiplier string hash computed over UTF-16
//! code units with wrapping `i32` arithmetic (the hash Java's
//! `String.hashCode` produces), then a floor modulo onto the shard count.
//! The mapping must never change once documents are indexed: a different
//! function would silently send updates and deletes to the wrong shard.

use crate::error::{GriddleError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShardingStrategy {
    /// A single shard.
    None,
    /// `shards` shards; the routing key (or the document id) is hashed.
    Hash { shards: usize },
    /// One shard per identifier; the routing key must name the shard.
    Explicit { identifiers: Vec<String> },
}

/// One serial work queue: a shard of a named index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardTarget {
    pub index: String,
    pub shard: usize,
}

impl ShardTarget {
    pub fn new(index: impl Into<String>, shard: usize) -> Self {
        ShardTarget {
            index: index.into(),
            shard,
        }
    }
}

impl fmt::Display for ShardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.shard)
    }
}

#[derive(Debug, Clone)]
pub struct ShardRouter {
    index: String,
    strategy: ShardingStrategy,
}

impl ShardRouter {
    pub fn new(index: impl Into<String>, strategy: ShardingStrategy) -> Result<Self> {
        let index = index.into();
        match &strategy {
            ShardingStrategy::None => {}
            ShardingStrategy::Hash { shards } => {
                if *shards == 0 || *shards > i32::MAX as usize {
                    return Err(GriddleError::Config(format!(
                        "index {}: shard count must be between 1 and {}, got {}",
                        index,
                        i32::MAX,
                        shards
                    )));
                }
            }
            ShardingStrategy::Explicit { identifiers } => {
                if identifiers.is_empty() {
                    return Err(GriddleError::Config(format!(
                        "index {}: explicit sharding needs at least one shard identifier",
                        index
                    )));
                }
                for (i, id) in identifiers.iter().enumerate() {
                    if identifiers[..i].contains(id) {
                        return Err(GriddleError::Config(format!(
                            "index {}: duplicate shard identifier {}",
                            index, id
                        )));
                    }
                }
            }
        }
        Ok(ShardRouter { index, strategy })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn strategy(&self) -> &ShardingStrategy {
        &self.strategy
    }

    pub fn shard_count(&self) -> usize {
        match &self.strategy {
            ShardingStrategy::None => 1,
            ShardingStrategy::Hash { shards } => *shards,
            ShardingStrategy::Explicit { identifiers } => identifiers.len(),
        }
    }

    /// Stable name of a shard, used for queue names and on-disk directories.
    pub fn shard_name(&self, shard: usize) -> String {
        match &self.strategy {
            ShardingStrategy::Explicit { identifiers } => identifiers
                .get(shard)
                .cloned()
                .unwrap_or_else(|| shard.to_string()),
            _ => shard.to_string(),
        }
    }

    pub fn all_targets(&self) -> Vec<ShardTarget> {
        (0..self.shard_count())
            .map(|shard| ShardTarget::new(self.index.clone(), shard))
            .collect()
    }

    pub fn route(&self, document_id: &str, routing_key: Option<&str>) -> Result<ShardTarget> {
        let shard = match &self.strategy {
            ShardingStrategy::None => 0,
            ShardingStrategy::Hash { shards } => {
                let key = routing_key.unwrap_or(document_id);
                string_hash(key).rem_euclid(*shards as i32) as usize
            }
            ShardingStrategy::Explicit { identifiers } => {
                let key = routing_key
                    .ok_or_else(|| GriddleError::MissingRoutingKey(self.index.clone()))?;
                identifiers
                    .iter()
                    .position(|id| id == key)
                    .ok_or_else(|| GriddleError::UnknownShard {
                        index: self.index.clone(),
                        routing_key: key.to_string(),
                    })?
            }
        };
        Ok(ShardTarget::new(self.index.clone(), shard))
    }
}

pub fn string_hash(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}
