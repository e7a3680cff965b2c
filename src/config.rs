//! Configuration of a [`Client`](crate::Client).

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    node::{Node, NodeSelector},
    source::DEFAULT_BLOCK_TIMEOUT,
};

/// Default time to wait for a node to start answering.
pub const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
/// Default number of fallbacks after the first attempt.
pub const DEFAULT_FALLBACK_LIMIT: usize = 5;
/// Default number of nodes raced at once.
pub const DEFAULT_RACE_WINDOW: usize = 3;
/// Default number of ring nodes a content path is served by.
pub const DEFAULT_RING_REPLICAS: usize = 3;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time allowed for a node to respond with headers.
    pub connect_timeout: std::time::Duration,
    /// Time allowed between two blocks of a CAR stream.
    pub block_timeout: std::time::Duration,
    /// Attempts allowed after the first one before giving up on nodes.
    pub fallback_limit: usize,
    /// Nodes raced at once in [`Mode::Race`](crate::Mode::Race).
    pub race_window: usize,
    /// Places this many of the best nodes on a consistent-hash ring. `None` disables the ring.
    pub ring_size: Option<usize>,
    /// Nodes of the ring a content path is pinned to.
    pub ring_replicas: usize,
    /// Origin serving unverified content once all nodes failed.
    pub customer_origin: Option<Url>,
    /// Used as the only node while no node list is known.
    pub cdn_url: Option<Url>,
    /// Where node lists are fetched from.
    pub orchestrator_url: Option<Url>,
    /// Where auth tokens are fetched from.
    pub auth_url: Option<Url>,
    /// Key identifying this client to the auth endpoint.
    pub client_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            fallback_limit: DEFAULT_FALLBACK_LIMIT,
            race_window: DEFAULT_RACE_WINDOW,
            ring_size: None,
            ring_replicas: DEFAULT_RING_REPLICAS,
            customer_origin: None,
            cdn_url: None,
            orchestrator_url: None,
            auth_url: None,
            client_key: None,
        }
    }
}

impl Config {
    /// Puts the best `size` nodes on a consistent-hash ring.
    pub fn with_ring(mut self, size: usize) -> Self {
        self.ring_size = Some(size);
        self
    }

    /// A selector over `nodes` following this configuration.
    pub fn selector(&self, nodes: Vec<Node>) -> NodeSelector {
        let selector = NodeSelector::new(nodes);
        match self.ring_size {
            Some(size) => selector.with_ring(size, self.ring_replicas),
            None => selector,
        }
    }

    /// Falls back to `origin` once all nodes failed.
    pub fn with_customer_origin(mut self, origin: Url) -> Self {
        self.customer_origin = Some(origin);
        self
    }

    /// Authenticates requests with tokens from `auth_url`.
    pub fn with_auth(mut self, auth_url: Url, client_key: impl Into<String>) -> Self {
        self.auth_url = Some(auth_url);
        self.client_key = Some(client_key.into());
        self
    }
}
