//! An audio node: its address, REST client, live WebSocket connection, and
//! reported statistics (§3 "Node", §4.2).

pub mod connection;
pub mod payload;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::node::payload::{Stats, StatsCpu};
use crate::rest::{NodeInfo, NodeRest, RestClient};

pub use connection::{NodeConnection, NodeEventSink};

fn default_port() -> u16 {
    2333
}

fn default_retry_amount() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_resume_timeout() -> u64 {
    60
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Static configuration for one node, supplied by the host application
/// (§6 `NodeOptions`). Derives `Deserialize` so a host application can load a
/// fleet of nodes from its own config file without this crate depending on
/// one (§4.10).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOptions {
    pub identifier: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_retry_amount")]
    pub retry_amount: u32,
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub retry_delay: Duration,
    #[serde(default = "crate::config::default_true")]
    pub resume_status: bool,
    #[serde(default = "default_resume_timeout")]
    pub resume_timeout: u64,
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
}

impl NodeOptions {
    /// Convenience constructor matching the teacher's preference for
    /// sensible defaults over a builder macro.
    pub fn new(identifier: impl Into<String>, host: impl Into<String>, password: impl Into<String>) -> NodeOptions {
        NodeOptions {
            identifier: identifier.into(),
            host: host.into(),
            port: default_port(),
            secure: false,
            password: password.into(),
            priority: 0,
            retry_amount: default_retry_amount(),
            retry_delay: default_retry_delay(),
            resume_status: true,
            resume_timeout: default_resume_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// A node's mutable, shared-by-reference runtime state.
#[derive(Debug, Default)]
struct NodeState {
    session_id: Option<String>,
    connected: bool,
    stats: Option<Stats>,
    info: Option<NodeInfo>,
}

/// A handle to one audio node. Cheaply `Clone`-able; clones share the same
/// underlying state, mirroring the teacher's `Manager`/`ManagerRef` split.
#[derive(Clone)]
pub struct Node {
    options: Arc<NodeOptions>,
    rest: Arc<dyn NodeRest>,
    state: Arc<RwLock<NodeState>>,
}

impl Node {
    pub fn new(options: NodeOptions) -> Node {
        let rest = RestClient::new(
            &options.host,
            options.port,
            options.secure,
            options.password.clone(),
            options.request_timeout,
        );
        Node::with_rest(options, Arc::new(rest))
    }

    /// Constructs a node around a pre-built REST implementation, letting
    /// tests substitute a fake in place of [`RestClient`] (§4.12).
    pub fn with_rest(options: NodeOptions, rest: Arc<dyn NodeRest>) -> Node {
        Node {
            options: Arc::new(options),
            rest,
            state: Arc::new(RwLock::new(NodeState::default())),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.options.identifier
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn rest(&self) -> &dyn NodeRest {
        self.rest.as_ref()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.read().await.session_id.clone()
    }

    pub async fn set_session_id(&self, session_id: String) {
        self.state.write().await.session_id = Some(session_id);
    }

    pub async fn set_connected(&self, connected: bool) {
        self.state.write().await.connected = connected;
    }

    pub async fn set_stats(&self, stats: Stats) {
        self.state.write().await.stats = Some(stats);
    }

    pub async fn set_info(&self, info: NodeInfo) {
        self.state.write().await.info = Some(info);
    }

    /// Current player count, for `LeastPlayers` selection (§4.8).
    pub async fn player_count(&self) -> u64 {
        self.state.read().await.stats.as_ref().map(|s| s.players).unwrap_or(0)
    }

    /// `cpu.lavalinkLoad / cpu.cores`, for `LeastLoad` selection (§4.8).
    pub async fn load_ratio(&self) -> f64 {
        let state = self.state.read().await;
        match state.stats.as_ref().map(|s| &s.cpu) {
            Some(StatsCpu { cores, lavalink_load, .. }) if *cores > 0 => lavalink_load / *cores as f64,
            _ => f64::MAX,
        }
    }

    /// The source managers the node's `/v4/info` advertised, used to
    /// intersect with the configured autoplay platform order (§4.6).
    pub async fn source_managers(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .info
            .as_ref()
            .map(|i| i.source_managers.clone())
            .unwrap_or_default()
    }
}
