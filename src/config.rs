//! Host-supplied configuration and process bootstrap (§4.10, §6
//! "Configuration", "Logging").
//!
//! Generalizes the teacher's `main.rs` bootstrap (`dotenv::dotenv()`,
//! `env_logger::Builder` reading `RUST_LOG`) from a single binary's `main`
//! into a reusable library entry point.

use std::env;
use std::sync::{Arc, Once};

use serde_json::Value;

use crate::ids::GuildId;
use crate::node::NodeOptions;
use crate::track::TrackPartial;

pub(crate) fn default_true() -> bool {
    true
}

/// A shared handle to the host's outbound voice-gateway sink, cloned onto
/// every [`crate::player::Player`] created by the manager that owns it.
pub type VoiceSender = Arc<dyn Fn(GuildId, Value) + Send + Sync>;

/// Which platform a search query is issued against by default (§4.6, §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchPlatform {
    YouTube,
    YouTubeMusic,
    Spotify,
    Deezer,
    SoundCloud,
    Tidal,
    VkMusic,
    Qobuz,
    AppleMusic,
}

impl SearchPlatform {
    /// The node `loadtracks` identifier prefix for this platform.
    pub fn prefix(self) -> &'static str {
        match self {
            SearchPlatform::YouTube => "ytsearch",
            SearchPlatform::YouTubeMusic => "ytmsearch",
            SearchPlatform::Spotify => "spsearch",
            SearchPlatform::Deezer => "dzsearch",
            SearchPlatform::SoundCloud => "scsearch",
            SearchPlatform::Tidal => "tdsearch",
            SearchPlatform::VkMusic => "vksearch",
            SearchPlatform::Qobuz => "qbsearch",
            SearchPlatform::AppleMusic => "amsearch",
        }
    }
}

/// Node-selection policy when `use_priority` is disabled (§4.8
/// `useable_node`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UseNodeStrategy {
    LeastLoad,
    LeastPlayers,
}

impl Default for UseNodeStrategy {
    fn default() -> UseNodeStrategy {
        UseNodeStrategy::LeastPlayers
    }
}

/// Typed configuration surface for [`crate::manager::Manager`] (§6
/// `ManagerOptions`). Constructed directly by the host application; there is
/// no CLI, since this is a library.
pub struct ManagerOptions {
    pub nodes: Vec<NodeOptions>,
    pub client_id: String,
    pub client_name: String,
    pub cluster_id: u32,
    pub auto_play: bool,
    pub auto_play_search_platforms: Vec<SearchPlatform>,
    pub default_search_platform: SearchPlatform,
    pub last_fm_api_key: Option<String>,
    pub max_previous_tracks: usize,
    pub replace_youtube_credentials: bool,
    pub track_partial: Vec<TrackPartial>,
    pub use_node: UseNodeStrategy,
    pub use_priority: bool,
    /// Pushes an outbound voice payload to the chat platform's gateway; the
    /// library never opens that connection itself (§1 "out of scope").
    pub send: Box<dyn Fn(GuildId, Value) + Send + Sync>,
}

impl ManagerOptions {
    /// Reads the environment-variable shape the teacher's `main.rs` reads
    /// (`DISCORD_TOKEN`-style), loading a `.env` file first if present.
    /// `send` is never derivable from the environment and must be supplied
    /// by the caller afterward.
    pub fn from_env(send: Box<dyn Fn(GuildId, Value) + Send + Sync>) -> ManagerOptions {
        dotenv::dotenv().ok();

        let client_id = env::var("MAGMA_CLIENT_ID").unwrap_or_default();
        let cluster_id = env::var("MAGMA_CLUSTER_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let node = NodeOptions::new(
            "default",
            env::var("MAGMA_NODE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            env::var("MAGMA_NODE_PASSWORD").unwrap_or_default(),
        );

        ManagerOptions {
            nodes: vec![node],
            client_id,
            client_name: "Magmastream".to_string(),
            cluster_id,
            auto_play: true,
            auto_play_search_platforms: vec![
                SearchPlatform::Spotify,
                SearchPlatform::Deezer,
                SearchPlatform::SoundCloud,
                SearchPlatform::YouTube,
            ],
            default_search_platform: SearchPlatform::YouTube,
            last_fm_api_key: env::var("MAGMA_LASTFM_API_KEY").ok(),
            max_previous_tracks: crate::queue::DEFAULT_MAX_PREVIOUS_TRACKS,
            replace_youtube_credentials: true,
            track_partial: Vec::new(),
            use_node: UseNodeStrategy::default(),
            use_priority: false,
            send,
        }
    }
}

static LOGGER_INIT: Once = Once::new();

/// Initializes the `env_logger` backend from `RUST_LOG`, behind a once-guard
/// so embedding applications may call this more than once safely. The
/// library never calls this itself; it only emits through the `log` facade
/// (§4.10, §6 "Logging").
pub fn init() {
    LOGGER_INIT.call_once(|| {
        env_logger::Builder::new().parse_default_env().init();
    });
}
