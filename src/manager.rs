//! The node pool, player map, and voice-packet router (§3 "Manager", §4.8).
//!
//! Generalizes the teacher's `Manager`/`ManagerRef` split (a cheap handle
//! wrapping `Arc`-shared interior-mutable state) from "one voice connection
//! per guild" into "one node pool, many players, routed by guild id".

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde_json::Value;

use crate::autoplay::AutoplayResolver;
use crate::config::{ManagerOptions, UseNodeStrategy, VoiceSender};
use crate::error::{Error, Result};
use crate::events::{Event, Events, NodeEvent, PlayerEvent};
use crate::ids::{ChannelId, GuildId, UserId};
use crate::node::connection::{NodeConnection, NodeEventSink};
use crate::node::payload::{EventData, PlayerUpdateState};
use crate::node::{Node, NodeOptions};
use crate::player::{Player, PlayerCreateOptions};
use crate::rest::{LoadResult, VoicePayload};
use crate::session::PlayerSnapshot;
use crate::track::{Track, TrackBuilder};

/// A loaded search/identifier result, mapped from a node's `loadType`
/// (§4.8 "Search").
pub enum SearchResult {
    Track(Track),
    Search(Vec<Track>),
    Playlist {
        name: String,
        selected_track: Option<usize>,
        tracks: Vec<Track>,
        duration_ms: u64,
    },
    Empty,
    Error { message: String, severity: String, cause: String },
}

/// A query passed to [`Manager::search`]; plain text is prefixed with the
/// resolved search platform unless it is already an HTTP(S) URL (§4.8).
pub struct SearchQuery {
    pub query: String,
    pub source: Option<crate::config::SearchPlatform>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> SearchQuery {
        SearchQuery { query: query.into(), source: None }
    }

    pub fn with_source(query: impl Into<String>, source: crate::config::SearchPlatform) -> SearchQuery {
        SearchQuery { query: query.into(), source: Some(source) }
    }
}

/// Either shape `update_voice_state` accepts: a gateway-wrapped dispatch
/// envelope, or the inner payload directly (§4.8).
pub enum VoiceStateUpdate {
    Server { guild_id: GuildId, token: String, endpoint: String },
    State { guild_id: GuildId, user_id: UserId, session_id: String, channel_id: Option<ChannelId> },
}

struct ManagerState {
    nodes: HashMap<String, (Node, NodeConnection)>,
    players: HashMap<GuildId, Player>,
    /// Per-guild accumulator for the half of a voice pair seen so far, keyed
    /// until both the server and state dispatches have arrived.
    pending_voice: HashMap<GuildId, PendingVoice>,
}

#[derive(Default, Clone)]
struct PendingVoice {
    token: Option<String>,
    endpoint: Option<String>,
    session_id: Option<String>,
}

impl PendingVoice {
    fn payload(&self) -> Option<VoicePayload> {
        Some(VoicePayload {
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
            session_id: self.session_id.clone()?,
        })
    }
}

struct ManagerInner {
    client_id: String,
    client_name: String,
    cluster_id: u32,
    builder: Arc<TrackBuilder>,
    autoplay: Arc<AutoplayResolver>,
    events: Events,
    send: VoiceSender,
    default_search_platform: crate::config::SearchPlatform,
    use_node: UseNodeStrategy,
    use_priority: bool,
    max_previous_tracks: usize,
    bot_user_id: Option<UserId>,
    state: tokio::sync::RwLock<ManagerState>,
}

/// A handle to the node pool and player map for one client. Cheaply
/// `Clone`-able; clones share the same underlying state (§5).
#[derive(Clone)]
pub struct Manager(Arc<ManagerInner>);

impl Manager {
    /// `init(client_id, cluster_id=0)`: builds every configured node and
    /// starts its connection task, but does not yet create any player
    /// (§4.8).
    pub async fn init(options: ManagerOptions) -> Manager {
        let builder = Arc::new(TrackBuilder::new(
            options.track_partial.clone(),
            options.replace_youtube_credentials,
            &[],
        ));
        let autoplay = Arc::new(AutoplayResolver::new(
            &options.auto_play_search_platforms,
            options.last_fm_api_key.clone(),
            options.default_search_platform,
        ));
        let events = Events::new();
        let send: VoiceSender = Arc::from(options.send);

        let manager = Manager(Arc::new(ManagerInner {
            client_id: options.client_id.clone(),
            client_name: options.client_name.clone(),
            cluster_id: options.cluster_id,
            builder,
            autoplay,
            events,
            send,
            default_search_platform: options.default_search_platform,
            use_node: options.use_node,
            use_priority: options.use_priority,
            max_previous_tracks: options.max_previous_tracks,
            bot_user_id: options.client_id.parse().ok().map(UserId::new),
            state: tokio::sync::RwLock::new(ManagerState {
                nodes: HashMap::new(),
                players: HashMap::new(),
                pending_voice: HashMap::new(),
            }),
        }));

        for node_opts in options.nodes {
            manager.create_node(node_opts).await;
        }

        manager
    }

    pub fn events(&self) -> Events {
        self.0.events.clone()
    }

    // ---- node pool (§4.8 `create_node`/`destroy_node`) ----

    /// Builds a node, starts its connection task with this manager as the
    /// event sink, and adds it to the pool.
    pub async fn create_node(&self, options: NodeOptions) -> Node {
        let node = Node::new(options);
        let sink: Arc<dyn NodeEventSink> = Arc::new(self.clone());
        let connection = NodeConnection::start(
            node.clone(),
            sink,
            self.0.client_id.clone(),
            self.0.client_name.clone(),
            self.0.cluster_id,
        );
        self.0
            .state
            .write()
            .await
            .nodes
            .insert(node.identifier().to_string(), (node.clone(), connection));
        self.0.events.emit(Event::Node(NodeEvent::Create { identifier: node.identifier().to_string() }));
        node
    }

    /// Migrates every player hosted on `identifier` to another usable node,
    /// then drops it from the pool (§4.8 "Migration").
    pub async fn destroy_node(&self, identifier: &str) -> Result<()> {
        let hosted: Vec<Player> = {
            let state = self.0.state.read().await;
            let mut out = Vec::new();
            for player in state.players.values() {
                if player.node_identifier().await == identifier {
                    out.push(player.clone());
                }
            }
            out
        };

        for player in &hosted {
            self.auto_move_node(player, Some(identifier)).await?;
        }

        if let Some((_, connection)) = self.0.state.write().await.nodes.remove(identifier) {
            connection.shutdown();
        }
        self.0.events.emit(Event::Node(NodeEvent::Destroy { identifier: identifier.to_string() }));
        Ok(())
    }

    /// Selects a new usable node (excluding `exclude`) and migrates one
    /// player onto it, re-pushing voice state and resuming from the saved
    /// position (§4.8 "Migration").
    async fn auto_move_node(&self, player: &Player, exclude: Option<&str>) -> Result<()> {
        let new_node = self.useable_node_excluding(exclude).await?;
        let position = player.position_ms().await;
        let old_node = player.node().await;
        let old_session = player.node_session_id().await;

        if let Some(session_id) = old_session {
            let _ = old_node.rest().destroy_player(&session_id, &player.guild_id().to_string()).await;
        }

        player.set_node(new_node).await;
        if let Some(voice) = player.voice_payload().await {
            let _ = player.set_voice(voice).await;
        }
        let _ = player.seek(position).await;
        Ok(())
    }

    /// `useable_node`: node-selection policy (§4.8).
    pub async fn useable_node(&self) -> Result<Node> {
        self.useable_node_excluding(None).await
    }

    async fn useable_node_excluding(&self, exclude: Option<&str>) -> Result<Node> {
        let state = self.0.state.read().await;
        let candidates: Vec<Node> = state
            .nodes
            .values()
            .map(|(node, _)| node.clone())
            .filter(|node| Some(node.identifier()) != exclude)
            .collect();
        drop(state);

        select_useable_node(candidates, self.0.use_priority, self.0.use_node).await
    }

    // ---- player map (§4.8 `create`/`get`/`destroy`/`detach`) ----

    pub async fn get(&self, guild_id: GuildId) -> Option<Player> {
        self.0.state.read().await.players.get(&guild_id).cloned()
    }

    /// Creates a player bound to a freshly-selected usable node and adds it
    /// to the map.
    pub async fn create(&self, opts: PlayerCreateOptions) -> Result<Player> {
        if let Some(existing) = self.get(opts.guild_id).await {
            return Ok(existing);
        }

        let node = self.useable_node().await?;
        let player = Player::new(
            opts.clone(),
            node,
            self.0.events.clone(),
            self.0.autoplay.clone(),
            self.0.builder.clone(),
            self.0.send.clone(),
            self.0.max_previous_tracks,
            self.0.bot_user_id,
        );
        self.0.state.write().await.players.insert(opts.guild_id, player.clone());
        Ok(player)
    }

    /// Optionally disconnects and destroys the node-side player, then
    /// removes it from the map (§4.5 "removes from Manager").
    pub async fn destroy(&self, guild_id: GuildId, disconnect: bool) -> Result<()> {
        if let Some(player) = self.0.state.write().await.players.remove(&guild_id) {
            player.destroy(disconnect).await?;
        }
        Ok(())
    }

    /// Removes the player from the map and tears down only its local voice
    /// state, leaving the node-side player alive (§4.5 `detach`).
    pub async fn detach(&self, guild_id: GuildId) {
        if let Some(player) = self.0.state.write().await.players.remove(&guild_id) {
            player.detach().await;
        }
    }

    // ---- search (§4.8 "Search") ----

    pub async fn search(&self, query: SearchQuery, requester: Option<UserId>) -> Result<SearchResult> {
        let node = self.useable_node().await?;
        let identifier = if is_http_url(&query.query) {
            query.query
        } else {
            let platform = query.source.unwrap_or(self.0.default_search_platform);
            format!("{}:{}", platform.prefix(), query.query)
        };

        let result = node.rest().load_tracks(&identifier).await?;
        Ok(match result {
            LoadResult::Track(raw) => SearchResult::Track(self.0.builder.build(raw, requester)),
            LoadResult::Search(tracks) => SearchResult::Search(
                tracks.into_iter().map(|raw| self.0.builder.build(raw, requester)).collect(),
            ),
            LoadResult::Playlist { name, selected_track, tracks, duration_ms } => SearchResult::Playlist {
                name,
                selected_track,
                tracks: tracks.into_iter().map(|raw| self.0.builder.build(raw, requester)).collect(),
                duration_ms,
            },
            LoadResult::Empty => SearchResult::Empty,
            LoadResult::Error(e) => SearchResult::Error { message: e.message, severity: e.severity, cause: e.cause },
        })
    }

    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let node = self.useable_node().await?;
        let mut raw = node.rest().decode_tracks(&[encoded.to_string()]).await?;
        raw.pop().map(|r| self.0.builder.build(r, None)).ok_or_else(|| Error::NodeNotFound(node.identifier().to_string()))
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let node = self.useable_node().await?;
        let raw = node.rest().decode_tracks(encoded).await?;
        Ok(raw.into_iter().map(|r| self.0.builder.build(r, None)).collect())
    }

    // ---- voice-packet routing (§4.8 "Voice-packet routing") ----

    pub async fn update_voice_state(&self, update: VoiceStateUpdate) -> Result<()> {
        match update {
            VoiceStateUpdate::Server { guild_id, token, endpoint } => {
                let voice = {
                    let mut state = self.0.state.write().await;
                    let entry = state.pending_voice.entry(guild_id).or_default();
                    entry.token = Some(token);
                    entry.endpoint = Some(endpoint);
                    entry.payload()
                };
                if let Some(voice) = voice {
                    if let Some(player) = self.get(guild_id).await {
                        player.set_voice(voice).await?;
                    }
                }
            }
            VoiceStateUpdate::State { guild_id, user_id, session_id, channel_id } => {
                if Some(user_id) != self.0.bot_user_id {
                    return Ok(());
                }

                let voice = {
                    let mut state = self.0.state.write().await;
                    let entry = state.pending_voice.entry(guild_id).or_default();
                    entry.session_id = Some(session_id);
                    entry.payload()
                };

                match channel_id {
                    Some(channel_id) => {
                        if let Some(player) = self.get(guild_id).await {
                            let old = player.voice_channel_id().await;
                            if old != Some(channel_id) {
                                self.0.events.emit(Event::Player(PlayerEvent::Move { guild_id, old, new: Some(channel_id) }));
                            }
                            player.set_voice_channel_id(channel_id).await;
                            if let Some(voice) = voice {
                                player.set_voice(voice).await?;
                            }
                        }
                    }
                    None => {
                        self.0.events.emit(Event::Player(PlayerEvent::Disconnect { guild_id }));
                        self.destroy(guild_id, false).await?;
                    }
                }
            }
        }
        Ok(())
    }

    // ---- persistence (§4.8 "Persistence") ----

    pub async fn save_player_state(&self, guild_id: GuildId) -> Result<()> {
        if let Some(player) = self.get(guild_id).await {
            player.snapshot().await.save().await?;
        }
        Ok(())
    }

    /// Restores every persisted player whose `node_identifier` matches
    /// `node_id`, reconciling against the node's live player list, then
    /// deletes each processed snapshot file.
    pub async fn load_player_states(&self, node_id: &str) -> Result<()> {
        let Some(node) = self.0.state.read().await.nodes.get(node_id).map(|(node, _)| node.clone()) else {
            return Ok(());
        };

        let live_guild_ids: Vec<String> = match node.session_id().await {
            Some(session_id) => node
                .rest()
                .get_all_players(&session_id)
                .await
                .map(|players| players.into_iter().map(|p| p.guild_id).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        for snapshot in PlayerSnapshot::list_all().await? {
            if snapshot.node_identifier != node_id {
                continue;
            }
            let guild_id = snapshot.guild_id;

            if !live_guild_ids.iter().any(|id| id == &guild_id.to_string()) {
                PlayerSnapshot::delete(guild_id).await?;
                continue;
            }

            let player = Player::restore(
                snapshot,
                node.clone(),
                self.0.events.clone(),
                self.0.autoplay.clone(),
                self.0.builder.clone(),
                self.0.send.clone(),
                self.0.max_previous_tracks,
            );
            if let Some(voice) = player.voice_payload().await {
                let _ = player.set_voice(voice).await;
            }
            self.0.state.write().await.players.insert(guild_id, player);
            PlayerSnapshot::delete(guild_id).await?;
        }
        Ok(())
    }

    /// Snapshots every live player concurrently, then removes any snapshot
    /// file left over from a guild no longer tracked (§4.8 "Shutdown").
    pub async fn handle_shutdown(&self) {
        let players: Vec<Player> = self.0.state.read().await.players.values().cloned().collect();
        let live: std::collections::HashSet<GuildId> = players.iter().map(|p| p.guild_id()).collect();

        let saves = players.iter().map(|p| p.snapshot());
        let snapshots: Vec<_> = futures_util::future::join_all(saves).await;
        for snapshot in snapshots {
            let _ = snapshot.save().await;
        }

        if let Ok(all) = PlayerSnapshot::list_all().await {
            for snapshot in all {
                if !live.contains(&snapshot.guild_id) {
                    let _ = PlayerSnapshot::delete(snapshot.guild_id).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl NodeEventSink for Manager {
    async fn on_player_update(&self, node: &Node, guild_id: GuildId, update: PlayerUpdateState) {
        let _ = node;
        if let Some(player) = self.get(guild_id).await {
            player.handle_player_update(update).await;
        }
    }

    async fn on_event(&self, node: &Node, guild_id: GuildId, event: EventData) {
        let _ = node;
        if let Some(player) = self.get(guild_id).await {
            player.handle_node_event(event).await;
        }
    }

    async fn on_node_ready(&self, node: &Node) {
        self.0.events.emit(Event::Node(NodeEvent::Connect { identifier: node.identifier().to_string() }));
        let _ = self.load_player_states(node.identifier()).await;
    }

    async fn on_node_disconnect(&self, node: &Node) {
        self.0.events.emit(Event::Node(NodeEvent::Disconnect { identifier: node.identifier().to_string() }));
    }

    async fn on_node_exhausted(&self, node: &Node) {
        let identifier = node.identifier().to_string();
        self.0.events.emit(Event::Node(NodeEvent::Error {
            identifier: identifier.clone(),
            message: "exhausted reconnection budget".to_string(),
        }));
        let _ = self.destroy_node(&identifier).await;
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Filters to connected nodes, then applies the weighted-priority draw
/// (when configured and the pool has nonzero total priority) or falls
/// through to `use_node`'s tie-break (§4.8 `useable_node`). Split out of
/// [`Manager::useable_node_excluding`] so the policy can be exercised
/// directly against hand-built nodes, without a live connection task.
async fn select_useable_node(candidates: Vec<Node>, use_priority: bool, use_node: UseNodeStrategy) -> Result<Node> {
    let mut connected = Vec::new();
    for node in candidates {
        if node.is_connected().await {
            connected.push(node);
        }
    }
    if connected.is_empty() {
        return Err(Error::NoUseableNode);
    }

    if use_priority {
        let priorities: Vec<u32> = connected.iter().map(|n| n.options().priority).collect();
        let total: u32 = priorities.iter().sum();
        if total > 0 {
            let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
            let mut cumulative = 0.0;
            for (node, priority) in connected.iter().zip(priorities.iter()) {
                if *priority == 0 {
                    continue;
                }
                cumulative += *priority as f64 / total as f64;
                if draw < cumulative {
                    return Ok(node.clone());
                }
            }
        }
    }

    match use_node {
        UseNodeStrategy::LeastLoad => {
            let mut best: Option<(Node, f64)> = None;
            for node in connected {
                let load = node.load_ratio().await;
                if best.as_ref().map(|(_, b)| load < *b).unwrap_or(true) {
                    best = Some((node, load));
                }
            }
            best.map(|(n, _)| n).ok_or(Error::NoUseableNode)
        }
        UseNodeStrategy::LeastPlayers => {
            let mut best: Option<(Node, u64)> = None;
            for node in connected {
                let count = node.player_count().await;
                if best.as_ref().map(|(_, b)| count < *b).unwrap_or(true) {
                    best = Some((node, count));
                }
            }
            best.map(|(n, _)| n).ok_or(Error::NoUseableNode)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::node::NodeOptions;
    use crate::rest::{LoadException, NodeRest, PlayerPatch, RestPlayer};
    use crate::track::RawTrack;

    struct StubRest;

    #[async_trait]
    impl NodeRest for StubRest {
        async fn get_all_players(&self, _session_id: &str) -> Result<Vec<RestPlayer>> {
            Ok(Vec::new())
        }
        async fn update_player(
            &self,
            _session_id: &str,
            _guild_id: &str,
            _patch: &PlayerPatch,
            _no_replace: bool,
        ) -> Result<Option<RestPlayer>> {
            Ok(None)
        }
        async fn destroy_player(&self, _session_id: &str, _guild_id: &str) -> Result<()> {
            Ok(())
        }
        async fn update_session(&self, _session_id: &str, _resuming: bool, _timeout_sec: u64) -> Result<()> {
            Ok(())
        }
        async fn load_tracks(&self, _identifier: &str) -> Result<LoadResult> {
            Ok(LoadResult::Error(LoadException {
                message: "not implemented in stub".to_string(),
                severity: "common".to_string(),
                cause: "stub".to_string(),
            }))
        }
        async fn decode_tracks(&self, _encoded: &[String]) -> Result<Vec<RawTrack>> {
            Ok(Vec::new())
        }
        async fn info(&self) -> Result<crate::rest::NodeInfo> {
            unimplemented!("not exercised by these tests")
        }
    }

    async fn stub_node(identifier: &str, connected: bool, player_count: u64, priority: u32) -> Node {
        let mut opts = NodeOptions::new(identifier, "localhost", "");
        opts.priority = priority;
        let node = Node::with_rest(opts, Arc::new(StubRest));
        node.set_connected(connected).await;
        node.set_stats(crate::node::payload::Stats {
            players: player_count,
            playing_players: 0,
            uptime: 0,
            memory: crate::node::payload::StatsMemory { free: 0, used: 0, allocated: 0, reservable: 0 },
            cpu: crate::node::payload::StatsCpu { cores: 4, system_load: 0.0, lavalink_load: 0.0 },
            frame_stats: None,
        })
        .await;
        node
    }

    #[tokio::test]
    async fn least_players_picks_the_emptiest_connected_node() {
        let busy = stub_node("busy", true, 5, 0).await;
        let idle = stub_node("idle", true, 1, 0).await;
        let down = stub_node("down", false, 0, 0).await;

        let picked = select_useable_node(vec![busy, idle, down], false, UseNodeStrategy::LeastPlayers)
            .await
            .unwrap();
        assert_eq!(picked.identifier(), "idle");
    }

    #[tokio::test]
    async fn no_connected_nodes_is_an_error() {
        let down = stub_node("down", false, 0, 0).await;
        let err = select_useable_node(vec![down], false, UseNodeStrategy::LeastPlayers).await;
        assert!(matches!(err, Err(Error::NoUseableNode)));
    }

    #[tokio::test]
    async fn zero_priority_total_falls_back_to_strategy() {
        let a = stub_node("a", true, 3, 0).await;
        let b = stub_node("b", true, 1, 0).await;
        let picked = select_useable_node(vec![a, b], true, UseNodeStrategy::LeastPlayers).await.unwrap();
        assert_eq!(picked.identifier(), "b");
    }

    #[test]
    fn pending_voice_payload_requires_all_three_fields() {
        let mut pending = PendingVoice::default();
        assert!(pending.payload().is_none());
        pending.token = Some("t".to_string());
        pending.endpoint = Some("e".to_string());
        assert!(pending.payload().is_none());
        pending.session_id = Some("s".to_string());
        let payload = pending.payload().unwrap();
        assert_eq!(payload.token, "t");
        assert_eq!(payload.endpoint, "e");
        assert_eq!(payload.session_id, "s");
    }
}
