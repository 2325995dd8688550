//! Inbound WebSocket frames from an audio node (§4.2, §6).
//!
//! Shapes grounded on the v4 Lavalink protocol as modeled by
//! `examples/other_examples/56e15ed8_zeyla-lmao__twilight-lavalink-src-model.rs.rs`'s
//! `incoming` module, adjusted for the v4 op set this crate targets (no
//! WebSocket-side outgoing ops; player control is REST-only, see
//! [`crate::rest`]).

use serde::Deserialize;

use crate::track::RawTrack;

/// One frame received on a node's `/v4/websocket` connection.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum IncomingEvent {
    Ready(Ready),
    Stats(Box<Stats>),
    PlayerUpdate(PlayerUpdate),
    Event(EventFrame),
}

/// Dispatched once per connection, on successful authentication.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub resumed: bool,
    pub session_id: String,
}

/// Periodic node/host statistics.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub players: u64,
    pub playing_players: u64,
    pub uptime: u64,
    pub memory: StatsMemory,
    pub cpu: StatsCpu,
    #[serde(default)]
    pub frame_stats: Option<StatsFrames>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsMemory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsCpu {
    pub cores: usize,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsFrames {
    pub sent: u64,
    pub nulled: u64,
    pub deficit: u64,
}

/// A player's live position/ping snapshot.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerUpdateState,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    pub time: i64,
    pub position: Option<i64>,
    pub connected: bool,
    pub ping: i64,
}

/// The envelope around a playback/voice event.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub guild_id: String,
    #[serde(flatten)]
    pub data: EventData,
}

/// Playback and voice events (§4.5, plus plugin event extensions).
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum EventData {
    TrackStartEvent { track: RawTrack },
    TrackEndEvent { track: RawTrack, reason: TrackEndReason },
    TrackExceptionEvent { track: RawTrack, exception: TrackException },
    TrackStuckEvent { track: RawTrack, #[serde(rename = "thresholdMs")] threshold_ms: u64 },
    WebSocketClosedEvent { code: u32, reason: String, #[serde(rename = "byRemote")] by_remote: bool },
    SegmentsLoaded { segments: Vec<serde_json::Value> },
    SegmentSkipped { segment: serde_json::Value },
    ChapterStarted { chapter: serde_json::Value },
    ChaptersLoaded { chapters: Vec<serde_json::Value> },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    pub message: Option<String>,
    pub severity: String,
    pub cause: String,
}

/// WebSocket close codes that are terminal for a player (§4.5, §7).
pub const PLAYER_TERMINAL_CLOSE_CODES: &[u32] = &[4014, 4022];
