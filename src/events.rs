//! The crate-wide event bus (§4.9).
//!
//! Built on `tokio::sync::broadcast` rather than the teacher's single-reader
//! `mpsc` channels: host applications commonly attach more than one listener
//! (logging, metrics, command replies) to the same stream of events, and
//! `broadcast` is the multi-consumer fan-out primitive `tokio::sync` offers
//! for that, each subscriber getting its own cursor over the same log.

use tokio::sync::broadcast;

use crate::ids::{ChannelId, GuildId};
use crate::node::payload::{TrackEndReason, TrackException};
use crate::player::events::PlayerStateUpdate;
use crate::track::Track;

/// Default channel capacity; a slow subscriber that falls this far behind
/// starts missing events rather than applying backpressure to the rest of
/// the system.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub enum NodeEvent {
    Create { identifier: String },
    Destroy { identifier: String },
    Connect { identifier: String },
    Reconnect { identifier: String },
    Disconnect { identifier: String },
    Error { identifier: String, message: String },
    /// An unrecognized or plugin-defined frame, passed through verbatim.
    Raw { identifier: String, payload: serde_json::Value },
}

#[derive(Clone, Debug)]
pub enum PlayerEvent {
    Create { guild_id: GuildId },
    Destroy { guild_id: GuildId },
    StateUpdate(PlayerStateUpdate),
    Move { guild_id: GuildId, old: Option<ChannelId>, new: Option<ChannelId> },
    Disconnect { guild_id: GuildId },
}

#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    TrackStart { guild_id: GuildId, track: Track },
    TrackEnd { guild_id: GuildId, track: Track, reason: TrackEndReason },
    TrackStuck { guild_id: GuildId, track: Track, threshold_ms: u64 },
    TrackError { guild_id: GuildId, track: Track, exception: TrackException },
    QueueEnd { guild_id: GuildId },
    SocketClosed { guild_id: GuildId, code: u32, reason: String, by_remote: bool },
}

#[derive(Clone, Debug)]
pub enum SponsorBlockEvent {
    SegmentsLoaded { guild_id: GuildId, segments: Vec<serde_json::Value> },
    SegmentSkipped { guild_id: GuildId, segment: serde_json::Value },
    ChapterStarted { guild_id: GuildId, chapter: serde_json::Value },
    ChaptersLoaded { guild_id: GuildId, chapters: Vec<serde_json::Value> },
}

/// Every category a subscriber can receive through one [`Events`] handle
/// (§4.9).
#[derive(Clone, Debug)]
pub enum Event {
    Debug(String),
    Node(NodeEvent),
    Player(PlayerEvent),
    Playback(PlaybackEvent),
    SponsorBlock(SponsorBlockEvent),
}

/// A cheaply-`Clone`-able handle to the event bus. Cloning shares the same
/// underlying broadcast channel, mirroring the teacher's `Manager`/
/// `ManagerRef` split.
#[derive(Clone)]
pub struct Events {
    tx: broadcast::Sender<Event>,
}

impl Events {
    pub fn new() -> Events {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Events { tx }
    }

    /// A new independent receiver positioned at the current tail of the log.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishes an event. Returns the number of active subscribers that
    /// received it; `Err` only if there are none, which is not itself an
    /// error condition for the caller.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(Event::Debug(message.into()));
    }
}

impl Default for Events {
    fn default() -> Events {
        Events::new()
    }
}
