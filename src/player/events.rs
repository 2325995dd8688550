//! `PlayerStateUpdate` payloads: a before/after pair plus a tag describing
//! which observable attribute changed (§4.5 "State-update event").
//!
//! There is no teacher analog for this (the teacher never models player
//! state as a diffable snapshot); shaped after the `QueueChange` pattern
//! already used in [`crate::queue`], generalized to the whole player.

use crate::filters::FilterPayload;
use crate::ids::{ChannelId, GuildId};
use crate::track::Track;

/// Which attribute of the player changed, driving how hosts render the
/// update (§4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlayerChangeType {
    AutoPlayChange,
    ConnectionChange,
    RepeatChange,
    FilterChange,
    PauseChange,
    QueueChange,
    TrackChange,
    VolumeChange,
    ChannelChange,
    PlayerCreate,
    PlayerDestroy,
}

/// A read-only snapshot of the attributes a [`PlayerStateUpdate`] can diff.
#[derive(Clone, Debug, Default)]
pub struct PlayerSnapshotView {
    pub connected: bool,
    pub playing: bool,
    pub paused: bool,
    pub volume: i64,
    pub track_repeat: bool,
    pub queue_repeat: bool,
    pub dynamic_repeat: bool,
    pub is_autoplay: bool,
    pub voice_channel_id: Option<ChannelId>,
    pub text_channel_id: Option<ChannelId>,
    pub current: Option<Track>,
    pub filters: FilterPayload,
}

/// Emitted on the event bus after every mutation that changes a player's
/// observable state (§4.5, §8 "emitted exactly once").
#[derive(Clone, Debug)]
pub struct PlayerStateUpdate {
    pub guild_id: GuildId,
    pub change_type: PlayerChangeType,
    pub old_state: PlayerSnapshotView,
    pub new_state: PlayerSnapshotView,
}
