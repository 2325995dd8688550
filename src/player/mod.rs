//! A per-guild player: queue, filters, voice binding, and the playback
//! state machine driven by node `event`/`playerUpdate` frames (§3 "Player",
//! §4.5).
//!
//! Restructures the teacher's `Player` (a cheap handle around an
//! `UnboundedSender<GatewayEvent>` into a dedicated `run()` task) into a
//! handle around one `tokio::sync::Mutex`-guarded state struct: there is no
//! task to run here, since playback is driven by REST calls and inbound
//! node events rather than a raw voice socket this crate owns.

pub mod events;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::autoplay::AutoplayResolver;
use crate::config::VoiceSender;
use crate::error::{Error, Result};
use crate::events::{Event, Events, PlaybackEvent, PlayerEvent};
use crate::filters::FilterStack;
use crate::ids::{ChannelId, GuildId, UserId};
use crate::node::payload::{EventData, PlayerUpdateState, TrackEndReason};
use crate::node::Node;
use crate::player::events::{PlayerChangeType, PlayerSnapshotView, PlayerStateUpdate};
use crate::queue::{Queue, QueueChangeType};
use crate::rest::{PlayerPatch, UpdatePlayerTrack, VoicePayload};
use crate::session::PlayerSnapshot;
use crate::track::{Track, TrackBuilder};

/// How many times in a row autoplay may be invoked after a natural queue
/// exhaustion before giving up and emitting `QueueEnd` (§4.5).
const DEFAULT_MAX_AUTOPLAY_TRIES: u32 = 3;

/// Options a host application supplies to create a player (§4.8 `create`).
#[derive(Clone, Debug)]
pub struct PlayerCreateOptions {
    pub guild_id: GuildId,
    pub voice_channel_id: ChannelId,
    pub text_channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub volume: i64,
}

/// Extra parameters for `play_with`/`play_track_with` (§4.5).
#[derive(Clone, Debug, Default)]
pub struct PlayOptions {
    pub no_replace: bool,
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
    pub volume: Option<i64>,
}

/// The mutable state behind one [`Player`], serialized by a single
/// `tokio::sync::Mutex` (§5 "Per-player state ... serialized through a
/// per-player `tokio::sync::Mutex`").
struct PlayerState {
    queue: Queue,
    filters: FilterStack,
    node: Node,
    voice: Option<VoicePayload>,
    voice_channel_id: Option<ChannelId>,
    text_channel_id: Option<ChannelId>,
    connected: bool,
    playing: bool,
    paused: bool,
    volume: i64,
    position_ms: u64,
    track_repeat: bool,
    queue_repeat: bool,
    dynamic_repeat: bool,
    dynamic_repeat_interval_ms: Option<u64>,
    is_autoplay: bool,
    autoplay_tries: u32,
    /// Set by `stop()` immediately before the REST call that triggers the
    /// resulting `TrackEndEvent{reason: Stopped}`, so the handler can tell a
    /// user-requested skip from an externally-triggered stop (§4.5 "advance
    /// only if ... user explicitly requested skip").
    pending_stop_advance: bool,
    user_data: HashMap<String, Value>,
}

impl PlayerState {
    fn view(&self) -> PlayerSnapshotView {
        PlayerSnapshotView {
            connected: self.connected,
            playing: self.playing,
            paused: self.paused,
            volume: self.volume,
            track_repeat: self.track_repeat,
            queue_repeat: self.queue_repeat,
            dynamic_repeat: self.dynamic_repeat,
            is_autoplay: self.is_autoplay,
            voice_channel_id: self.voice_channel_id,
            text_channel_id: self.text_channel_id,
            current: self.queue.current().cloned(),
            filters: self.filters.to_payload(),
        }
    }
}

struct PlayerInner {
    guild_id: GuildId,
    bot_user_id: Option<UserId>,
    max_autoplay_tries: u32,
    state: Mutex<PlayerState>,
    events: Events,
    autoplay: Arc<AutoplayResolver>,
    builder: Arc<TrackBuilder>,
    send: VoiceSender,
}

/// A handle to one guild's player. Cheaply `Clone`-able; clones share the
/// same underlying state (§5).
#[derive(Clone)]
pub struct Player(Arc<PlayerInner>);

impl Player {
    /// Creates a new player bound to `node` and emits `PlayerCreate`.
    pub fn new(
        opts: PlayerCreateOptions,
        node: Node,
        events: Events,
        autoplay: Arc<AutoplayResolver>,
        builder: Arc<TrackBuilder>,
        send: VoiceSender,
        max_previous_tracks: usize,
        bot_user_id: Option<UserId>,
    ) -> Player {
        let state = PlayerState {
            queue: Queue::new(max_previous_tracks),
            filters: FilterStack::new(),
            node,
            voice: None,
            voice_channel_id: Some(opts.voice_channel_id),
            text_channel_id: opts.text_channel_id,
            connected: false,
            playing: false,
            paused: false,
            volume: opts.volume,
            position_ms: 0,
            track_repeat: false,
            queue_repeat: false,
            dynamic_repeat: false,
            dynamic_repeat_interval_ms: None,
            is_autoplay: false,
            autoplay_tries: 0,
            pending_stop_advance: false,
            user_data: HashMap::new(),
        };

        let player = Player(Arc::new(PlayerInner {
            guild_id: opts.guild_id,
            bot_user_id,
            max_autoplay_tries: DEFAULT_MAX_AUTOPLAY_TRIES,
            state: Mutex::new(state),
            events,
            autoplay,
            builder,
            send,
        }));

        player.0.events.emit(Event::Player(PlayerEvent::Create { guild_id: opts.guild_id }));
        player
    }

    pub fn guild_id(&self) -> GuildId {
        self.0.guild_id
    }

    /// The node currently hosting this player.
    pub async fn node(&self) -> Node {
        self.0.state.lock().await.node.clone()
    }

    /// Shorthand for `node().await.identifier().to_string()`, used by the
    /// manager to find every player hosted on a node being destroyed.
    pub async fn node_identifier(&self) -> String {
        self.0.state.lock().await.node.identifier().to_string()
    }

    /// Shorthand for `node().await.session_id().await`.
    pub async fn node_session_id(&self) -> Option<String> {
        let node = self.node().await;
        node.session_id().await
    }

    /// Swaps the hosting node, for migration (§4.8 `auto_move_node`).
    pub async fn set_node(&self, node: Node) {
        self.0.state.lock().await.node = node;
    }

    pub async fn position_ms(&self) -> u64 {
        self.0.state.lock().await.position_ms
    }

    pub async fn voice_payload(&self) -> Option<VoicePayload> {
        self.0.state.lock().await.voice.clone()
    }

    pub async fn voice_channel_id(&self) -> Option<ChannelId> {
        self.0.state.lock().await.voice_channel_id
    }

    pub async fn set_voice_channel_id(&self, channel_id: ChannelId) {
        self.0.state.lock().await.voice_channel_id = Some(channel_id);
    }

    // ---- voice lifecycle (§4.5 "Voice lifecycle") ----

    /// Sends `{op:4, d:{guild_id, channel_id, self_mute, self_deaf}}`.
    pub async fn connect(&self, channel_id: ChannelId, self_mute: bool, self_deaf: bool) {
        let old = {
            let mut state = self.0.state.lock().await;
            let old = state.voice_channel_id;
            state.voice_channel_id = Some(channel_id);
            old
        };

        (self.0.send)(
            self.0.guild_id,
            serde_json::json!({
                "op": 4,
                "d": {
                    "guild_id": self.0.guild_id.to_string(),
                    "channel_id": channel_id.to_string(),
                    "self_mute": self_mute,
                    "self_deaf": self_deaf,
                }
            }),
        );

        if old != Some(channel_id) {
            self.0.events.emit(Event::Player(PlayerEvent::Move { guild_id: self.0.guild_id, old, new: Some(channel_id) }));
        }
    }

    /// Sends the same payload with `channel_id: null`.
    pub async fn disconnect(&self) {
        {
            let mut state = self.0.state.lock().await;
            state.connected = false;
            state.voice_channel_id = None;
        }

        (self.0.send)(
            self.0.guild_id,
            serde_json::json!({
                "op": 4,
                "d": {
                    "guild_id": self.0.guild_id.to_string(),
                    "channel_id": Value::Null,
                    "self_mute": false,
                    "self_deaf": false,
                }
            }),
        );

        self.0.events.emit(Event::Player(PlayerEvent::Disconnect { guild_id: self.0.guild_id }));
    }

    /// Optionally disconnects, issues REST `destroy_player`, and emits
    /// `PlayerDestroy`. Does not remove the player from any manager's map —
    /// callers own that (§4.5, §9 "circular-ref-as-explicit-handles").
    pub async fn destroy(&self, disconnect: bool) -> Result<()> {
        if disconnect {
            self.disconnect().await;
        }

        let (node, session_id) = {
            let state = self.0.state.lock().await;
            (state.node.clone(), state.node.session_id().await)
        };
        if let Some(session_id) = session_id {
            let _ = node.rest().destroy_player(&session_id, &self.0.guild_id.to_string()).await;
        }

        let _ = PlayerSnapshot::delete(self.0.guild_id).await;
        self.0.events.emit(Event::Player(PlayerEvent::Destroy { guild_id: self.0.guild_id }));
        Ok(())
    }

    /// Removes local voice state without issuing REST `destroy_player`,
    /// leaving the node-side player alone (§4.5 `detach`).
    pub async fn detach(&self) {
        let mut state = self.0.state.lock().await;
        state.connected = false;
        state.voice = None;
    }

    /// Pushes the voice triple for this guild's session, as resolved by
    /// `Manager::update_voice_state` (§4.8 "Voice-packet routing").
    pub async fn set_voice(&self, voice: VoicePayload) -> Result<()> {
        let mut state = self.0.state.lock().await;
        state.voice = Some(voice.clone());
        state.connected = true;
        let node = state.node.clone();
        drop(state);

        let Some(session_id) = node.session_id().await else {
            return Err(Error::NodeNotFound(node.identifier().to_string()));
        };
        let patch = PlayerPatch { voice: Some(voice), ..Default::default() };
        node.rest().update_player(&session_id, &self.0.guild_id.to_string(), &patch, true).await?;
        Ok(())
    }

    // ---- playback operations (§4.5 "Playback operations") ----

    /// Plays `queue.current`; if null, shifts one from `upcoming` first.
    pub async fn play(&self) -> Result<()> {
        let mut state = self.0.state.lock().await;
        if state.queue.current().is_none() {
            if let Some(next) = state.queue.shift() {
                state.queue.set_current(Some(next));
            }
        }
        let Some(track) = state.queue.current().cloned() else {
            return Ok(());
        };
        self.play_current_locked(&mut state, &track, PlayOptions::default()).await
    }

    /// Replaces `current` immediately with `track`.
    pub async fn play_track(&self, track: Track) -> Result<()> {
        self.play_track_with(track, PlayOptions::default()).await
    }

    pub async fn play_with(&self, options: PlayOptions) -> Result<()> {
        let mut state = self.0.state.lock().await;
        if state.queue.current().is_none() {
            if let Some(next) = state.queue.shift() {
                state.queue.set_current(Some(next));
            }
        }
        let Some(track) = state.queue.current().cloned() else {
            return Ok(());
        };
        self.play_current_locked(&mut state, &track, options).await
    }

    pub async fn play_track_with(&self, track: Track, options: PlayOptions) -> Result<()> {
        let mut state = self.0.state.lock().await;
        state.queue.set_current(Some(track.clone()));
        self.play_current_locked(&mut state, &track, options).await
    }

    async fn play_current_locked(&self, state: &mut PlayerState, track: &Track, options: PlayOptions) -> Result<()> {
        let old_view = state.view();
        let node = state.node.clone();
        let Some(session_id) = node.session_id().await else {
            return Err(Error::NodeNotFound(node.identifier().to_string()));
        };

        let patch = PlayerPatch {
            track: Some(UpdatePlayerTrack { encoded: Some(Some(track.encoded.clone())) }),
            position: options.start_time_ms,
            end_time: options.end_time_ms.map(Some),
            volume: options.volume,
            ..Default::default()
        };
        node.rest().update_player(&session_id, &self.0.guild_id.to_string(), &patch, options.no_replace).await?;

        state.playing = true;
        state.paused = false;
        state.position_ms = options.start_time_ms.unwrap_or(0);
        if let Some(volume) = options.volume {
            state.volume = volume;
        }
        let new_view = state.view();
        self.emit_state_update(PlayerChangeType::TrackChange, old_view, new_view);
        Ok(())
    }

    /// Drops `n.saturating_sub(1)` upcoming tracks then asks the node to
    /// stop current, triggering `TrackEndEvent{reason: Stopped}`.
    pub async fn stop(&self, amount: usize) -> Result<()> {
        let mut state = self.0.state.lock().await;
        for _ in 0..amount.saturating_sub(1) {
            if state.queue.shift().is_none() {
                break;
            }
        }
        state.pending_stop_advance = !state.queue.is_empty();

        let node = state.node.clone();
        drop(state);
        let Some(session_id) = node.session_id().await else {
            return Err(Error::NodeNotFound(node.identifier().to_string()));
        };
        node.rest().update_player(&session_id, &self.0.guild_id.to_string(), &PlayerPatch::stop(), true).await?;
        Ok(())
    }

    pub async fn pause(&self, paused: bool) -> Result<()> {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        let node = state.node.clone();
        let Some(session_id) = node.session_id().await else {
            return Err(Error::NodeNotFound(node.identifier().to_string()));
        };
        node.rest()
            .update_player(&session_id, &self.0.guild_id.to_string(), &PlayerPatch { paused: Some(paused), ..Default::default() }, true)
            .await?;
        state.paused = paused;
        let new_view = state.view();
        self.emit_state_update(PlayerChangeType::PauseChange, old_view, new_view);
        Ok(())
    }

    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        let mut state = self.0.state.lock().await;
        let node = state.node.clone();
        let Some(session_id) = node.session_id().await else {
            return Err(Error::NodeNotFound(node.identifier().to_string()));
        };
        node.rest()
            .update_player(&session_id, &self.0.guild_id.to_string(), &PlayerPatch { position: Some(position_ms), ..Default::default() }, true)
            .await?;
        state.position_ms = position_ms;
        Ok(())
    }

    pub async fn set_volume(&self, volume: i64) -> Result<()> {
        if !(0..=1000).contains(&volume) {
            return Err(Error::InvalidVolume(volume));
        }
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        let node = state.node.clone();
        let Some(session_id) = node.session_id().await else {
            return Err(Error::NodeNotFound(node.identifier().to_string()));
        };
        node.rest()
            .update_player(&session_id, &self.0.guild_id.to_string(), &PlayerPatch { volume: Some(volume), ..Default::default() }, true)
            .await?;
        state.volume = volume;
        let new_view = state.view();
        self.emit_state_update(PlayerChangeType::VolumeChange, old_view, new_view);
        Ok(())
    }

    /// Pushes `current` onto the front of upcoming, pops from history into
    /// `current`, restarts playback. Fails if history is empty.
    pub async fn previous(&self) -> Result<()> {
        let mut state = self.0.state.lock().await;
        let Some(prev) = state.queue.pop_history() else {
            return Err(Error::EmptyHistory);
        };
        if let Some(current) = state.queue.current().cloned() {
            state.queue.add(vec![current], Some(0), None);
        }
        let track = prev.clone();
        state.queue.set_current(Some(prev));
        self.play_current_locked(&mut state, &track, PlayOptions::default()).await
    }

    /// Replays `current` from position zero.
    pub async fn restart(&self) -> Result<()> {
        let mut state = self.0.state.lock().await;
        let Some(track) = state.queue.current().cloned() else {
            return Ok(());
        };
        self.play_current_locked(&mut state, &track, PlayOptions::default()).await
    }

    // ---- repeat / autoplay toggles ----

    pub async fn set_track_repeat(&self, on: bool) {
        self.toggle(PlayerChangeType::RepeatChange, |s| {
            s.track_repeat = on;
            if on {
                s.queue_repeat = false;
                s.dynamic_repeat = false;
            }
        })
        .await;
    }

    pub async fn set_queue_repeat(&self, on: bool) {
        self.toggle(PlayerChangeType::RepeatChange, |s| {
            s.queue_repeat = on;
            if on {
                s.track_repeat = false;
                s.dynamic_repeat = false;
            }
        })
        .await;
    }

    pub async fn set_dynamic_repeat(&self, on: bool, interval_ms: Option<u64>) {
        self.toggle(PlayerChangeType::RepeatChange, |s| {
            s.dynamic_repeat = on;
            s.dynamic_repeat_interval_ms = interval_ms;
            if on {
                s.track_repeat = false;
                s.queue_repeat = false;
            }
        })
        .await;
    }

    pub async fn set_autoplay(&self, on: bool) {
        self.toggle(PlayerChangeType::AutoPlayChange, |s| s.is_autoplay = on).await;
    }

    async fn toggle(&self, change: PlayerChangeType, mutate: impl FnOnce(&mut PlayerState)) {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        mutate(&mut state);
        let new_view = state.view();
        self.emit_state_update(change, old_view, new_view);
    }

    // ---- filters (§4.4) ----

    /// Applies `mutate` to the filter stack, then pushes the non-null subset
    /// to the node as a `filters` patch.
    pub async fn update_filters(&self, mutate: impl FnOnce(&mut FilterStack)) -> Result<()> {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        mutate(&mut state.filters);
        let node = state.node.clone();
        let Some(session_id) = node.session_id().await else {
            return Err(Error::NodeNotFound(node.identifier().to_string()));
        };
        node.rest()
            .update_player(
                &session_id,
                &self.0.guild_id.to_string(),
                &PlayerPatch { filters: Some(state.filters.to_payload()), ..Default::default() },
                true,
            )
            .await?;
        let new_view = state.view();
        self.emit_state_update(PlayerChangeType::FilterChange, old_view, new_view);
        Ok(())
    }

    pub async fn clear_filters(&self) -> Result<()> {
        self.update_filters(FilterStack::clear).await
    }

    pub async fn bass_boost(&self, level: i8) -> Result<()> {
        self.update_filters(|f| f.bass_boost(level)).await
    }

    pub async fn nightcore(&self) -> Result<()> {
        self.update_filters(FilterStack::nightcore).await
    }

    pub async fn slowmo(&self) -> Result<()> {
        self.update_filters(FilterStack::slowmo).await
    }

    pub async fn eight_d(&self) -> Result<()> {
        self.update_filters(FilterStack::eight_d).await
    }

    pub async fn vaporwave(&self) -> Result<()> {
        self.update_filters(FilterStack::vaporwave).await
    }

    pub async fn soft(&self) -> Result<()> {
        self.update_filters(FilterStack::soft).await
    }

    pub async fn tv(&self) -> Result<()> {
        self.update_filters(FilterStack::tv).await
    }

    pub async fn party(&self) -> Result<()> {
        self.update_filters(FilterStack::party).await
    }

    pub async fn chipmunk(&self) -> Result<()> {
        self.update_filters(FilterStack::chipmunk).await
    }

    pub async fn china(&self) -> Result<()> {
        self.update_filters(FilterStack::china).await
    }

    pub async fn daycore(&self) -> Result<()> {
        self.update_filters(FilterStack::daycore).await
    }

    pub async fn doubletime(&self) -> Result<()> {
        self.update_filters(FilterStack::doubletime).await
    }

    pub async fn demon(&self) -> Result<()> {
        self.update_filters(FilterStack::demon).await
    }

    pub async fn earrape(&self) -> Result<()> {
        self.update_filters(FilterStack::earrape).await
    }

    pub async fn electronic(&self) -> Result<()> {
        self.update_filters(FilterStack::electronic).await
    }

    pub async fn radio(&self) -> Result<()> {
        self.update_filters(FilterStack::radio).await
    }

    pub async fn tremolo(&self) -> Result<()> {
        self.update_filters(FilterStack::tremolo).await
    }

    pub async fn treble_bass(&self) -> Result<()> {
        self.update_filters(FilterStack::treble_bass).await
    }

    pub async fn pop(&self) -> Result<()> {
        self.update_filters(FilterStack::pop).await
    }

    pub async fn distort(&self) -> Result<()> {
        self.update_filters(FilterStack::distort).await
    }

    pub async fn darth_vader(&self) -> Result<()> {
        self.update_filters(FilterStack::darth_vader).await
    }

    // ---- queue mutation wrappers (§4.3, emits QueueChange exactly once) ----

    pub async fn queue_add(&self, tracks: Vec<Track>, offset: Option<usize>) -> Result<()> {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        let bot_user_id = self.0.bot_user_id;
        let change = state.queue.add(tracks, offset, bot_user_id);
        let new_view = state.view();
        self.emit_queue_change(change.change_type, old_view, new_view);
        Ok(())
    }

    pub async fn queue_remove_at(&self, pos: usize) -> Result<Track> {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        let (track, change) = state.queue.remove_at(pos)?;
        let new_view = state.view();
        self.emit_queue_change(change.change_type, old_view, new_view);
        Ok(track)
    }

    pub async fn queue_remove_range(&self, start: usize, end: usize) -> Result<Vec<Track>> {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        let (tracks, change) = state.queue.remove_range(start, end)?;
        let new_view = state.view();
        self.emit_queue_change(change.change_type, old_view, new_view);
        Ok(tracks)
    }

    pub async fn queue_clear(&self) {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        let change = state.queue.clear();
        let new_view = state.view();
        self.emit_queue_change(change.change_type, old_view, new_view);
    }

    pub async fn queue_shuffle(&self) {
        self.queue_mutate_emit(|q| q.shuffle()).await;
    }

    pub async fn queue_user_block_shuffle(&self) {
        self.queue_mutate_emit(|q| q.user_block_shuffle()).await;
    }

    pub async fn queue_round_robin_shuffle(&self) {
        self.queue_mutate_emit(|q| q.round_robin_shuffle()).await;
    }

    async fn queue_mutate_emit(&self, mutate: impl FnOnce(&mut Queue) -> crate::queue::QueueChange) {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        let change = mutate(&mut state.queue);
        let new_view = state.view();
        self.emit_queue_change(change.change_type, old_view, new_view);
    }

    fn emit_queue_change(&self, _change_type: QueueChangeType, old_view: PlayerSnapshotView, new_view: PlayerSnapshotView) {
        self.emit_state_update(PlayerChangeType::QueueChange, old_view, new_view);
    }

    fn emit_state_update(&self, change_type: PlayerChangeType, old_state: PlayerSnapshotView, new_state: PlayerSnapshotView) {
        self.0.events.emit(Event::Player(PlayerEvent::StateUpdate(PlayerStateUpdate {
            guild_id: self.0.guild_id,
            change_type,
            old_state,
            new_state,
        })));
    }

    // ---- node event dispatch (§4.5 "Event handler") ----

    /// Dispatches one `event`-op frame from this player's hosting node.
    pub async fn handle_node_event(&self, event: EventData) {
        match event {
            EventData::TrackStartEvent { track } => {
                let track = self.builder_track(track).await;
                {
                    let mut state = self.0.state.lock().await;
                    state.playing = true;
                    state.paused = false;
                }
                self.0.events.emit(Event::Playback(PlaybackEvent::TrackStart { guild_id: self.0.guild_id, track }));
            }
            EventData::TrackEndEvent { track, reason } => {
                let track = self.builder_track(track).await;
                self.0.events.emit(Event::Playback(PlaybackEvent::TrackEnd {
                    guild_id: self.0.guild_id,
                    track: track.clone(),
                    reason,
                }));
                self.handle_track_end(reason, track).await;
            }
            EventData::TrackStuckEvent { track, threshold_ms } => {
                let track = self.builder_track(track).await;
                let node = self.node().await;
                if let Some(session_id) = node.session_id().await {
                    let _ = node.rest().update_player(&session_id, &self.0.guild_id.to_string(), &PlayerPatch::stop(), true).await;
                }
                self.0.events.emit(Event::Playback(PlaybackEvent::TrackStuck { guild_id: self.0.guild_id, track, threshold_ms }));
            }
            EventData::TrackExceptionEvent { track, exception } => {
                let track = self.builder_track(track).await;
                let recovered = self.try_autoplay_fallback(&track).await;
                if !recovered {
                    self.0.events.emit(Event::Playback(PlaybackEvent::TrackError {
                        guild_id: self.0.guild_id,
                        track: track.clone(),
                        exception,
                    }));
                    self.advance_after_track_end(track).await;
                }
            }
            EventData::WebSocketClosedEvent { code, reason, by_remote } => {
                self.0.events.emit(Event::Playback(PlaybackEvent::SocketClosed {
                    guild_id: self.0.guild_id,
                    code,
                    reason,
                    by_remote,
                }));
                if crate::node::payload::PLAYER_TERMINAL_CLOSE_CODES.contains(&code) {
                    let _ = self.destroy(true).await;
                }
            }
            EventData::SegmentsLoaded { segments } => {
                self.0.events.emit(Event::SponsorBlock(crate::events::SponsorBlockEvent::SegmentsLoaded {
                    guild_id: self.0.guild_id,
                    segments,
                }));
            }
            EventData::SegmentSkipped { segment } => {
                self.0.events.emit(Event::SponsorBlock(crate::events::SponsorBlockEvent::SegmentSkipped {
                    guild_id: self.0.guild_id,
                    segment,
                }));
            }
            EventData::ChapterStarted { chapter } => {
                self.0.events.emit(Event::SponsorBlock(crate::events::SponsorBlockEvent::ChapterStarted {
                    guild_id: self.0.guild_id,
                    chapter,
                }));
            }
            EventData::ChaptersLoaded { chapters } => {
                self.0.events.emit(Event::SponsorBlock(crate::events::SponsorBlockEvent::ChaptersLoaded {
                    guild_id: self.0.guild_id,
                    chapters,
                }));
            }
        }
    }

    pub async fn handle_player_update(&self, update: PlayerUpdateState) {
        let mut state = self.0.state.lock().await;
        state.connected = update.connected;
        if let Some(position) = update.position {
            state.position_ms = position.max(0) as u64;
        }
    }

    async fn builder_track(&self, raw: crate::track::RawTrack) -> Track {
        let state = self.0.state.lock().await;
        match state.queue.current() {
            Some(current) if current.encoded == raw.encoded => current.clone(),
            _ => self.0.builder.build(raw, None),
        }
    }

    async fn handle_track_end(&self, reason: TrackEndReason, ended_track: Track) {
        match reason {
            TrackEndReason::Replaced => {}
            TrackEndReason::LoadFailed => {
                if !self.try_autoplay_fallback(&ended_track).await {
                    self.advance_after_track_end(ended_track).await;
                }
            }
            TrackEndReason::Stopped => {
                let advance = {
                    let mut state = self.0.state.lock().await;
                    let advance = state.pending_stop_advance && !state.queue.is_empty();
                    state.pending_stop_advance = false;
                    advance
                };
                if advance {
                    self.advance_after_track_end(ended_track).await;
                } else {
                    self.0.events.emit(Event::Playback(PlaybackEvent::QueueEnd { guild_id: self.0.guild_id }));
                }
            }
            TrackEndReason::Finished | TrackEndReason::Cleanup => {
                self.handle_finished(ended_track).await;
            }
        }
    }

    async fn advance_after_track_end(&self, ended_track: Track) {
        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        state.queue.push_history(ended_track);
        match state.queue.shift() {
            Some(next) => {
                state.queue.set_current(Some(next.clone()));
                let _ = self.play_current_locked(&mut state, &next, PlayOptions::default()).await;
            }
            None => {
                state.queue.set_current(None);
                drop(state);
                self.0.events.emit(Event::Playback(PlaybackEvent::QueueEnd { guild_id: self.0.guild_id }));
                return;
            }
        }
        let new_view = state.view();
        self.emit_state_update(PlayerChangeType::TrackChange, old_view, new_view);
    }

    async fn handle_finished(&self, ended_track: Track) {
        let mut state = self.0.state.lock().await;

        if state.track_repeat {
            let track = ended_track.clone();
            let _ = self.play_current_locked(&mut state, &track, PlayOptions::default()).await;
            return;
        }

        if state.queue_repeat {
            state.queue.push_tail(ended_track.clone());
        } else if state.dynamic_repeat {
            state.queue.push_tail(ended_track.clone());
            if state.dynamic_repeat_interval_ms.is_some() {
                state.queue.shuffle();
            }
        } else {
            state.queue.push_history(ended_track.clone());
        }

        let next = state.queue.shift();
        if let Some(next) = next {
            state.queue.set_current(Some(next.clone()));
            let _ = self.play_current_locked(&mut state, &next, PlayOptions::default()).await;
            return;
        }

        state.queue.set_current(None);
        let should_autoplay = state.is_autoplay && state.autoplay_tries < self.0.max_autoplay_tries;
        if !should_autoplay {
            drop(state);
            self.0.events.emit(Event::Playback(PlaybackEvent::QueueEnd { guild_id: self.0.guild_id }));
            return;
        }
        state.autoplay_tries += 1;
        drop(state);

        if !self.try_autoplay_fallback(&ended_track).await {
            self.0.events.emit(Event::Playback(PlaybackEvent::QueueEnd { guild_id: self.0.guild_id }));
        }
    }

    /// Invokes the autoplay resolver for `ended_track`; on success, adds and
    /// plays the result and resets the try counter. Returns whether it
    /// recovered playback.
    async fn try_autoplay_fallback(&self, ended_track: &Track) -> bool {
        let node = self.node().await;
        let candidates = self.0.autoplay.resolve(&node, &self.0.builder, ended_track).await;
        if candidates.is_empty() {
            return false;
        }
        let candidates = crate::autoplay::stamp_autoplay_requester(candidates, self.0.bot_user_id);

        let mut state = self.0.state.lock().await;
        let old_view = state.view();
        state.queue.add(candidates, None, self.0.bot_user_id);
        state.autoplay_tries = 0;
        let Some(track) = state.queue.current().cloned() else {
            return false;
        };
        let result = self.play_current_locked(&mut state, &track, PlayOptions::default()).await;
        let new_view = state.view();
        self.emit_state_update(PlayerChangeType::QueueChange, old_view, new_view);
        result.is_ok()
    }

    // ---- persistence (§4.8 "Persistence") ----

    pub async fn snapshot(&self) -> PlayerSnapshot {
        let state = self.0.state.lock().await;
        PlayerSnapshot {
            guild_id: self.0.guild_id,
            node_identifier: state.node.identifier().to_string(),
            voice_channel_id: state.voice_channel_id,
            text_channel_id: state.text_channel_id,
            voice: state.voice.clone(),
            current: state.queue.current().cloned(),
            upcoming: state.queue.upcoming().cloned().collect(),
            previous: state.queue.previous().cloned().collect(),
            filters: state.filters.to_payload(),
            track_repeat: state.track_repeat,
            queue_repeat: state.queue_repeat,
            dynamic_repeat: state.dynamic_repeat,
            dynamic_repeat_interval_ms: state.dynamic_repeat_interval_ms,
            paused: state.paused,
            volume: state.volume,
            position: state.position_ms,
            is_autoplay: state.is_autoplay,
            autoplay_tries: state.autoplay_tries,
            bot_user_id: self.0.bot_user_id,
            user_data: state.user_data.clone(),
        }
    }

    /// Rehydrates a player from a persisted snapshot against its (possibly
    /// new) hosting node (§4.8 `load_player_states`).
    pub fn restore(
        snapshot: PlayerSnapshot,
        node: Node,
        events: Events,
        autoplay: Arc<AutoplayResolver>,
        builder: Arc<TrackBuilder>,
        send: VoiceSender,
        max_previous_tracks: usize,
    ) -> Player {
        let mut queue = Queue::new(max_previous_tracks);
        queue.set_current(snapshot.current);
        for track in snapshot.previous {
            queue.push_history(track);
        }
        for track in snapshot.upcoming {
            queue.push_tail(track);
        }

        let state = PlayerState {
            queue,
            filters: FilterStack::from_payload(snapshot.filters),
            node,
            voice: snapshot.voice,
            voice_channel_id: snapshot.voice_channel_id,
            text_channel_id: snapshot.text_channel_id,
            connected: false,
            playing: false,
            paused: snapshot.paused,
            volume: snapshot.volume,
            position_ms: snapshot.position,
            track_repeat: snapshot.track_repeat,
            queue_repeat: snapshot.queue_repeat,
            dynamic_repeat: snapshot.dynamic_repeat,
            dynamic_repeat_interval_ms: snapshot.dynamic_repeat_interval_ms,
            is_autoplay: snapshot.is_autoplay,
            autoplay_tries: snapshot.autoplay_tries,
            pending_stop_advance: false,
            user_data: snapshot.user_data,
        };

        let player = Player(Arc::new(PlayerInner {
            guild_id: snapshot.guild_id,
            bot_user_id: snapshot.bot_user_id,
            max_autoplay_tries: DEFAULT_MAX_AUTOPLAY_TRIES,
            state: Mutex::new(state),
            events,
            autoplay,
            builder,
            send,
        }));
        player.0.events.emit(Event::Player(PlayerEvent::Create { guild_id: snapshot.guild_id }));
        player
    }
}
