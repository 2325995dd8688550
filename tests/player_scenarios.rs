//! Cross-module end-to-end scenarios for `Player`, run entirely against
//! `Node::with_rest` + `FakeRest` — no real socket or REST server involved.
//! Mirrors the shape of `Player::handle_node_event` being fed synthetic
//! `IncomingEvent`/`EventData` frames directly, the way a node's websocket
//! loop would dispatch them in production.

mod common;

use std::sync::Arc;

use common::{raw_track, FakeRest};
use magmacore::autoplay::AutoplayResolver;
use magmacore::config::SearchPlatform;
use magmacore::events::{Event, Events, PlayerEvent};
use magmacore::ids::{ChannelId, GuildId};
use magmacore::node::payload::{EventData, TrackEndReason};
use magmacore::node::{Node, NodeOptions};
use magmacore::player::{Player, PlayerCreateOptions};
use magmacore::rest::{LoadResult, VoicePayload};
use magmacore::track::TrackBuilder;

fn builder() -> Arc<TrackBuilder> {
    Arc::new(TrackBuilder::new(Vec::new(), true, &[]))
}

fn no_autoplay() -> Arc<AutoplayResolver> {
    Arc::new(AutoplayResolver::new(&[], None, SearchPlatform::YouTube))
}

fn create_opts(guild: u64) -> PlayerCreateOptions {
    PlayerCreateOptions {
        guild_id: GuildId::new(guild),
        voice_channel_id: ChannelId::new(1),
        text_channel_id: None,
        self_mute: false,
        self_deaf: false,
        volume: 100,
    }
}

fn new_player(guild: u64, node: Node, events: Events, autoplay: Arc<AutoplayResolver>) -> Player {
    Player::new(create_opts(guild), node, events, autoplay, builder(), Arc::new(|_guild, _payload| {}), 20, None)
}

async fn ready_node(rest: Arc<FakeRest>, identifier: &str) -> Node {
    let node = Node::with_rest(NodeOptions::new(identifier, "localhost", ""), rest);
    node.set_session_id(format!("sess-{identifier}")).await;
    node
}

#[tokio::test]
async fn add_and_play_issues_a_track_patch() {
    let rest = Arc::new(FakeRest::new());
    let node = ready_node(rest.clone(), "a").await;
    let player = new_player(1, node, Events::new(), no_autoplay());

    let track = builder().build(raw_track("a", "Song A", "Artist", "youtube"), None);
    player.queue_add(vec![track], None).await.unwrap();
    player.play().await.unwrap();

    assert_eq!(rest.update_call_count(), 1);
}

#[tokio::test]
async fn queue_advances_to_the_next_track_on_natural_finish() {
    let rest = Arc::new(FakeRest::new());
    let node = ready_node(rest.clone(), "a").await;
    let events = Events::new();
    let mut rx = events.subscribe();
    let player = new_player(2, node, events, no_autoplay());

    let a = builder().build(raw_track("a", "Song A", "Artist", "youtube"), None);
    let b = builder().build(raw_track("b", "Song B", "Artist", "youtube"), None);
    player.queue_add(vec![a], None).await.unwrap();
    player.queue_add(vec![b], None).await.unwrap();
    player.play().await.unwrap();

    player
        .handle_node_event(EventData::TrackEndEvent {
            track: raw_track("a", "Song A", "Artist", "youtube"),
            reason: TrackEndReason::Finished,
        })
        .await;

    assert_eq!(rest.update_call_count(), 2);
    assert_eq!(last_current_encoded(&mut rx), Some("b".to_string()));
}

#[tokio::test]
async fn track_repeat_replays_the_same_track_instead_of_advancing() {
    let rest = Arc::new(FakeRest::new());
    let node = ready_node(rest.clone(), "a").await;
    let player = new_player(3, node, Events::new(), no_autoplay());

    let x = builder().build(raw_track("x", "Song X", "Artist", "youtube"), None);
    player.queue_add(vec![x], None).await.unwrap();
    player.set_track_repeat(true).await;
    player.play().await.unwrap();

    player
        .handle_node_event(EventData::TrackEndEvent {
            track: raw_track("x", "Song X", "Artist", "youtube"),
            reason: TrackEndReason::Finished,
        })
        .await;

    // one `update_player` for the initial play, one for the repeat replay
    assert_eq!(rest.update_call_count(), 2);
}

#[tokio::test]
async fn stop_with_an_upcoming_track_advances_past_the_skipped_one() {
    let rest = Arc::new(FakeRest::new());
    let node = ready_node(rest.clone(), "a").await;
    let events = Events::new();
    let mut rx = events.subscribe();
    let player = new_player(4, node, events, no_autoplay());

    let a = builder().build(raw_track("a", "Song A", "Artist", "youtube"), None);
    let b = builder().build(raw_track("b", "Song B", "Artist", "youtube"), None);
    player.queue_add(vec![a], None).await.unwrap();
    player.queue_add(vec![b], None).await.unwrap();
    player.play().await.unwrap();

    player.stop(1).await.unwrap();
    player
        .handle_node_event(EventData::TrackEndEvent {
            track: raw_track("a", "Song A", "Artist", "youtube"),
            reason: TrackEndReason::Stopped,
        })
        .await;

    assert_eq!(last_current_encoded(&mut rx), Some("b".to_string()));
    let snapshot = player.snapshot().await;
    assert_eq!(snapshot.previous.iter().map(|t| t.encoded.as_str()).collect::<Vec<_>>(), vec!["a"]);
}

#[tokio::test]
async fn autoplay_fallback_fills_the_queue_when_it_runs_dry() {
    let rest = Arc::new(FakeRest::with_source_managers(&["deezer"]));
    rest.stub_load(
        "dzrec:a",
        LoadResult::Search(vec![raw_track("rec1", "Recommended", "Someone", "deezer")]),
    );

    let node = ready_node(rest.clone(), "a").await;
    let info = node.rest().info().await.unwrap();
    node.set_info(info).await;

    let autoplay = Arc::new(AutoplayResolver::new(&[SearchPlatform::Deezer], None, SearchPlatform::YouTube));
    let events = Events::new();
    let mut rx = events.subscribe();
    let player = new_player(5, node, events, autoplay);
    player.set_autoplay(true).await;

    let seed = builder().build(raw_track("a", "Song A", "Artist", "deezer"), None);
    player.queue_add(vec![seed], None).await.unwrap();
    player.play().await.unwrap();

    player
        .handle_node_event(EventData::TrackEndEvent {
            track: raw_track("a", "Song A", "Artist", "deezer"),
            reason: TrackEndReason::Finished,
        })
        .await;

    assert_eq!(rest.update_call_count(), 2);
    assert_eq!(last_current_encoded(&mut rx), Some("rec1".to_string()));
}

#[tokio::test]
async fn migrating_to_a_new_node_resumes_playback_position() {
    let rest_a = Arc::new(FakeRest::new());
    let node_a = ready_node(rest_a.clone(), "a").await;

    let rest_b = Arc::new(FakeRest::new());
    let node_b = ready_node(rest_b.clone(), "b").await;

    let player = new_player(6, node_a, Events::new(), no_autoplay());
    let track = builder().build(raw_track("a", "Song A", "Artist", "youtube"), None);
    player.queue_add(vec![track], None).await.unwrap();
    player.play().await.unwrap();
    player.seek(5_000).await.unwrap();

    assert_eq!(player.node_identifier().await, "a");
    let position = player.position_ms().await;

    player.set_node(node_b).await;
    let voice = VoicePayload { token: "t".into(), endpoint: "e".into(), session_id: "s".into() };
    player.set_voice(voice).await.unwrap();
    player.seek(position).await.unwrap();

    assert_eq!(player.node_identifier().await, "b");
    assert_eq!(rest_b.update_call_count(), 2); // voice push + resumed seek
    assert_eq!(player.position_ms().await, position);
}

#[tokio::test]
async fn snapshot_round_trips_queue_and_flags_through_restore() {
    let rest = Arc::new(FakeRest::new());
    let node = ready_node(rest.clone(), "a").await;
    let player = new_player(7, node.clone(), Events::new(), no_autoplay());

    let a = builder().build(raw_track("a", "Song A", "Artist", "youtube"), None);
    let b = builder().build(raw_track("b", "Song B", "Artist", "youtube"), None);
    player.queue_add(vec![a], None).await.unwrap();
    player.queue_add(vec![b], None).await.unwrap();
    player.set_track_repeat(true).await;
    player.set_volume(55).await.unwrap();
    player.nightcore().await.unwrap();

    let snapshot = player.snapshot().await;
    assert_eq!(snapshot.current.as_ref().unwrap().encoded, "a");
    assert_eq!(snapshot.upcoming.len(), 1);
    assert!(snapshot.track_repeat);
    assert_eq!(snapshot.volume, 55);
    assert!(snapshot.filters.timescale.is_some());

    let filters = snapshot.filters.clone();
    let restored = Player::restore(snapshot, node, Events::new(), no_autoplay(), builder(), Arc::new(|_g, _p| {}), 20);
    assert_eq!(restored.guild_id(), player.guild_id());
    assert_eq!(restored.position_ms().await, 0);
    let restored_snapshot = restored.snapshot().await;
    assert_eq!(restored_snapshot.filters.timescale, filters.timescale);
}

#[tokio::test]
async fn snapshot_persists_to_and_is_removed_from_disk() {
    let rest = Arc::new(FakeRest::new());
    let node = ready_node(rest, "a").await;
    // a guild id unlikely to collide with any other test in this binary
    let player = new_player(987_654_321, node, Events::new(), no_autoplay());

    let a = builder().build(raw_track("a", "Song A", "Artist", "youtube"), None);
    player.queue_add(vec![a], None).await.unwrap();

    let snapshot = player.snapshot().await;
    let guild_id = snapshot.guild_id;
    snapshot.save().await.unwrap();

    let all = magmacore::session::PlayerSnapshot::list_all().await.unwrap();
    assert!(all.iter().any(|s| s.guild_id == guild_id));

    magmacore::session::PlayerSnapshot::delete(guild_id).await.unwrap();
    // deleting twice is not an error
    magmacore::session::PlayerSnapshot::delete(guild_id).await.unwrap();
}

fn last_current_encoded(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Option<String> {
    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if let Event::Player(PlayerEvent::StateUpdate(update)) = event {
            last = update.new_state.current.map(|t| t.encoded);
        }
    }
    last
}
