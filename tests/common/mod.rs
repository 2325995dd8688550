//! A fake `NodeRest` plus track fixtures shared by the player-level
//! end-to-end tests. Keeps those tests off real sockets entirely: a
//! `Node` built with `Node::with_rest` never spawns the connection task
//! that a real `Manager::create_node()` would.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use magmacore::rest::{LoadResult, NodeInfo, NodePlugin, NodeRest, NodeVersion, PlayerPatch, RestPlayer};
use magmacore::track::{RawTrack, RawTrackInfo};
use magmacore::Result;

pub struct FakeRest {
    pub update_calls: Mutex<Vec<PlayerPatch>>,
    loads: Mutex<HashMap<String, LoadResult>>,
    pub source_managers: Vec<String>,
}

impl FakeRest {
    pub fn new() -> FakeRest {
        FakeRest {
            update_calls: Mutex::new(Vec::new()),
            loads: Mutex::new(HashMap::new()),
            source_managers: Vec::new(),
        }
    }

    pub fn with_source_managers(managers: &[&str]) -> FakeRest {
        let mut rest = FakeRest::new();
        rest.source_managers = managers.iter().map(|m| m.to_string()).collect();
        rest
    }

    pub fn stub_load(&self, identifier: impl Into<String>, result: LoadResult) {
        self.loads.lock().unwrap().insert(identifier.into(), result);
    }

    pub fn update_call_count(&self) -> usize {
        self.update_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeRest for FakeRest {
    async fn get_all_players(&self, _session_id: &str) -> Result<Vec<RestPlayer>> {
        Ok(Vec::new())
    }

    async fn update_player(
        &self,
        _session_id: &str,
        _guild_id: &str,
        patch: &PlayerPatch,
        _no_replace: bool,
    ) -> Result<Option<RestPlayer>> {
        self.update_calls.lock().unwrap().push(patch.clone());
        Ok(None)
    }

    async fn destroy_player(&self, _session_id: &str, _guild_id: &str) -> Result<()> {
        Ok(())
    }

    async fn update_session(&self, _session_id: &str, _resuming: bool, _timeout_sec: u64) -> Result<()> {
        Ok(())
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        Ok(self.loads.lock().unwrap().get(identifier).cloned().unwrap_or(LoadResult::Empty))
    }

    async fn decode_tracks(&self, _encoded: &[String]) -> Result<Vec<RawTrack>> {
        Ok(Vec::new())
    }

    async fn info(&self) -> Result<NodeInfo> {
        Ok(NodeInfo {
            version: NodeVersion { semver: "4.0.0".into(), major: 4, minor: 0, patch: 0 },
            source_managers: self.source_managers.clone(),
            filters: Vec::new(),
            plugins: Vec::<NodePlugin>::new(),
        })
    }
}

/// Builds a `RawTrack` fixture whose `uri` is derived from `encoded`, so
/// `Track::identifier_hint` has something to extract.
pub fn raw_track(encoded: &str, title: &str, author: &str, source_name: &str) -> RawTrack {
    RawTrack {
        encoded: encoded.to_string(),
        info: RawTrackInfo {
            identifier: encoded.to_string(),
            is_seekable: true,
            author: author.to_string(),
            length: 200_000,
            is_stream: false,
            position: 0,
            title: title.to_string(),
            uri: Some(format!("https://example.test/{encoded}")),
            artwork_url: None,
            isrc: None,
            source_name: source_name.to_string(),
        },
        plugin_info: None,
    }
}
