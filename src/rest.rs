//! Typed REST operations against one audio node (§4.1, §6).
//!
//! The teacher has no REST client of its own (it only speaks Discord's voice
//! WebSocket/UDP); this is enriched from `Hardcoreprawn-music-minder`'s
//! `reqwest`-based HTTP usage, kept as a thin typed wrapper in the same
//! spirit as the teacher's thin wrapper around `async-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::filters::FilterPayload;
use crate::track::RawTrack;

/// Tri-state wrapper distinguishing "field omitted" from "field explicitly
/// set to null" in a JSON PATCH body.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UpdatePlayerTrack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<Option<String>>,
}

/// The voice triple pushed to a node so it can join the same voice session
/// the chat platform has granted the client (§3 "Voice state", §4.8).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePayload {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// `PATCH /v4/sessions/{sid}/players/{guildId}` body (§6).
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdatePlayerTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoicePayload>,
}

impl PlayerPatch {
    /// A patch that replaces the current track (`noReplace=false` is
    /// expressed by the caller's query string, not this body).
    pub fn play(encoded: impl Into<String>) -> PlayerPatch {
        PlayerPatch {
            track: Some(UpdatePlayerTrack {
                encoded: Some(Some(encoded.into())),
            }),
            ..Default::default()
        }
    }

    /// A patch that stops playback by explicitly nulling the track.
    pub fn stop() -> PlayerPatch {
        PlayerPatch {
            track: Some(UpdatePlayerTrack { encoded: Some(None) }),
            ..Default::default()
        }
    }
}

/// A live player as reported by `GET /v4/sessions/{sid}/players`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestPlayer {
    pub guild_id: String,
    pub track: Option<RawTrack>,
    pub volume: i64,
    pub paused: bool,
    pub voice: RestVoiceState,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestVoiceState {
    pub token: Option<String>,
    pub endpoint: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub ping: i64,
}

/// Node-reported capabilities (`GET /v4/info`).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: NodeVersion,
    #[serde(rename = "sourceManagers")]
    pub source_managers: Vec<String>,
    pub filters: Vec<String>,
    pub plugins: Vec<NodePlugin>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVersion {
    pub semver: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NodePlugin {
    pub name: String,
    pub version: String,
}

/// `GET /v4/loadtracks` result, mapped from the node's `loadType` (§4.8).
#[derive(Clone, Debug)]
pub enum LoadResult {
    Track(RawTrack),
    Search(Vec<RawTrack>),
    Playlist {
        name: String,
        selected_track: Option<usize>,
        tracks: Vec<RawTrack>,
        duration_ms: u64,
    },
    Empty,
    Error(LoadException),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadException {
    pub message: String,
    pub severity: String,
    pub cause: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoadResult {
    load_type: String,
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlaylistData {
    info: RawPlaylistInfo,
    tracks: Vec<RawTrack>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlaylistInfo {
    name: String,
    #[serde(rename = "selectedTrack")]
    selected_track: i64,
}

/// The node-facing REST surface a [`crate::node::Node`] depends on,
/// abstracted behind a trait so tests can exercise the player/manager state
/// machine against an in-process fake instead of a real node (§4.12).
#[async_trait]
pub trait NodeRest: Send + Sync {
    async fn get_all_players(&self, session_id: &str) -> Result<Vec<RestPlayer>>;
    async fn update_player(
        &self,
        session_id: &str,
        guild_id: &str,
        patch: &PlayerPatch,
        no_replace: bool,
    ) -> Result<Option<RestPlayer>>;
    async fn destroy_player(&self, session_id: &str, guild_id: &str) -> Result<()>;
    async fn update_session(&self, session_id: &str, resuming: bool, timeout_sec: u64) -> Result<()>;
    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult>;
    async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<RawTrack>>;
    async fn info(&self) -> Result<NodeInfo>;
}

/// A minimal typed REST client for one audio node.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    password: String,
}

impl RestClient {
    /// Creates a client bound to one node's address, applying its configured
    /// `request_timeout` to every request.
    pub fn new(host: &str, port: u16, secure: bool, password: impl Into<String>, request_timeout: Duration) -> RestClient {
        let scheme = if secure { "https" } else { "http" };
        RestClient {
            http: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("reqwest client builds"),
            base_url: format!("{}://{}:{}", scheme, host, port),
            password: password.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Escape hatch for plugin-scoped endpoints (lyrics, sponsor segments)
    /// this client does not model directly.
    pub async fn raw_get(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .header("Authorization", &self.password)
            .send()
            .await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl NodeRest for RestClient {
    /// `GET /v4/sessions/{sid}/players`.
    async fn get_all_players(&self, session_id: &str) -> Result<Vec<RestPlayer>> {
        let resp = self
            .http
            .get(self.url(&format!("/v4/sessions/{session_id}/players")))
            .header("Authorization", &self.password)
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    /// `PATCH /v4/sessions/{sid}/players/{guildId}?noReplace=..`.
    ///
    /// Returns `Ok(None)` on a "Guild not found" body message (normalized to
    /// empty, non-error per §4.1) and on a bare transport failure; returns
    /// `Err` on a 404, which the caller should treat as node-level loss.
    async fn update_player(
        &self,
        session_id: &str,
        guild_id: &str,
        patch: &PlayerPatch,
        no_replace: bool,
    ) -> Result<Option<RestPlayer>> {
        let resp = match self
            .http
            .patch(self.url(&format!(
                "/v4/sessions/{session_id}/players/{guild_id}?noReplace={no_replace}"
            )))
            .header("Authorization", &self.password)
            .header("Content-Type", "application/json")
            .json(patch)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(_) => return Ok(None),
        };

        if resp.status().as_u16() == 404 {
            return match guild_id.parse() {
                Ok(id) => Err(Error::PlayerNotFound(crate::ids::GuildId::new(id))),
                Err(_) => Err(Error::NodeNotFound(guild_id.to_string())),
            };
        }

        let body: Value = resp.json().await?;
        if is_guild_not_found(&body) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(body)?))
    }

    /// `DELETE /v4/sessions/{sid}/players/{guildId}`.
    async fn destroy_player(&self, session_id: &str, guild_id: &str) -> Result<()> {
        let _ = self
            .http
            .delete(self.url(&format!("/v4/sessions/{session_id}/players/{guild_id}")))
            .header("Authorization", &self.password)
            .send()
            .await;
        Ok(())
    }

    /// `PATCH /v4/sessions/{sid}` with `{resuming, timeout}`.
    async fn update_session(&self, session_id: &str, resuming: bool, timeout_sec: u64) -> Result<()> {
        #[derive(Serialize)]
        struct Body {
            resuming: bool,
            timeout: u64,
        }
        self.http
            .patch(self.url(&format!("/v4/sessions/{session_id}")))
            .header("Authorization", &self.password)
            .json(&Body {
                resuming,
                timeout: timeout_sec,
            })
            .send()
            .await?;
        Ok(())
    }

    /// `GET /v4/loadtracks?identifier=<urlencoded>`.
    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        let encoded = urlencoding::encode(identifier);
        let resp = self
            .http
            .get(self.url(&format!("/v4/loadtracks?identifier={encoded}")))
            .header("Authorization", &self.password)
            .send()
            .await?;
        let raw: RawLoadResult = resp.json().await?;
        map_load_result(raw)
    }

    /// `POST /v4/decodetracks` with a JSON array of base64 identifiers.
    async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<RawTrack>> {
        let resp = self
            .http
            .post(self.url("/v4/decodetracks"))
            .header("Authorization", &self.password)
            .json(encoded)
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    /// `GET /v4/info`.
    async fn info(&self) -> Result<NodeInfo> {
        let resp = self
            .http
            .get(self.url("/v4/info"))
            .header("Authorization", &self.password)
            .send()
            .await?;
        Ok(resp.json().await?)
    }
}

fn is_guild_not_found(body: &Value) -> bool {
    body.get("message")
        .and_then(Value::as_str)
        .map(|m| m.eq_ignore_ascii_case("Guild not found"))
        .unwrap_or(false)
}

fn map_load_result(raw: RawLoadResult) -> Result<LoadResult> {
    Ok(match raw.load_type.as_str() {
        "track" => LoadResult::Track(serde_json::from_value(raw.data)?),
        "search" => LoadResult::Search(serde_json::from_value(raw.data)?),
        "playlist" => {
            let data: RawPlaylistData = serde_json::from_value(raw.data)?;
            let duration_ms = data.tracks.iter().filter_map(|t| Some(t.info.length)).sum();
            LoadResult::Playlist {
                name: data.info.name,
                selected_track: (data.info.selected_track >= 0)
                    .then_some(data.info.selected_track as usize),
                tracks: data.tracks,
                duration_ms,
            }
        }
        "empty" => LoadResult::Empty,
        "error" => LoadResult::Error(serde_json::from_value(raw.data)?),
        _ => LoadResult::Empty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_patch_sets_explicit_track() {
        let patch = PlayerPatch::play("abc");
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value["track"]["encoded"], "abc");
    }

    #[test]
    fn stop_patch_nulls_track_explicitly() {
        let patch = PlayerPatch::stop();
        let value = serde_json::to_value(&patch).unwrap();
        assert!(value["track"]["encoded"].is_null());
    }

    #[test]
    fn guild_not_found_detection() {
        let body = serde_json::json!({ "message": "Guild not found" });
        assert!(is_guild_not_found(&body));
        let body = serde_json::json!({ "message": "Some other error" });
        assert!(!is_guild_not_found(&body));
    }
}
