//! On-disk session persistence (§4.2 "Session persistence", §4.8
//! "Persistence", §6 "Persisted state").
//!
//! Generalizes the teacher's in-memory-only state into crash-safe,
//! atomically-replaced JSON files under the process working directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;
use crate::filters::FilterPayload;
use crate::ids::{ChannelId, GuildId, UserId};
use crate::rest::VoicePayload;
use crate::track::Track;

/// Root directory for all persisted state, relative to the process's
/// current working directory.
pub fn root_dir() -> PathBuf {
    PathBuf::from("magmacore/session-data")
}

fn session_ids_path() -> PathBuf {
    root_dir().join("session-ids.json")
}

fn players_dir() -> PathBuf {
    root_dir().join("players")
}

fn player_path(guild_id: GuildId) -> PathBuf {
    players_dir().join(format!("{}.json", guild_id))
}

/// Writes `contents` to `path` by first writing a sibling temp file, then
/// renaming over the destination — the only way to guarantee a reader never
/// observes a half-written file (§5 "file replacement is atomic").
async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Persisted mapping of `"{identifier}:{clusterId}"` to a node's last known
/// session id (§4.2).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionIdMap(pub HashMap<String, String>);

impl SessionIdMap {
    pub async fn load() -> SessionIdMap {
        match fs::read(session_ids_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => SessionIdMap::default(),
        }
    }

    pub async fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write(&session_ids_path(), &bytes).await
    }

    pub fn key(identifier: &str, cluster_id: u32) -> String {
        format!("{identifier}:{cluster_id}")
    }
}

/// A point-in-time snapshot of one player, written by
/// [`crate::manager::Manager::save_player_state`] and read back by
/// `load_player_states`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub guild_id: GuildId,
    pub node_identifier: String,
    pub voice_channel_id: Option<ChannelId>,
    pub text_channel_id: Option<ChannelId>,
    pub voice: Option<VoicePayload>,
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub previous: Vec<Track>,
    pub filters: FilterPayload,
    pub track_repeat: bool,
    pub queue_repeat: bool,
    pub dynamic_repeat: bool,
    pub dynamic_repeat_interval_ms: Option<u64>,
    pub paused: bool,
    pub volume: i64,
    pub position: u64,
    pub is_autoplay: bool,
    pub autoplay_tries: u32,
    pub bot_user_id: Option<UserId>,
    pub user_data: HashMap<String, serde_json::Value>,
}

impl PlayerSnapshot {
    pub async fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write(&player_path(self.guild_id), &bytes).await
    }

    pub async fn delete(guild_id: GuildId) -> Result<()> {
        match fs::remove_file(player_path(guild_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Lists every persisted snapshot, for startup restoration and shutdown
    /// cleanup.
    pub async fn list_all() -> Result<Vec<PlayerSnapshot>> {
        let dir = players_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(bytes) = fs::read(entry.path()).await {
                if let Ok(snapshot) = serde_json::from_slice(&bytes) {
                    snapshots.push(snapshot);
                }
            }
        }
        Ok(snapshots)
    }
}
