//! Crate-wide error type.

use std::fmt::{self, Display, Formatter};

use crate::ids::GuildId;

/// An error produced by any fallible operation in this crate.
#[derive(Debug)]
pub enum Error {
    /// The underlying WebSocket connection failed.
    Ws(tungstenite::error::Error),
    /// A REST request to a node failed at the transport layer.
    Http(reqwest::Error),
    /// Filesystem I/O failed while reading or writing session state.
    Io(std::io::Error),
    /// A JSON payload could not be (de)serialized.
    Json(serde_json::Error),
    /// No node in the pool is currently connected.
    NoUseableNode,
    /// The named node does not exist in the pool.
    NodeNotFound(String),
    /// No player exists for the given guild.
    PlayerNotFound(GuildId),
    /// `set_volume` was called with a value outside `0..=1000`.
    InvalidVolume(i64),
    /// A queue range removal was out of bounds or empty.
    InvalidRange(usize, usize),
    /// `previous()` was called with no history.
    EmptyHistory,
    /// A node exhausted its reconnection budget.
    NodeExhausted(String),
    /// Waiting for a voice state/server update pair timed out.
    VoiceTimeout(GuildId),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::Ws(err) => Display::fmt(err, f),
            Error::Http(err) => Display::fmt(err, f),
            Error::Io(err) => Display::fmt(err, f),
            Error::Json(err) => Display::fmt(err, f),
            Error::NoUseableNode => f.write_str("no connected node is available"),
            Error::NodeNotFound(id) => write!(f, "no node with identifier {:?}", id),
            Error::PlayerNotFound(guild_id) => write!(f, "no player for guild {}", guild_id),
            Error::InvalidVolume(v) => write!(f, "volume {} out of range 0..=1000", v),
            Error::InvalidRange(start, end) => {
                write!(f, "invalid queue range {}..{}", start, end)
            }
            Error::EmptyHistory => f.write_str("no previous track to return to"),
            Error::NodeExhausted(id) => {
                write!(f, "node {:?} exhausted its reconnection budget", id)
            }
            Error::VoiceTimeout(guild_id) => {
                write!(f, "timed out waiting for voice state for guild {}", guild_id)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Ws(err) => Some(err),
            Error::Http(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<tungstenite::error::Error> for Error {
    fn from(err: tungstenite::error::Error) -> Error {
        Error::Ws(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        Error::Http(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
