//! Id aliases shared across the crate.

use twilight_model::id::{
    marker::{ChannelMarker, GuildMarker, UserMarker},
    Id,
};

/// A guild (chat-platform tenant) id; the primary partitioning key for players.
pub type GuildId = Id<GuildMarker>;
/// A voice channel id.
pub type ChannelId = Id<ChannelMarker>;
/// A user id, used for the client's own id and for track requesters.
pub type UserId = Id<UserMarker>;
