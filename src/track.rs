//! Canonical track representation and the builder that projects raw node
//! track payloads (§4.7, "Track builder") into it.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::UserId;

/// Where a track came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceName {
    YouTube,
    Spotify,
    Deezer,
    SoundCloud,
    Tidal,
    VkMusic,
    Qobuz,
    AppleMusic,
    Http,
    Local,
    Unknown,
}

impl SourceName {
    /// Normalizes a node-reported source tag into a [`SourceName`].
    ///
    /// Nodes are inconsistent about casing and aliasing (`"youtube"` vs
    /// `"ytsearch"`, `"vkmusic"` vs `"vk"`), so this goes through a fixed map
    /// rather than a plain `FromStr` derive.
    pub fn normalize(raw: &str) -> SourceName {
        match raw.to_ascii_lowercase().as_str() {
            "youtube" | "ytsearch" | "ytmsearch" => SourceName::YouTube,
            "spotify" | "spsearch" => SourceName::Spotify,
            "deezer" | "dzsearch" | "dzisrc" => SourceName::Deezer,
            "soundcloud" | "scsearch" => SourceName::SoundCloud,
            "tidal" | "tdsearch" => SourceName::Tidal,
            "vkmusic" | "vksearch" | "vk" => SourceName::VkMusic,
            "qobuz" | "qbsearch" => SourceName::Qobuz,
            "applemusic" | "amsearch" => SourceName::AppleMusic,
            "http" | "https" => SourceName::Http,
            "local" => SourceName::Local,
            _ => SourceName::Unknown,
        }
    }
}

/// A field of [`Track`] that may be elided by a [`TrackPartial`] projection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackPartial {
    Title,
    Author,
    Duration,
    IsSeekable,
    IsStream,
    Uri,
    ArtworkUrl,
    Isrc,
    SourceName,
    Requester,
    PluginInfo,
    CustomData,
}

/// A single playable track.
///
/// The opaque `encoded` identifier is always present, even under a
/// [`TrackPartial`] projection that elides every other field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    /// The opaque, node-assigned base64 identifier. Always present.
    pub encoded: String,
    /// Human-readable title. Normalized by [`clean_youtube_credentials`] when
    /// `replace_youtube_credentials` is enabled.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    /// Human-readable author. Normalized alongside `title`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub author: Option<String>,
    /// Duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_seekable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artwork_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub isrc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_name: Option<SourceName>,
    /// The handle of whoever requested this track, used as the comparison
    /// value for autoplay's "is this an autoplay-inserted track" check.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub requester: Option<UserId>,
    /// Plugin-supplied metadata, carried through untouched.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub plugin_info: Option<Value>,
    /// Arbitrary host-application data, never sent back to a node.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub custom_data: HashMap<String, Value>,
}

impl Track {
    /// Resolves an artwork thumbnail at one of a fixed set of sizes.
    ///
    /// Mirrors the node's own `artworkUrl` query-parameter convention; sizes
    /// outside the fixed set fall back to the raw artwork URL.
    pub fn display_thumbnail(&self, size: ThumbnailSize) -> Option<String> {
        let base = self.artwork_url.as_ref()?;
        if self.source_name == Some(SourceName::YouTube) {
            if let Some(id) = youtube_video_id(self.uri.as_deref().unwrap_or_default()) {
                return Some(format!(
                    "https://img.youtube.com/vi/{}/{}.jpg",
                    id,
                    size.youtube_suffix()
                ));
            }
        }
        Some(base.clone())
    }

    /// Extracts a platform-native id from this track's URI, for building a
    /// recommendation-endpoint identifier (e.g. `deezer.com/track/12345` →
    /// `"12345"`). Falls back to the raw `isrc` when there is no URI.
    pub fn identifier_hint(&self) -> Option<String> {
        let uri = self.uri.as_ref()?;
        let without_query = uri.split('?').next().unwrap_or(uri);
        without_query
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .or_else(|| self.isrc.clone())
    }

    /// Applies a [`TrackPartial`] projection in place, dropping every
    /// top-level field not named by `fields`. `encoded` is never dropped.
    pub fn apply_partial(&mut self, fields: &[TrackPartial]) {
        let keep = |f: TrackPartial| fields.contains(&f);
        if !keep(TrackPartial::Title) {
            self.title = None;
        }
        if !keep(TrackPartial::Author) {
            self.author = None;
        }
        if !keep(TrackPartial::Duration) {
            self.duration = None;
        }
        if !keep(TrackPartial::IsSeekable) {
            self.is_seekable = None;
        }
        if !keep(TrackPartial::IsStream) {
            self.is_stream = None;
        }
        if !keep(TrackPartial::Uri) {
            self.uri = None;
        }
        if !keep(TrackPartial::ArtworkUrl) {
            self.artwork_url = None;
        }
        if !keep(TrackPartial::Isrc) {
            self.isrc = None;
        }
        if !keep(TrackPartial::SourceName) {
            self.source_name = None;
        }
        if !keep(TrackPartial::Requester) {
            self.requester = None;
        }
        if !keep(TrackPartial::PluginInfo) {
            self.plugin_info = None;
        }
        if !keep(TrackPartial::CustomData) {
            self.custom_data.clear();
        }
    }
}

/// A thumbnail size accepted by [`Track::display_thumbnail`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThumbnailSize {
    Default,
    Medium,
    High,
    Standard,
    Max,
}

impl ThumbnailSize {
    fn youtube_suffix(self) -> &'static str {
        match self {
            ThumbnailSize::Default => "default",
            ThumbnailSize::Medium => "mqdefault",
            ThumbnailSize::High => "hqdefault",
            ThumbnailSize::Standard => "sddefault",
            ThumbnailSize::Max => "maxresdefault",
        }
    }
}

/// Raw track info as reported by a node's `/v4/loadtracks` or `/v4/decodetracks`
/// response, before canonicalization.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
}

/// A raw track payload as returned by a node.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrack {
    pub encoded: String,
    pub info: RawTrackInfo,
    #[serde(default)]
    pub plugin_info: Option<Value>,
}

/// Builds [`Track`]s from raw node payloads (§4.7).
pub struct TrackBuilder {
    partial: Vec<TrackPartial>,
    replace_youtube_credentials: bool,
    blocked_words: Vec<Regex>,
}

impl TrackBuilder {
    /// Creates a builder with a partial-field projection and the YouTube
    /// title-cleaning toggle from `ManagerOptions`.
    pub fn new(
        partial: Vec<TrackPartial>,
        replace_youtube_credentials: bool,
        blocked_words: &[String],
    ) -> TrackBuilder {
        let blocked_words = blocked_words
            .iter()
            .filter_map(|w| Regex::new(&regex::escape(w)).ok())
            .collect();
        TrackBuilder {
            partial,
            replace_youtube_credentials,
            blocked_words,
        }
    }

    /// Builds one [`Track`] from a raw node payload, attaching `requester`
    /// and an empty `custom_data` map, then applying the partial projection.
    pub fn build(&self, raw: RawTrack, requester: Option<UserId>) -> Track {
        let source_name = SourceName::normalize(&raw.info.source_name);

        let (title, author) = if self.replace_youtube_credentials && source_name == SourceName::YouTube {
            clean_youtube_credentials(&raw.info.title, &raw.info.author, &self.blocked_words)
        } else {
            (raw.info.title, raw.info.author)
        };

        let mut track = Track {
            encoded: raw.encoded,
            title: Some(title),
            author: Some(author),
            duration: Some(raw.info.length),
            is_seekable: Some(raw.info.is_seekable),
            is_stream: Some(raw.info.is_stream),
            uri: raw.info.uri,
            artwork_url: raw.info.artwork_url.or_else(|| {
                (source_name == SourceName::YouTube)
                    .then(|| youtube_video_id(raw.info.identifier.as_str()))
                    .flatten()
                    .map(|id| format!("https://img.youtube.com/vi/{}/hqdefault.jpg", id))
            }),
            isrc: raw.info.isrc,
            source_name: Some(source_name),
            requester,
            plugin_info: raw.plugin_info,
            custom_data: HashMap::new(),
        };

        if !self.partial.is_empty() {
            track.apply_partial(&self.partial);
        }

        track
    }
}

pub(crate) fn youtube_video_id(uri: &str) -> Option<String> {
    let re = Regex::new(r"(?:v=|youtu\.be/)([A-Za-z0-9_-]{11})").ok()?;
    re.captures(uri)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Cleans YouTube-sourced `title`/`author` pairs (§4.7):
///
/// - strips `"- Topic"`/`"Topic -"` suffixes/prefixes that YouTube appends to
///   auto-generated artist channels,
/// - strips a configured list of blocked words (matched as regex-escaped
///   literals),
/// - balances any brackets left dangling by the above, then drops empty
///   bracket pairs and `@`-prefixed handles,
/// - if the cleaned title still contains `" - "` and the left-hand side
///   matches the cleaned author, splits it into a corrected author/title
///   pair.
pub fn clean_youtube_credentials(
    title: &str,
    author: &str,
    blocked_words: &[Regex],
) -> (String, String) {
    let mut author = author
        .trim_end_matches("- Topic")
        .trim_start_matches("Topic -")
        .trim()
        .to_string();

    let mut title = title.to_string();
    for re in blocked_words {
        title = re.replace_all(&title, "").to_string();
        author = re.replace_all(&author, "").to_string();
    }

    title = balance_brackets(&title);
    title = strip_empty_brackets(&title);
    title = strip_at_handles(&title);
    author = strip_at_handles(&author.trim().to_string());

    if let Some(idx) = title.find(" - ") {
        let (left, right) = title.split_at(idx);
        if left.trim().eq_ignore_ascii_case(author.trim()) {
            let right = right.trim_start_matches(" - ").trim().to_string();
            return (right, left.trim().to_string());
        }
    }

    (title.trim().to_string(), author.trim().to_string())
}

fn balance_brackets(input: &str) -> String {
    let mut depth_paren = 0i32;
    let mut depth_bracket = 0i32;
    let mut out = String::new();
    for ch in input.chars() {
        match ch {
            '(' => {
                depth_paren += 1;
                out.push(ch);
            }
            ')' => {
                if depth_paren > 0 {
                    depth_paren -= 1;
                    out.push(ch);
                }
            }
            '[' => {
                depth_bracket += 1;
                out.push(ch);
            }
            ']' => {
                if depth_bracket > 0 {
                    depth_bracket -= 1;
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

fn strip_empty_brackets(input: &str) -> String {
    let re = Regex::new(r"\(\s*\)|\[\s*\]").unwrap();
    re.replace_all(input, "").trim().to_string()
}

fn strip_at_handles(input: &str) -> String {
    let re = Regex::new(r"@\S+").unwrap();
    re.replace_all(input, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_sources() {
        assert_eq!(SourceName::normalize("ytsearch"), SourceName::YouTube);
        assert_eq!(SourceName::normalize("DEEZER"), SourceName::Deezer);
        assert_eq!(SourceName::normalize("something-else"), SourceName::Unknown);
    }

    #[test]
    fn partial_projection_keeps_encoded() {
        let mut track = Track {
            encoded: "abc".into(),
            title: Some("t".into()),
            author: Some("a".into()),
            duration: Some(1000),
            is_seekable: Some(true),
            is_stream: Some(false),
            uri: Some("u".into()),
            artwork_url: Some("art".into()),
            isrc: None,
            source_name: Some(SourceName::YouTube),
            requester: None,
            plugin_info: None,
            custom_data: HashMap::new(),
        };
        track.apply_partial(&[TrackPartial::Title]);
        assert_eq!(track.encoded, "abc");
        assert_eq!(track.title, Some("t".into()));
        assert!(track.author.is_none());
        assert!(track.duration.is_none());
    }

    #[test]
    fn cleans_topic_suffix_and_splits_title() {
        let (title, author) =
            clean_youtube_credentials("Artist Name - Song Title", "Artist Name - Topic", &[]);
        assert_eq!(author, "Artist Name");
        assert_eq!(title, "Song Title");
    }

    #[test]
    fn strips_blocked_words_and_balances_brackets() {
        let blocked = vec![Regex::new(&regex::escape("(Official Video)")).unwrap()];
        let (title, _) = clean_youtube_credentials("Song (Official Video)", "Artist", &blocked);
        assert_eq!(title, "Song");
    }
}
