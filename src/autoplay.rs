//! Autoplay: given a track nearing its end, resolve a continuation (§4.6).
//!
//! No teacher analog exists (the teacher has no search/recommendation
//! layer at all); grounded on `examples/other_examples/` Spotify/TOTP and
//! HTML-scraping snippets, with the pluggable-strategy shape expressed as
//! an `async_trait`, matching the teacher's own use of `async_trait` for
//! its pluggable codec/source boundaries.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::seq::SliceRandom;
use rand::thread_rng;
use regex::Regex;
use sha1::Sha1;

use crate::config::SearchPlatform;
use crate::ids::UserId;
use crate::node::Node;
use crate::rest::LoadResult;
use crate::track::{Track, TrackBuilder};

/// Produces 0..N candidate continuations for one ending track. Implementors
/// must never echo back the seed track's own URI (§4.6).
#[async_trait]
pub trait RecommendationStrategy: Send + Sync {
    fn platform(&self) -> SearchPlatform;

    async fn recommend(&self, node: &Node, builder: &TrackBuilder, seed: &Track) -> Vec<Track>;
}

/// Re-searches `"<author> - <title>"` against `platform` when `seed`'s URI
/// does not already belong to that platform, returning the top hit as a
/// substitute seed (§4.6 "If the input track's URI is not of the target
/// platform...").
async fn rebase_seed(
    node: &Node,
    builder: &TrackBuilder,
    platform: SearchPlatform,
    seed: &Track,
) -> Option<Track> {
    let query = format!(
        "{}:{} - {}",
        platform.prefix(),
        seed.author.as_deref().unwrap_or_default(),
        seed.title.as_deref().unwrap_or_default(),
    );
    match node.rest().load_tracks(&query).await.ok()? {
        LoadResult::Search(tracks) | LoadResult::Playlist { tracks, .. } => {
            tracks.into_iter().next().map(|raw| builder.build(raw, None))
        }
        LoadResult::Track(raw) => Some(builder.build(raw, None)),
        _ => None,
    }
}

fn excludes_seed_uri<'a>(seed: &Track, tracks: impl IntoIterator<Item = Track> + 'a) -> Vec<Track> {
    tracks
        .into_iter()
        .filter(|t| match (&t.uri, &seed.uri) {
            (Some(a), Some(b)) => a != b,
            _ => true,
        })
        .collect()
}

/// `deezer` / `tidal` / `vkmusic` / `qobuz`: query the hosting node's
/// `loadtracks?identifier=<prefix>rec:<id>` recommendation endpoint.
pub struct NodeRecommendationStrategy {
    platform: SearchPlatform,
    rec_prefix: &'static str,
}

impl NodeRecommendationStrategy {
    pub fn deezer() -> NodeRecommendationStrategy {
        NodeRecommendationStrategy { platform: SearchPlatform::Deezer, rec_prefix: "dzrec" }
    }

    pub fn tidal() -> NodeRecommendationStrategy {
        NodeRecommendationStrategy { platform: SearchPlatform::Tidal, rec_prefix: "tdrec" }
    }

    pub fn vkmusic() -> NodeRecommendationStrategy {
        NodeRecommendationStrategy { platform: SearchPlatform::VkMusic, rec_prefix: "vkrec" }
    }

    pub fn qobuz() -> NodeRecommendationStrategy {
        NodeRecommendationStrategy { platform: SearchPlatform::Qobuz, rec_prefix: "qbrec" }
    }
}

#[async_trait]
impl RecommendationStrategy for NodeRecommendationStrategy {
    fn platform(&self) -> SearchPlatform {
        self.platform
    }

    async fn recommend(&self, node: &Node, builder: &TrackBuilder, seed: &Track) -> Vec<Track> {
        let seed = match rebase_seed(node, builder, self.platform, seed).await {
            Some(rebased) => rebased,
            None => seed.clone(),
        };
        let Some(identifier) = seed.identifier_hint() else {
            return Vec::new();
        };
        let query = format!("{}:{}", self.rec_prefix, identifier);
        let tracks = match node.rest().load_tracks(&query).await {
            Ok(LoadResult::Search(tracks)) | Ok(LoadResult::Playlist { tracks, .. }) => tracks,
            Ok(LoadResult::Track(raw)) => vec![raw],
            _ => return Vec::new(),
        };
        excludes_seed_uri(&seed, tracks.into_iter().map(|raw| builder.build(raw, None)))
    }
}

/// `soundcloud`: scrape `<track-uri>/recommended` for anchor hrefs in the
/// recommended section, pick one at random, then search it.
pub struct SoundCloudStrategy {
    http: reqwest::Client,
}

impl SoundCloudStrategy {
    pub fn new() -> SoundCloudStrategy {
        SoundCloudStrategy { http: reqwest::Client::new() }
    }
}

impl Default for SoundCloudStrategy {
    fn default() -> SoundCloudStrategy {
        SoundCloudStrategy::new()
    }
}

#[async_trait]
impl RecommendationStrategy for SoundCloudStrategy {
    fn platform(&self) -> SearchPlatform {
        SearchPlatform::SoundCloud
    }

    async fn recommend(&self, node: &Node, builder: &TrackBuilder, seed: &Track) -> Vec<Track> {
        let seed = match rebase_seed(node, builder, self.platform(), seed).await {
            Some(rebased) => rebased,
            None => seed.clone(),
        };
        let Some(uri) = seed.uri.as_ref() else {
            return Vec::new();
        };

        let html = match self.http.get(format!("{uri}/recommended")).send().await {
            Ok(resp) => match resp.text().await {
                Ok(text) => text,
                Err(_) => return Vec::new(),
            },
            Err(_) => return Vec::new(),
        };

        let href_re = Regex::new(r#"href="(https://soundcloud\.com/[^"]+)""#).expect("valid regex");
        let mut candidates: Vec<&str> = href_re
            .captures_iter(&html)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|href| *href != uri)
            .collect();
        candidates.dedup();

        let Some(picked) = candidates.choose(&mut thread_rng()) else {
            return Vec::new();
        };

        match node.rest().load_tracks(picked).await {
            Ok(LoadResult::Track(raw)) => vec![builder.build(raw, None)],
            Ok(LoadResult::Search(tracks)) => tracks.into_iter().take(1).map(|raw| builder.build(raw, None)).collect(),
            _ => Vec::new(),
        }
    }
}

/// `youtube`: derive a video id (from the seed's URI, or by searching
/// `title author`), construct a mix-playlist URL, and search it.
pub struct YouTubeStrategy;

#[async_trait]
impl RecommendationStrategy for YouTubeStrategy {
    fn platform(&self) -> SearchPlatform {
        SearchPlatform::YouTube
    }

    async fn recommend(&self, node: &Node, builder: &TrackBuilder, seed: &Track) -> Vec<Track> {
        let video_id = match crate::track::youtube_video_id(seed.uri.as_deref().unwrap_or_default()) {
            Some(id) => Some(id),
            None => match rebase_seed(node, builder, self.platform(), seed).await {
                Some(rebased) => crate::track::youtube_video_id(rebased.uri.as_deref().unwrap_or_default()),
                None => None,
            },
        };
        let Some(video_id) = video_id else {
            return Vec::new();
        };

        let index = 2 + (unix_seconds() % 23);
        let mix_url = format!("https://www.youtube.com/watch?v={video_id}&list=RD{video_id}&index={index}");

        match node.rest().load_tracks(&mix_url).await {
            Ok(LoadResult::Playlist { tracks, .. }) | Ok(LoadResult::Search(tracks)) => {
                excludes_seed_uri(seed, tracks.into_iter().map(|raw| builder.build(raw, None)))
            }
            _ => Vec::new(),
        }
    }
}

type HmacSha1 = Hmac<Sha1>;

/// The fixed shared secret open Lavalink Spotify plugins derive their
/// client-token TOTP from. Best-effort: Spotify rotates this without notice,
/// so this strategy is expected to routinely return zero results.
const SPOTIFY_TOTP_SECRET: &[u8] = b"5507145853487499592248630329!";

fn spotify_totp() -> String {
    let counter = unix_seconds() / 30;
    let mut mac = HmacSha1::new_from_slice(SPOTIFY_TOTP_SECRET).expect("any key length is valid for HMAC");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);
    format!("{:06}", binary % 1_000_000)
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `spotify`: derive a TOTP-backed access token, call the recommendations
/// endpoint with the seed as `seed_tracks`, pick one candidate at random,
/// then resolve it through the default search platform.
pub struct SpotifyStrategy {
    http: reqwest::Client,
}

impl SpotifyStrategy {
    pub fn new() -> SpotifyStrategy {
        SpotifyStrategy { http: reqwest::Client::new() }
    }
}

impl Default for SpotifyStrategy {
    fn default() -> SpotifyStrategy {
        SpotifyStrategy::new()
    }
}

#[derive(serde::Deserialize)]
struct SpotifyTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(serde::Deserialize)]
struct SpotifyRecommendations {
    tracks: Vec<SpotifyRecTrack>,
}

#[derive(serde::Deserialize)]
struct SpotifyRecTrack {
    id: String,
    name: String,
    artists: Vec<SpotifyArtist>,
}

#[derive(serde::Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[async_trait]
impl RecommendationStrategy for SpotifyStrategy {
    fn platform(&self) -> SearchPlatform {
        SearchPlatform::Spotify
    }

    async fn recommend(&self, node: &Node, builder: &TrackBuilder, seed: &Track) -> Vec<Track> {
        let seed = match rebase_seed(node, builder, self.platform(), seed).await {
            Some(rebased) => rebased,
            None => seed.clone(),
        };
        let Some(seed_id) = seed.identifier_hint() else {
            return Vec::new();
        };

        let totp = spotify_totp();
        let token_url = format!(
            "https://open.spotify.com/api/token?reason=transport&productType=web_player&totp={totp}&totpVer=5"
        );
        let access_token = match self.http.get(&token_url).send().await {
            Ok(resp) => match resp.json::<SpotifyTokenResponse>().await {
                Ok(body) => body.access_token,
                Err(_) => return Vec::new(),
            },
            Err(_) => return Vec::new(),
        };

        let rec_url = format!(
            "https://api.spotify.com/v1/recommendations?seed_tracks={seed_id}&limit=10"
        );
        let recs = match self
            .http
            .get(&rec_url)
            .bearer_auth(access_token)
            .send()
            .await
        {
            Ok(resp) => match resp.json::<SpotifyRecommendations>().await {
                Ok(body) => body.tracks,
                Err(_) => return Vec::new(),
            },
            Err(_) => return Vec::new(),
        };

        let Some(picked) = recs.choose(&mut thread_rng()) else {
            return Vec::new();
        };
        let artist = picked.artists.first().map(|a| a.name.as_str()).unwrap_or_default();
        let query = format!("spsearch:{} - {}", artist, picked.name);

        match node.rest().load_tracks(&query).await {
            Ok(LoadResult::Search(tracks)) => tracks.into_iter().take(1).map(|raw| builder.build(raw, None)).collect(),
            Ok(LoadResult::Track(raw)) => vec![builder.build(raw, None)],
            _ => Vec::new(),
        }
    }
}

/// Queries a last-resort metadata service by `(artist, title)` when every
/// platform strategy returns empty, then searches the result via the
/// default search platform (§4.6 step 3).
pub struct LastFmFallback {
    http: reqwest::Client,
    api_key: String,
}

impl LastFmFallback {
    pub fn new(api_key: impl Into<String>) -> LastFmFallback {
        LastFmFallback { http: reqwest::Client::new(), api_key: api_key.into() }
    }

    pub async fn recommend(
        &self,
        node: &Node,
        builder: &TrackBuilder,
        default_platform: SearchPlatform,
        seed: &Track,
    ) -> Vec<Track> {
        let artist = seed.author.as_deref().unwrap_or_default();
        let title = seed.title.as_deref().unwrap_or_default();
        let url = format!(
            "https://ws.audioscrobbler.com/2.0/?method=track.getsimilar&artist={}&track={}&api_key={}&format=json&limit=5",
            urlencoding::encode(artist),
            urlencoding::encode(title),
            self.api_key,
        );

        #[derive(serde::Deserialize)]
        struct Resp {
            similartracks: SimilarTracks,
        }
        #[derive(serde::Deserialize)]
        struct SimilarTracks {
            track: Vec<SimilarTrack>,
        }
        #[derive(serde::Deserialize)]
        struct SimilarTrack {
            name: String,
            artist: SimilarArtist,
        }
        #[derive(serde::Deserialize)]
        struct SimilarArtist {
            name: String,
        }

        let body: Resp = match self.http.get(&url).send().await {
            Ok(resp) => match resp.json().await {
                Ok(body) => body,
                Err(_) => return Vec::new(),
            },
            Err(_) => return Vec::new(),
        };

        let Some(picked) = body.similartracks.track.first() else {
            return Vec::new();
        };
        let query = format!("{}:{} - {}", default_platform.prefix(), picked.artist.name, picked.name);

        match node.rest().load_tracks(&query).await {
            Ok(LoadResult::Search(tracks)) => tracks.into_iter().take(1).map(|raw| builder.build(raw, None)).collect(),
            _ => Vec::new(),
        }
    }
}

/// Orchestrates the ordered platform list against a node's advertised
/// source managers, falling through to last.fm if every platform is empty
/// (§4.6).
pub struct AutoplayResolver {
    strategies: Vec<Box<dyn RecommendationStrategy>>,
    last_fm: Option<LastFmFallback>,
    default_search_platform: SearchPlatform,
}

impl AutoplayResolver {
    pub fn new(
        platforms: &[SearchPlatform],
        last_fm_api_key: Option<String>,
        default_search_platform: SearchPlatform,
    ) -> AutoplayResolver {
        let mut strategies: Vec<Box<dyn RecommendationStrategy>> = Vec::new();
        for platform in platforms {
            let strategy: Box<dyn RecommendationStrategy> = match platform {
                SearchPlatform::Spotify => Box::new(SpotifyStrategy::new()),
                SearchPlatform::Deezer => Box::new(NodeRecommendationStrategy::deezer()),
                SearchPlatform::Tidal => Box::new(NodeRecommendationStrategy::tidal()),
                SearchPlatform::VkMusic => Box::new(NodeRecommendationStrategy::vkmusic()),
                SearchPlatform::Qobuz => Box::new(NodeRecommendationStrategy::qobuz()),
                SearchPlatform::SoundCloud => Box::new(SoundCloudStrategy::new()),
                SearchPlatform::YouTube | SearchPlatform::YouTubeMusic => Box::new(YouTubeStrategy),
                _ => continue,
            };
            strategies.push(strategy);
        }

        AutoplayResolver {
            strategies,
            last_fm: last_fm_api_key.map(LastFmFallback::new),
            default_search_platform,
        }
    }

    /// Given the track that just ended, produce candidate continuations by
    /// trying each configured platform (intersected with what the node
    /// advertises) in order, then the last.fm fallback.
    pub async fn resolve(&self, node: &Node, builder: &TrackBuilder, seed: &Track) -> Vec<Track> {
        let source_managers = node.source_managers().await;

        for strategy in &self.strategies {
            let tag = platform_source_manager_tag(strategy.platform());
            if !source_managers.iter().any(|m| m.eq_ignore_ascii_case(tag)) {
                continue;
            }
            let tracks = strategy.recommend(node, builder, seed).await;
            if !tracks.is_empty() {
                return tracks;
            }
        }

        if let Some(last_fm) = &self.last_fm {
            let tracks = last_fm.recommend(node, builder, self.default_search_platform, seed).await;
            if !tracks.is_empty() {
                return tracks;
            }
        }

        Vec::new()
    }
}

fn platform_source_manager_tag(platform: SearchPlatform) -> &'static str {
    match platform {
        SearchPlatform::YouTube | SearchPlatform::YouTubeMusic => "youtube",
        SearchPlatform::Spotify => "spotify",
        SearchPlatform::Deezer => "deezer",
        SearchPlatform::SoundCloud => "soundcloud",
        SearchPlatform::Tidal => "tidal",
        SearchPlatform::VkMusic => "vkmusic",
        SearchPlatform::Qobuz => "qobuz",
        SearchPlatform::AppleMusic => "applemusic",
    }
}

/// Marks a track as autoplay-inserted by stamping `requester` with the
/// bot's own user id, which [`crate::queue::Queue::add`] checks for to
/// classify the change as `AutoPlayAdd` rather than `Add`.
pub fn stamp_autoplay_requester(mut tracks: Vec<Track>, bot_user_id: Option<UserId>) -> Vec<Track> {
    for track in &mut tracks {
        track.requester = bot_user_id;
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totp_is_six_digits() {
        let code = spotify_totp();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
