//! Per-player track queue (§3 "Queue", §4.3).
//!
//! Generalizes the teacher's head-index-over-`VecDeque` [`Queue`] shape
//! (`player/queue.rs`) from a flat history buffer into the spec's
//! `current` / upcoming / bounded `previous` model.

use std::collections::{HashMap, VecDeque};

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::ids::UserId;
use crate::track::Track;

/// The kind of mutation a [`Queue`] operation performed; carried on the
/// `QueueChange` variant of `PlayerStateUpdate` (§4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueChangeType {
    Add,
    Remove,
    Clear,
    Shuffle,
    RoundRobin,
    UserBlock,
    AutoPlayAdd,
}

/// Describes a queue mutation for event-bus consumption.
#[derive(Clone, Debug)]
pub struct QueueChange {
    pub change_type: QueueChangeType,
}

/// Default cap on [`Queue::previous`] (§3).
pub const DEFAULT_MAX_PREVIOUS_TRACKS: usize = 20;

/// A per-player ordered sequence of tracks with bounded play history.
#[derive(Clone, Debug, Default)]
pub struct Queue {
    current: Option<Track>,
    upcoming: VecDeque<Track>,
    previous: VecDeque<Track>,
    max_previous_tracks: usize,
}

impl Queue {
    /// Creates a new, empty queue with the given previous-tracks cap.
    pub fn new(max_previous_tracks: usize) -> Queue {
        Queue {
            current: None,
            upcoming: VecDeque::new(),
            previous: VecDeque::new(),
            max_previous_tracks,
        }
    }

    /// The track currently playing, if any.
    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Tracks queued after `current`, in play order.
    pub fn upcoming(&self) -> impl Iterator<Item = &Track> {
        self.upcoming.iter()
    }

    /// Previously played tracks, most recent first.
    pub fn previous(&self) -> impl Iterator<Item = &Track> {
        self.previous.iter()
    }

    /// Number of upcoming tracks.
    pub fn len(&self) -> usize {
        self.upcoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upcoming.is_empty()
    }

    /// Sum of `duration` across `current` and every upcoming track.
    pub fn total_duration_ms(&self) -> u64 {
        self.current
            .iter()
            .chain(self.upcoming.iter())
            .filter_map(|t| t.duration)
            .sum()
    }

    /// Directly sets `current`, bypassing the queue (used by the state
    /// machine when advancing).
    pub fn set_current(&mut self, track: Option<Track>) {
        self.current = track;
    }

    /// Removes and returns the first upcoming track, if any, without
    /// touching `current`.
    pub fn shift(&mut self) -> Option<Track> {
        self.upcoming.pop_front()
    }

    /// Pushes `track` onto the front of history, evicting the oldest entry
    /// once `max_previous_tracks` is exceeded.
    pub fn push_history(&mut self, track: Track) {
        self.previous.push_front(track);
        while self.previous.len() > self.max_previous_tracks {
            self.previous.pop_back();
        }
    }

    /// Pops the most recent history entry, for `previous()` player op.
    pub fn pop_history(&mut self) -> Option<Track> {
        self.previous.pop_front()
    }

    /// Pushes `track` onto the tail of the upcoming sequence (used by
    /// repeat modes to requeue the finished track).
    pub fn push_tail(&mut self, track: Track) {
        self.upcoming.push_back(track);
    }

    /// Adds one or more tracks at `offset` (defaulting to the tail). If
    /// `current` is null, the first added track becomes `current` without
    /// occupying a queue slot (§4.3).
    ///
    /// Returns the [`QueueChange`] to emit: `AutoPlayAdd` if the first
    /// track's requester equals `autoplay_requester`, `Add` otherwise.
    pub fn add(
        &mut self,
        mut tracks: Vec<Track>,
        offset: Option<usize>,
        autoplay_requester: Option<UserId>,
    ) -> QueueChange {
        let is_autoplay = tracks
            .first()
            .map(|t| t.requester.is_some() && t.requester == autoplay_requester)
            .unwrap_or(false);

        if self.current.is_none() && !tracks.is_empty() {
            self.current = Some(tracks.remove(0));
        }

        let offset = offset.unwrap_or(self.upcoming.len()).min(self.upcoming.len());
        for (i, track) in tracks.into_iter().enumerate() {
            self.upcoming.insert(offset + i, track);
        }

        QueueChange {
            change_type: if is_autoplay {
                QueueChangeType::AutoPlayAdd
            } else {
                QueueChangeType::Add
            },
        }
    }

    /// Removes a single upcoming track by position.
    pub fn remove_at(&mut self, pos: usize) -> Result<(Track, QueueChange)> {
        if pos >= self.upcoming.len() {
            return Err(Error::InvalidRange(pos, pos + 1));
        }
        let track = self.upcoming.remove(pos).expect("checked bounds");
        Ok((
            track,
            QueueChange {
                change_type: QueueChangeType::Remove,
            },
        ))
    }

    /// Removes the half-open range `[start, end)` of upcoming tracks.
    ///
    /// Rejects `start >= end` or `start >= len()` (§8 boundary behaviors).
    pub fn remove_range(&mut self, start: usize, end: usize) -> Result<(Vec<Track>, QueueChange)> {
        if start >= end || start >= self.upcoming.len() {
            return Err(Error::InvalidRange(start, end));
        }
        let end = end.min(self.upcoming.len());
        let removed = self.upcoming.drain(start..end).collect();
        Ok((
            removed,
            QueueChange {
                change_type: QueueChangeType::Remove,
            },
        ))
    }

    /// Clears the upcoming sequence. Does not touch `current` or history.
    pub fn clear(&mut self) -> QueueChange {
        self.upcoming.clear();
        QueueChange {
            change_type: QueueChangeType::Clear,
        }
    }

    /// Fisher–Yates shuffle of the upcoming sequence.
    pub fn shuffle(&mut self) -> QueueChange {
        let mut vec: Vec<_> = self.upcoming.drain(..).collect();
        vec.shuffle(&mut thread_rng());
        self.upcoming = vec.into();
        QueueChange {
            change_type: QueueChangeType::Shuffle,
        }
    }

    /// Groups upcoming tracks by requester, preserving each requester's
    /// internal order, then interleaves one *full block* per requester in a
    /// round-robin over requesters (§4.3 `userBlockShuffle`).
    pub fn user_block_shuffle(&mut self) -> QueueChange {
        let groups = group_by_requester(self.upcoming.drain(..).collect());
        let mut order: Vec<_> = groups.keys().cloned().collect();
        order.shuffle(&mut thread_rng());

        let mut result = VecDeque::new();
        for key in order {
            if let Some(block) = groups.get(&key) {
                result.extend(block.iter().cloned());
            }
        }
        self.upcoming = result;
        QueueChange {
            change_type: QueueChangeType::UserBlock,
        }
    }

    /// Groups upcoming tracks by requester, shuffles within each group, then
    /// interleaves one track per requester round-robin (§4.3
    /// `roundRobinShuffle`).
    pub fn round_robin_shuffle(&mut self) -> QueueChange {
        let mut groups = group_by_requester(self.upcoming.drain(..).collect());
        for block in groups.values_mut() {
            block.shuffle(&mut thread_rng());
        }

        let mut order: Vec<_> = groups.keys().cloned().collect();
        order.shuffle(&mut thread_rng());

        let mut cursors: HashMap<Option<UserId>, usize> =
            order.iter().map(|k| (*k, 0)).collect();
        let mut result = VecDeque::new();
        loop {
            let mut pushed_any = false;
            for key in &order {
                let cursor = cursors.get_mut(key).unwrap();
                if let Some(block) = groups.get(key) {
                    if let Some(track) = block.get(*cursor) {
                        result.push_back(track.clone());
                        *cursor += 1;
                        pushed_any = true;
                    }
                }
            }
            if !pushed_any {
                break;
            }
        }

        self.upcoming = result;
        QueueChange {
            change_type: QueueChangeType::RoundRobin,
        }
    }

    /// Bounded history cap currently configured.
    pub fn max_previous_tracks(&self) -> usize {
        self.max_previous_tracks
    }

    /// Asserts the §3 invariant: `current` is either null or distinct from
    /// every upcoming item, by encoded identifier.
    pub fn check_invariant(&self) -> bool {
        match &self.current {
            None => true,
            Some(current) => self.upcoming.iter().all(|t| t.encoded != current.encoded),
        }
    }
}

fn group_by_requester(tracks: Vec<Track>) -> HashMap<Option<UserId>, Vec<Track>> {
    let mut groups: HashMap<Option<UserId>, Vec<Track>> = HashMap::new();
    for track in tracks {
        groups.entry(track.requester).or_default().push(track);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn track(id: &str, requester: Option<UserId>) -> Track {
        Track {
            encoded: id.to_string(),
            title: Some(id.to_string()),
            author: None,
            duration: Some(1000),
            is_seekable: Some(true),
            is_stream: Some(false),
            uri: None,
            artwork_url: None,
            isrc: None,
            source_name: None,
            requester,
            plugin_info: None,
            custom_data: Map::new(),
        }
    }

    #[test]
    fn add_to_empty_queue_sets_current_without_occupying_slot() {
        let mut q = Queue::new(DEFAULT_MAX_PREVIOUS_TRACKS);
        q.add(vec![track("a", None)], None, None);
        assert_eq!(q.current().unwrap().encoded, "a");
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn add_after_current_set_appends_to_upcoming() {
        let mut q = Queue::new(DEFAULT_MAX_PREVIOUS_TRACKS);
        q.add(vec![track("a", None)], None, None);
        q.add(vec![track("b", None), track("c", None)], None, None);
        assert_eq!(q.len(), 2);
        assert_eq!(q.upcoming().next().unwrap().encoded, "b");
    }

    #[test]
    fn remove_range_rejects_invalid_bounds() {
        let mut q = Queue::new(DEFAULT_MAX_PREVIOUS_TRACKS);
        q.add(vec![track("a", None), track("b", None), track("c", None)], None, None);
        assert!(q.remove_range(2, 1).is_err());
        assert!(q.remove_range(5, 6).is_err());
        assert!(q.remove_range(0, 1).is_ok());
    }

    #[test]
    fn history_respects_cap() {
        let mut q = Queue::new(2);
        q.push_history(track("a", None));
        q.push_history(track("b", None));
        q.push_history(track("c", None));
        assert_eq!(q.previous().count(), 2);
        assert_eq!(q.previous().next().unwrap().encoded, "c");
    }

    #[test]
    fn user_block_shuffle_preserves_internal_order_within_blocks() {
        let u1 = UserId::new(1);
        let u2 = UserId::new(2);
        let mut q = Queue::new(DEFAULT_MAX_PREVIOUS_TRACKS);
        q.add(
            vec![
                track("a1", Some(u1)),
                track("a2", Some(u1)),
                track("b1", Some(u2)),
                track("b2", Some(u2)),
            ],
            None,
            None,
        );
        q.user_block_shuffle();
        let ids: Vec<_> = q.upcoming().map(|t| t.encoded.clone()).collect();
        // whichever block comes first, each block's internal order survives
        let a_pos: Vec<_> = ids.iter().enumerate().filter(|(_, id)| id.starts_with('a')).map(|(i, _)| i).collect();
        let b_pos: Vec<_> = ids.iter().enumerate().filter(|(_, id)| id.starts_with('b')).map(|(i, _)| i).collect();
        assert!(a_pos.windows(2).all(|w| w[0] < w[1]));
        assert!(b_pos.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn invariant_holds_after_mutation() {
        let mut q = Queue::new(DEFAULT_MAX_PREVIOUS_TRACKS);
        q.add(vec![track("a", None), track("b", None)], None, None);
        assert!(q.check_invariant());
    }
}
