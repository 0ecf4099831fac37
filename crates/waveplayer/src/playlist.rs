//! Playlist sequencing: next/previous, repeat and shuffle.
//!
//! Shuffle walks a random permutation one pick at a time. A cycle ends when
//! every track has been visited; the next cycle never opens with the track that
//! just played (unless the playlist has a single track).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use waveplayer_types::{Playlist, TrackDescriptor};

/// `previous()` restarts the current track instead of going back once playback is past this point.
pub const RESTART_THRESHOLD_SECS: f64 = 3.0;

/// Outcome of a navigation command.
#[derive(Clone, Debug, PartialEq)]
pub enum NavigationResult {
    /// Move to this track.
    Track { index: usize, track: TrackDescriptor },
    /// Already at the last track and repeat is off.
    EndOfPlaylist,
    /// Stay on the current track and seek to 0.
    Restart,
    /// The playlist has no tracks.
    Empty,
}

pub struct PlaylistNavigator {
    playlist: Playlist,
    index: usize,
    shuffle: bool,
    repeat: bool,
    rng: StdRng,
    visited: Vec<bool>,
    history: Vec<usize>,
    /// Shuffle pick drawn by `peek_next`, consumed by `next`.
    peeked: Option<usize>,
}

impl PlaylistNavigator {
    pub fn new(playlist: Playlist) -> Self {
        Self::with_rng(playlist, StdRng::from_entropy())
    }

    /// Deterministic shuffle order for a given seed.
    pub fn with_seed(playlist: Playlist, seed: u64) -> Self {
        Self::with_rng(playlist, StdRng::seed_from_u64(seed))
    }

    fn with_rng(playlist: Playlist, rng: StdRng) -> Self {
        let len = playlist.tracks.len();
        let mut nav = Self {
            playlist,
            index: 0,
            shuffle: false,
            repeat: false,
            rng,
            visited: vec![false; len],
            history: Vec::new(),
            peeked: None,
        };
        nav.reset_cycle();
        nav
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn len(&self) -> usize {
        self.playlist.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlist.tracks.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    pub fn current(&self) -> Option<&TrackDescriptor> {
        self.playlist.tracks.get(self.index)
    }

    /// Turning shuffle on starts a fresh cycle that counts the current track as played.
    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
        self.history.clear();
        self.peeked = None;
        self.reset_cycle();
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
        self.peeked = None;
    }

    /// Jump to `index`. Returns `None` when out of range.
    pub fn select(&mut self, index: usize) -> Option<&TrackDescriptor> {
        if index >= self.len() {
            return None;
        }
        if index != self.index {
            self.history.push(self.index);
        }
        self.index = index;
        self.peeked = None;
        self.visited[index] = true;
        self.current()
    }

    /// Track `next()` would move to, without moving.
    pub fn peek_next(&mut self) -> Option<&TrackDescriptor> {
        let index = self.next_index()?;
        self.playlist.tracks.get(index)
    }

    pub fn next(&mut self) -> NavigationResult {
        if self.is_empty() {
            return NavigationResult::Empty;
        }
        let Some(index) = self.next_index() else {
            return NavigationResult::EndOfPlaylist;
        };
        self.peeked = None;
        if self.shuffle {
            if self.visited[index] {
                // Wrapped into a new cycle.
                self.visited.fill(false);
            }
            self.visited[index] = true;
            self.history.push(self.index);
        }
        self.index = index;
        self.track_result()
    }

    /// Go back, or ask for a restart when `position_secs` is past [`RESTART_THRESHOLD_SECS`].
    pub fn previous(&mut self, position_secs: f64) -> NavigationResult {
        if self.is_empty() {
            return NavigationResult::Empty;
        }
        if position_secs > RESTART_THRESHOLD_SECS {
            return NavigationResult::Restart;
        }
        self.peeked = None;
        if self.shuffle {
            return match self.history.pop() {
                Some(index) => {
                    self.index = index;
                    self.track_result()
                }
                None => NavigationResult::Restart,
            };
        }
        if self.index > 0 {
            self.index -= 1;
        } else if self.repeat {
            self.index = self.len() - 1;
        } else {
            return NavigationResult::Restart;
        }
        self.track_result()
    }

    fn next_index(&mut self) -> Option<usize> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        if !self.shuffle {
            return if self.index + 1 < len {
                Some(self.index + 1)
            } else if self.repeat {
                Some(0)
            } else {
                None
            };
        }

        if let Some(peeked) = self.peeked {
            return Some(peeked);
        }
        let unvisited: Vec<usize> = (0..len).filter(|i| !self.visited[*i]).collect();
        let pick = if !unvisited.is_empty() {
            unvisited.choose(&mut self.rng).copied()
        } else if self.repeat {
            let fresh: Vec<usize> = (0..len).filter(|i| len == 1 || *i != self.index).collect();
            fresh.choose(&mut self.rng).copied()
        } else {
            None
        };
        self.peeked = pick;
        pick
    }

    fn reset_cycle(&mut self) {
        self.visited.fill(false);
        if let Some(slot) = self.visited.get_mut(self.index) {
            *slot = true;
        }
    }

    fn track_result(&self) -> NavigationResult {
        match self.current() {
            Some(track) => NavigationResult::Track {
                index: self.index,
                track: track.clone(),
            },
            None => NavigationResult::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn playlist(n: usize) -> Playlist {
        Playlist {
            id: "p".into(),
            title: "Mix".into(),
            tracks: (0..n)
                .map(|i| TrackDescriptor {
                    id: format!("t{i}"),
                    source_url: format!("http://host/{i}.mp3"),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn index_of(result: &NavigationResult) -> usize {
        match result {
            NavigationResult::Track { index, .. } => *index,
            other => panic!("expected a track, got {other:?}"),
        }
    }

    #[test]
    fn sequential_next_stops_at_end() {
        let mut nav = PlaylistNavigator::new(playlist(3));
        assert_eq!(index_of(&nav.next()), 1);
        assert_eq!(index_of(&nav.next()), 2);
        assert_eq!(nav.next(), NavigationResult::EndOfPlaylist);
        assert_eq!(nav.index(), 2);
    }

    #[test]
    fn sequential_next_wraps_with_repeat() {
        let mut nav = PlaylistNavigator::new(playlist(2));
        nav.set_repeat(true);
        nav.next();
        assert_eq!(index_of(&nav.next()), 0);
    }

    #[test]
    fn previous_restarts_past_threshold() {
        let mut nav = PlaylistNavigator::new(playlist(3));
        nav.next();
        assert_eq!(nav.previous(3.5), NavigationResult::Restart);
        assert_eq!(nav.index(), 1);
        assert_eq!(index_of(&nav.previous(1.0)), 0);
    }

    #[test]
    fn previous_at_start_clamps_or_wraps() {
        let mut nav = PlaylistNavigator::new(playlist(3));
        assert_eq!(nav.previous(0.0), NavigationResult::Restart);
        nav.set_repeat(true);
        assert_eq!(index_of(&nav.previous(0.0)), 2);
    }

    #[test]
    fn empty_playlist_navigation() {
        let mut nav = PlaylistNavigator::new(playlist(0));
        assert_eq!(nav.next(), NavigationResult::Empty);
        assert_eq!(nav.previous(0.0), NavigationResult::Empty);
        assert!(nav.current().is_none());
        assert!(nav.peek_next().is_none());
        assert!(nav.select(0).is_none());
    }

    #[test]
    fn shuffle_visits_every_track_once_per_cycle() {
        let mut nav = PlaylistNavigator::with_seed(playlist(6), 7);
        nav.set_shuffle(true);
        let mut seen = HashSet::from([nav.index()]);
        for _ in 0..5 {
            assert!(seen.insert(index_of(&nav.next())));
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(nav.next(), NavigationResult::EndOfPlaylist);
    }

    #[test]
    fn shuffle_new_cycle_does_not_repeat_last_track() {
        for seed in 0..20 {
            let mut nav = PlaylistNavigator::with_seed(playlist(3), seed);
            nav.set_shuffle(true);
            nav.set_repeat(true);
            nav.next();
            nav.next();
            let last = nav.index();
            let first_of_cycle = index_of(&nav.next());
            assert_ne!(first_of_cycle, last);
        }
    }

    #[test]
    fn shuffle_is_deterministic_for_seed() {
        let order = |seed| {
            let mut nav = PlaylistNavigator::with_seed(playlist(8), seed);
            nav.set_shuffle(true);
            (0..7).map(|_| index_of(&nav.next())).collect::<Vec<_>>()
        };
        assert_eq!(order(42), order(42));
    }

    #[test]
    fn peek_matches_next_in_shuffle() {
        let mut nav = PlaylistNavigator::with_seed(playlist(10), 3);
        nav.set_shuffle(true);
        for _ in 0..9 {
            let peeked = nav.peek_next().map(|t| t.id.clone());
            let next = match nav.next() {
                NavigationResult::Track { track, .. } => Some(track.id),
                _ => None,
            };
            assert_eq!(peeked, next);
        }
    }

    #[test]
    fn shuffle_previous_walks_history() {
        let mut nav = PlaylistNavigator::with_seed(playlist(5), 11);
        nav.set_shuffle(true);
        let a = nav.index();
        let b = index_of(&nav.next());
        index_of(&nav.next());
        assert_eq!(index_of(&nav.previous(0.0)), b);
        assert_eq!(index_of(&nav.previous(0.0)), a);
        assert_eq!(nav.previous(0.0), NavigationResult::Restart);
    }

    #[test]
    fn select_moves_and_validates() {
        let mut nav = PlaylistNavigator::new(playlist(3));
        assert_eq!(nav.select(2).map(|t| t.id.as_str()), Some("t2"));
        assert!(nav.select(3).is_none());
        assert_eq!(nav.index(), 2);
    }

    #[test]
    fn single_track_shuffle_repeat_replays() {
        let mut nav = PlaylistNavigator::with_seed(playlist(1), 1);
        nav.set_shuffle(true);
        assert_eq!(nav.next(), NavigationResult::EndOfPlaylist);
        nav.set_repeat(true);
        assert_eq!(index_of(&nav.next()), 0);
    }
}
