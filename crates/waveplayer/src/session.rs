//! Engine + navigator wiring.
//!
//! A session reacts to engine events: it starts playback once an autoplay
//! load lands, advances the playlist on natural end of track and keeps the
//! following track pre-fetched in the pool's look-ahead slot.

use waveplayer_types::{PlaybackStatus, TrackDescriptor};

use crate::context::ContextFactory;
use crate::engine::{EngineEvent, PlaybackEngine};
use crate::error::Result;
use crate::playlist::{NavigationResult, PlaylistNavigator};

pub struct PlayerSession<F: ContextFactory> {
    engine: PlaybackEngine<F>,
    navigator: PlaylistNavigator,
    /// Start playing as soon as the pending load lands.
    autoplay: bool,
    preload_enabled: bool,
}

impl<F: ContextFactory> PlayerSession<F> {
    pub fn new(engine: PlaybackEngine<F>, navigator: PlaylistNavigator) -> Self {
        Self {
            engine,
            navigator,
            autoplay: false,
            preload_enabled: true,
        }
    }

    /// Disable look-ahead fetching (useful on metered links).
    pub fn with_preload(mut self, enabled: bool) -> Self {
        self.preload_enabled = enabled;
        self
    }

    pub fn engine(&self) -> &PlaybackEngine<F> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PlaybackEngine<F> {
        &mut self.engine
    }

    pub fn navigator(&self) -> &PlaylistNavigator {
        &self.navigator
    }

    /// Load the navigator's current track; `autoplay` starts it once loaded.
    pub fn start(&mut self, autoplay: bool) -> Result<()> {
        let Some(track) = self.navigator.current().cloned() else {
            tracing::warn!("playlist is empty; nothing to play");
            return Ok(());
        };
        self.go_to(track, autoplay)
    }

    /// Play/pause toggle. While loading, playback starts when the load lands.
    pub fn toggle_play(&mut self) -> Result<()> {
        match self.engine.status() {
            PlaybackStatus::Playing => self.engine.pause(),
            PlaybackStatus::Loading => {
                self.autoplay = !self.autoplay;
                Ok(())
            }
            _ => self.engine.play(),
        }
    }

    pub fn next(&mut self) -> Result<NavigationResult> {
        let result = self.navigator.next();
        if let NavigationResult::Track { track, .. } = &result {
            let autoplay = self.is_active();
            self.go_to(track.clone(), autoplay)?;
        }
        Ok(result)
    }

    /// Previous track, or restart the current one when past the restart threshold.
    pub fn previous(&mut self) -> Result<NavigationResult> {
        let position = self.engine.state().current_time;
        let result = self.navigator.previous(position);
        match &result {
            NavigationResult::Track { track, .. } => {
                let autoplay = self.is_active();
                self.go_to(track.clone(), autoplay)?;
            }
            NavigationResult::Restart => {
                if matches!(
                    self.engine.status(),
                    PlaybackStatus::Ready | PlaybackStatus::Playing | PlaybackStatus::Paused
                ) {
                    self.engine.seek(0.0)?;
                }
            }
            NavigationResult::EndOfPlaylist | NavigationResult::Empty => {}
        }
        Ok(result)
    }

    /// Turn shuffle on or off and refresh the look-ahead track.
    pub fn set_shuffle(&mut self, shuffle: bool) -> Result<()> {
        self.navigator.set_shuffle(shuffle);
        self.preload_following()
    }

    pub fn set_repeat(&mut self, repeat: bool) -> Result<()> {
        self.navigator.set_repeat(repeat);
        self.preload_following()
    }

    /// Pump the engine and react to its events. Call once per host frame.
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let events = self.engine.poll();
        for event in &events {
            if let Err(e) = self.handle(event) {
                tracing::warn!("session could not react to {event:?}: {e}");
            }
        }
        events
    }

    pub fn cleanup(&mut self) {
        self.autoplay = false;
        self.engine.cleanup();
    }

    fn handle(&mut self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::Loaded { .. } => {
                if std::mem::take(&mut self.autoplay) {
                    self.engine.play()?;
                }
                self.preload_following()
            }
            EngineEvent::TrackEnded { .. } => match self.navigator.next() {
                NavigationResult::Track { track, .. } => self.go_to(track, true),
                NavigationResult::EndOfPlaylist => {
                    tracing::info!("end of playlist");
                    Ok(())
                }
                NavigationResult::Restart | NavigationResult::Empty => Ok(()),
            },
            EngineEvent::LoadFailed { .. } => {
                self.autoplay = false;
                Ok(())
            }
            EngineEvent::Progress { .. } | EngineEvent::Looped => Ok(()),
        }
    }

    fn go_to(&mut self, track: TrackDescriptor, autoplay: bool) -> Result<()> {
        self.autoplay = autoplay;
        if self.engine.take_preloaded(&track) {
            tracing::debug!(track_id = %track.id, "promoted look-ahead buffer");
            return Ok(());
        }
        self.engine.load_track(track)
    }

    fn preload_following(&mut self) -> Result<()> {
        if !self.preload_enabled {
            return Ok(());
        }
        let current_id = self.engine.state().track.as_ref().map(|t| t.id.clone());
        let Some(next) = self.navigator.peek_next().cloned() else {
            return Ok(());
        };
        if current_id.as_deref() == Some(next.id.as_str()) || self.engine.status() == PlaybackStatus::Loading {
            return Ok(());
        }
        self.engine.preload(next)
    }

    fn is_active(&self) -> bool {
        self.autoplay || self.engine.status() == PlaybackStatus::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::tests::{track, MemoryFetcher};
    use crate::engine::tests::{engine_with, TestFactory};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use waveplayer_types::Playlist;

    fn session(lengths: &[usize]) -> (PlayerSession<TestFactory>, Arc<MemoryFetcher>) {
        let fetcher = Arc::new(MemoryFetcher::default());
        let mut tracks = Vec::new();
        for (i, len) in lengths.iter().enumerate() {
            let url = format!("http://host/{i}.wav");
            fetcher.insert(&url, *len);
            tracks.push(track(&format!("t{i}"), &url));
        }
        let playlist = Playlist {
            id: "p".into(),
            tracks,
            ..Default::default()
        };
        let engine = engine_with(fetcher.clone());
        (
            PlayerSession::new(engine, PlaylistNavigator::with_seed(playlist, 5)),
            fetcher,
        )
    }

    fn poll_until(
        s: &mut PlayerSession<TestFactory>,
        mut done: impl FnMut(&PlayerSession<TestFactory>) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(s) && Instant::now() < deadline {
            s.poll();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn current_id(s: &PlayerSession<TestFactory>) -> Option<String> {
        s.engine().state().track.as_ref().map(|t| t.id.clone())
    }

    #[test]
    fn start_with_autoplay_plays_once_loaded() {
        let (mut s, _) = session(&[2_000, 2_000]);
        s.start(true).unwrap();
        poll_until(&mut s, |s| s.engine().status() == PlaybackStatus::Playing);
        assert_eq!(s.engine().status(), PlaybackStatus::Playing);
        assert_eq!(current_id(&s).as_deref(), Some("t0"));
    }

    #[test]
    fn natural_end_advances_to_preloaded_next_track() {
        let (mut s, fetcher) = session(&[1_000, 2_000]);
        s.start(true).unwrap();
        poll_until(&mut s, |s| s.engine().preloaded_track_id() == Some("t1"));
        assert!(s.engine().pool().next_buffer().is_some());
        let requests_before = fetcher.requests.lock().unwrap().len();

        s.engine_mut().context_mut().unwrap().advance(1.5);
        poll_until(&mut s, |s| {
            current_id(s).as_deref() == Some("t1") && s.engine().status() == PlaybackStatus::Playing
        });
        assert_eq!(current_id(&s).as_deref(), Some("t1"));
        assert_eq!(s.engine().status(), PlaybackStatus::Playing);
        assert_eq!(s.engine().state().duration, 2.0);
        assert_eq!(fetcher.requests.lock().unwrap().len(), requests_before);
    }

    #[test]
    fn end_of_playlist_stays_ready() {
        let (mut s, _) = session(&[1_000]);
        s.start(true).unwrap();
        poll_until(&mut s, |s| s.engine().status() == PlaybackStatus::Playing);
        s.engine_mut().context_mut().unwrap().advance(1.5);
        s.poll();
        assert_eq!(s.engine().status(), PlaybackStatus::Ready);
        assert_eq!(s.navigator().index(), 0);
    }

    #[test]
    fn previous_past_threshold_restarts() {
        let (mut s, _) = session(&[10_000, 10_000]);
        s.start(true).unwrap();
        poll_until(&mut s, |s| s.engine().status() == PlaybackStatus::Playing);
        s.engine_mut().context_mut().unwrap().advance(4.0);
        s.poll();
        assert_eq!(s.previous().unwrap(), NavigationResult::Restart);
        assert_eq!(s.engine().state().current_time, 0.0);
        assert_eq!(s.engine().status(), PlaybackStatus::Playing);
    }

    #[test]
    fn next_while_paused_loads_without_playing() {
        let (mut s, _) = session(&[2_000, 2_000]);
        s.start(false).unwrap();
        poll_until(&mut s, |s| s.engine().status() == PlaybackStatus::Ready);
        let result = s.next().unwrap();
        assert!(matches!(result, NavigationResult::Track { index: 1, .. }));
        poll_until(&mut s, |s| {
            current_id(s).as_deref() == Some("t1") && s.engine().status() == PlaybackStatus::Ready
        });
        assert_eq!(s.engine().status(), PlaybackStatus::Ready);
    }

    #[test]
    fn toggle_play_pauses_and_resumes() {
        let (mut s, _) = session(&[2_000]);
        s.start(false).unwrap();
        poll_until(&mut s, |s| s.engine().status() == PlaybackStatus::Ready);
        s.toggle_play().unwrap();
        assert_eq!(s.engine().status(), PlaybackStatus::Playing);
        s.toggle_play().unwrap();
        assert_eq!(s.engine().status(), PlaybackStatus::Paused);
    }
}
