//! Playback engine: the imperative shell around [`transition`].
//!
//! The engine is owned by one control thread. Loads run on worker threads
//! and report back over a crossbeam channel tagged with the load generation;
//! [`PlaybackEngine::poll`] applies those messages, advances the transport
//! clock and returns [`EngineEvent`]s for the host. Messages from an older
//! generation are dropped.
//!
//! Audio graph side effects (source start/stop, gain ramps) happen here and
//! only here. Every playback segment gets a fresh single-use source through
//! `start_segment`.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use waveplayer_types::{PlaybackSnapshot, PlaybackStatus, TrackDescriptor, Visualization};

use crate::buffer_pool::{BufferPool, LoadObserver, LoadTicket, NoopObserver, PoolSlot};
use crate::config::{AnalyserConfig, EngineConfig, PlayerConfig};
use crate::context::{AudioContext, ContextFactory, SourceId};
use crate::decode::{AudioDecoder, DecodedBuffer, SymphoniaDecoder};
use crate::error::{PlayerError, Result};
use crate::fetch::{HttpRangeFetcher, RangeFetcher};
use crate::state::{transition, PlaybackEvent, PlaybackState};

/// Notifications returned by [`PlaybackEngine::poll`].
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// Load progress of the active generation, 0..=100.
    Progress { percent: f64 },
    /// The active load finished; the engine is `Ready`.
    Loaded { track_id: String, duration: f64 },
    /// The active load failed; the engine is in `Error`.
    LoadFailed { error: PlayerError },
    /// The track played to its end and the engine went back to `Ready`.
    TrackEnded { track_id: String },
    /// The track played to its end and restarted because looping is on.
    Looped,
}

enum LoadMessage {
    Progress {
        generation: u64,
        percent: f64,
    },
    Done {
        generation: u64,
        result: Result<Arc<DecodedBuffer>>,
    },
    Preloaded {
        generation: u64,
        track_id: String,
        result: Result<()>,
    },
}

/// Forwards pool progress to the engine channel.
struct ChannelObserver {
    tx: Sender<LoadMessage>,
    generation: u64,
}

impl LoadObserver for ChannelObserver {
    fn on_progress(&self, percent: f64) {
        let _ = self.tx.send(LoadMessage::Progress {
            generation: self.generation,
            percent,
        });
    }
}

/// Transport controller bound to one audio context and one buffer pool.
pub struct PlaybackEngine<F: ContextFactory> {
    factory: F,
    config: EngineConfig,
    analyser: AnalyserConfig,
    pool: Arc<BufferPool>,
    decoder: Arc<dyn AudioDecoder>,
    context: Option<F::Context>,
    source: Option<SourceId>,
    state: PlaybackState,
    generation: u64,
    preload_generation: u64,
    preloaded: Option<String>,
    tx: Sender<LoadMessage>,
    rx: Receiver<LoadMessage>,
    pending: Vec<EngineEvent>,
}

impl<F: ContextFactory> PlaybackEngine<F> {
    pub fn new(
        factory: F,
        config: &PlayerConfig,
        fetcher: Arc<dyn RangeFetcher>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            factory,
            config: config.engine.clone(),
            analyser: config.analyser.clone(),
            pool: Arc::new(BufferPool::new(&config.pool, fetcher)),
            decoder,
            context: None,
            source: None,
            state: PlaybackState::new(config.engine.initial_volume),
            generation: 0,
            preload_generation: 0,
            preloaded: None,
            tx,
            rx,
            pending: Vec::new(),
        }
    }

    /// Engine fetching over HTTP and decoding with Symphonia.
    pub fn with_http(factory: F, config: &PlayerConfig) -> Self {
        let fetcher = Arc::new(HttpRangeFetcher::new(config.pool.fetch_timeout()));
        Self::new(factory, config, fetcher, Arc::new(SymphoniaDecoder))
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn context(&self) -> Option<&F::Context> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut F::Context> {
        self.context.as_mut()
    }

    /// Id of the track waiting in the look-ahead slot, once its preload finished.
    pub fn preloaded_track_id(&self) -> Option<&str> {
        self.preloaded.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.snapshot(self.pool.total_buffer_size())
    }

    /// Build the audio context on first use. Later calls are no-ops.
    pub fn initialize(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }
        match self.factory.create(&self.analyser) {
            Ok(mut ctx) => {
                ctx.ramp_gain(self.state.effective_gain(), 0.0);
                tracing::info!(sample_rate = ctx.sample_rate(), "audio context initialized");
                self.context = Some(ctx);
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    PlayerError::ContextInitFailed(_) => err,
                    other => PlayerError::ContextInitFailed(other.to_string()),
                };
                tracing::error!("audio context init failed: {err}");
                self.apply(PlaybackEvent::Failed(err.clone()))?;
                Err(err)
            }
        }
    }

    /// Start loading `track` into the current slot on a worker thread.
    ///
    /// An in-flight load of the current track is cancelled; a preload keeps
    /// running. Results are applied by [`Self::poll`].
    pub fn load_track(&mut self, track: TrackDescriptor) -> Result<()> {
        let (ticket, rate) = self.begin_load(track.clone())?;
        self.spawn_load(ticket, track, rate);
        Ok(())
    }

    /// Same as [`Self::load_track`] but runs the load on the calling thread.
    pub fn load_track_blocking(&mut self, track: TrackDescriptor) -> Result<Arc<DecodedBuffer>> {
        let (ticket, rate) = self.begin_load(track.clone())?;
        let generation = self.generation;
        let observer = ChannelObserver {
            tx: self.tx.clone(),
            generation,
        };
        let result = self
            .pool
            .run_load(ticket, &track, self.decoder.as_ref(), rate, &observer);
        self.drain_messages();
        self.handle_message(LoadMessage::Done {
            generation,
            result: result.clone(),
        });
        result
    }

    /// Reload the track that failed. Only valid from `Error`.
    pub fn retry_load(&mut self) -> Result<()> {
        let track = match (self.state.status, &self.state.track) {
            (PlaybackStatus::Error, Some(track)) => track.clone(),
            (from, _) => {
                return Err(PlayerError::InvalidTransition {
                    from,
                    action: "retry",
                });
            }
        };
        self.initialize()?;
        let rate = self.context_rate()?;
        self.generation += 1;
        self.apply(PlaybackEvent::RetryRequested {
            generation: self.generation,
        })?;
        tracing::info!(track_id = %track.id, generation = self.generation, "retrying load");
        let ticket = self.pool.start_load(PoolSlot::Current);
        self.spawn_load(ticket, track, rate);
        Ok(())
    }

    /// Supersede the current load on this thread, before any worker starts.
    fn begin_load(&mut self, track: TrackDescriptor) -> Result<(LoadTicket, u32)> {
        self.initialize()?;
        let rate = self.context_rate()?;
        self.stop_active_source();
        let ticket = self.pool.start_load(PoolSlot::Current);
        self.generation += 1;
        tracing::info!(
            track_id = %track.id,
            title = %track.title,
            generation = self.generation,
            "loading track"
        );
        self.apply(PlaybackEvent::LoadRequested {
            track,
            generation: self.generation,
        })?;
        Ok((ticket, rate))
    }

    fn spawn_load(&self, ticket: LoadTicket, track: TrackDescriptor, rate: u32) {
        let pool = self.pool.clone();
        let decoder = self.decoder.clone();
        let tx = self.tx.clone();
        let generation = self.generation;
        std::thread::spawn(move || {
            let observer = ChannelObserver {
                tx: tx.clone(),
                generation,
            };
            let result = pool.run_load(ticket, &track, decoder.as_ref(), rate, &observer);
            let _ = tx.send(LoadMessage::Done { generation, result });
        });
    }

    /// Fetch `track` into the pool's look-ahead slot without changing status.
    ///
    /// Only an earlier preload is cancelled; a load of the current track keeps running.
    pub fn preload(&mut self, track: TrackDescriptor) -> Result<()> {
        self.initialize()?;
        let rate = self.context_rate()?;
        let ticket = self.pool.start_load(PoolSlot::Next);
        self.preload_generation += 1;
        self.preloaded = None;
        let generation = self.preload_generation;
        let pool = self.pool.clone();
        let decoder = self.decoder.clone();
        let tx = self.tx.clone();
        tracing::debug!(track_id = %track.id, "preloading track");
        std::thread::spawn(move || {
            let result = pool
                .run_load(ticket, &track, decoder.as_ref(), rate, &NoopObserver)
                .map(|_| ());
            let _ = tx.send(LoadMessage::Preloaded {
                generation,
                track_id: track.id,
                result,
            });
        });
        Ok(())
    }

    /// Install the look-ahead buffer as the current track when it holds `track`.
    ///
    /// Returns `false` (and changes nothing) when no matching preload is cached.
    pub fn take_preloaded(&mut self, track: &TrackDescriptor) -> bool {
        if self.preloaded.as_deref() != Some(track.id.as_str()) {
            return false;
        }
        self.preloaded = None;
        let Some(buffer) = self.pool.promote_next_buffer() else {
            return false;
        };
        self.stop_active_source();
        self.generation += 1;
        let generation = self.generation;
        let loaded = self
            .apply(PlaybackEvent::LoadRequested {
                track: track.clone(),
                generation,
            })
            .is_ok();
        if !loaded {
            return false;
        }
        self.handle_message(LoadMessage::Done {
            generation,
            result: Ok(buffer),
        });
        true
    }

    /// Start or resume playback from the stored offset.
    ///
    /// From `Playing` the segment restarts at the current position; the old
    /// source is stopped first so two sources never overlap.
    pub fn play(&mut self) -> Result<()> {
        self.initialize()?;
        let now = self.now();
        let next = transition(&self.state, PlaybackEvent::Play { now })?;
        let offset = next.current_time;
        self.state = next;
        if let Err(err) = self.start_segment(offset) {
            self.apply(PlaybackEvent::Failed(err.clone()))?;
            return Err(err);
        }
        tracing::debug!(offset, "playback started");
        Ok(())
    }

    /// Suspend playback, remembering the offset.
    pub fn pause(&mut self) -> Result<()> {
        let now = self.now();
        self.apply(PlaybackEvent::Pause { now })?;
        self.stop_active_source();
        tracing::debug!(offset = self.state.paused_offset, "playback paused");
        Ok(())
    }

    /// Move to `position` seconds, clamped into `[0, duration]`.
    pub fn seek(&mut self, position: f64) -> Result<()> {
        let now = self.now();
        self.apply(PlaybackEvent::Seek { position, now })?;
        self.stop_active_source();
        if self.state.status == PlaybackStatus::Playing {
            let offset = self.state.current_time;
            if let Err(err) = self.start_segment(offset) {
                self.apply(PlaybackEvent::Failed(err.clone()))?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Set the volume (clamped to `0..=1`) with a short linear ramp.
    pub fn set_volume(&mut self, level: f32) -> Result<()> {
        self.apply(PlaybackEvent::SetVolume(level))?;
        self.ramp_to_effective_gain();
        Ok(())
    }

    pub fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.apply(PlaybackEvent::SetMuted(muted))?;
        self.ramp_to_effective_gain();
        Ok(())
    }

    pub fn toggle_mute(&mut self) -> Result<()> {
        self.set_muted(!self.state.is_muted)
    }

    pub fn set_loop(&mut self, looping: bool) -> Result<()> {
        self.apply(PlaybackEvent::SetLooping(looping))
    }

    pub fn toggle_loop(&mut self) -> Result<()> {
        self.set_loop(!self.state.is_looping)
    }

    /// Apply pending load messages and advance the transport clock.
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        self.drain_messages();
        self.tick();
        std::mem::take(&mut self.pending)
    }

    /// Stop every node, close the context, drop cached audio and reset state.
    ///
    /// Never fails; calling it again is a no-op.
    pub fn cleanup(&mut self) {
        self.pool.abort();
        if let Some(ctx) = self.context.as_mut() {
            if let Some(id) = self.source.take() {
                if let Err(e) = ctx.stop_source(id) {
                    tracing::warn!("stop source during cleanup failed: {e}");
                }
            }
            if let Err(e) = ctx.close() {
                tracing::warn!("close audio context failed: {e}");
            }
        }
        self.source = None;
        self.context = None;
        self.pool.cleanup();
        self.preloaded = None;
        self.pending.clear();
        // Fresh channel: late messages from detached workers go nowhere.
        let (tx, rx) = crossbeam_channel::unbounded();
        self.tx = tx;
        self.rx = rx;
        self.state = PlaybackState::new(self.config.initial_volume);
    }

    pub(crate) fn visualization_parts(
        &mut self,
    ) -> (PlaybackStatus, Option<&mut F::Context>, &mut Visualization) {
        (
            self.state.status,
            self.context.as_mut(),
            &mut self.state.visualization,
        )
    }

    fn tick(&mut self) {
        if self.state.status != PlaybackStatus::Playing {
            return;
        }
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        let now = ctx.current_time();
        let ended = ctx.take_ended();
        let natural_end = self.source.is_some_and(|id| ended.contains(&id));
        if !natural_end {
            if let Ok(next) = transition(&self.state, PlaybackEvent::Tick { now }) {
                self.state = next;
            }
            return;
        }

        self.source = None;
        match transition(&self.state, PlaybackEvent::Ended { now }) {
            Ok(next) => self.state = next,
            Err(e) => {
                tracing::warn!("end of track rejected: {e}");
                return;
            }
        }
        if self.state.status == PlaybackStatus::Playing {
            tracing::debug!("looping track");
            if let Err(err) = self.start_segment(0.0) {
                tracing::warn!("loop restart failed: {err}");
                let _ = self.apply(PlaybackEvent::Failed(err));
                return;
            }
            self.pending.push(EngineEvent::Looped);
        } else {
            let track_id = self
                .state
                .track
                .as_ref()
                .map(|t| t.id.clone())
                .unwrap_or_default();
            tracing::info!(track_id = %track_id, "track ended");
            self.pending.push(EngineEvent::TrackEnded { track_id });
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: LoadMessage) {
        match msg {
            LoadMessage::Progress { generation, percent } => {
                if !self.is_active_load(generation) {
                    return;
                }
                self.state.buffer_progress = percent.clamp(0.0, 100.0);
                self.pending.push(EngineEvent::Progress { percent });
            }
            LoadMessage::Done { generation, result } => {
                if !self.is_active_load(generation) {
                    tracing::debug!(generation, active = self.generation, "discarding stale load result");
                    return;
                }
                match result {
                    Ok(buffer) => {
                        let duration = buffer.duration();
                        if self
                            .apply(PlaybackEvent::LoadSucceeded { generation, buffer })
                            .is_ok()
                        {
                            let track_id = self
                                .state
                                .track
                                .as_ref()
                                .map(|t| t.id.clone())
                                .unwrap_or_default();
                            self.pending.push(EngineEvent::Loaded { track_id, duration });
                        }
                    }
                    Err(error) => {
                        if self
                            .apply(PlaybackEvent::LoadFailed {
                                generation,
                                error: error.clone(),
                            })
                            .is_ok()
                        {
                            self.pending.push(EngineEvent::LoadFailed { error });
                        }
                    }
                }
            }
            LoadMessage::Preloaded {
                generation,
                track_id,
                result,
            } => {
                if generation != self.preload_generation {
                    return;
                }
                match result {
                    Ok(()) => {
                        tracing::debug!(track_id = %track_id, "look-ahead buffer ready");
                        self.preloaded = Some(track_id);
                    }
                    Err(e) => tracing::debug!(track_id = %track_id, "preload failed: {e}"),
                }
            }
        }
    }

    fn is_active_load(&self, generation: u64) -> bool {
        generation == self.generation
            && generation == self.state.load_generation
            && self.state.status == PlaybackStatus::Loading
    }

    fn apply(&mut self, event: PlaybackEvent) -> Result<()> {
        self.state = transition(&self.state, event)?;
        Ok(())
    }

    /// Stop the active source and start a fresh one at `offset`.
    fn start_segment(&mut self, offset: f64) -> Result<()> {
        self.stop_active_source();
        let buffer = self.state.buffer.clone().ok_or(PlayerError::NoBufferLoaded)?;
        let ctx = self
            .context
            .as_mut()
            .ok_or_else(|| PlayerError::ContextInitFailed("audio context not initialized".into()))?;
        let id = ctx.start_source(buffer, offset)?;
        self.source = Some(id);
        Ok(())
    }

    fn stop_active_source(&mut self) {
        if let (Some(ctx), Some(id)) = (self.context.as_mut(), self.source.take()) {
            if let Err(e) = ctx.stop_source(id) {
                tracing::warn!("stop source failed: {e}");
            }
        }
    }

    fn ramp_to_effective_gain(&mut self) {
        let target = self.state.effective_gain();
        let ramp = self.config.volume_ramp_secs();
        if let Some(ctx) = self.context.as_mut() {
            ctx.ramp_gain(target, ramp);
        }
    }

    fn now(&self) -> f64 {
        self.context.as_ref().map(|c| c.current_time()).unwrap_or(0.0)
    }

    fn context_rate(&self) -> Result<u32> {
        self.context
            .as_ref()
            .map(|c| c.sample_rate())
            .ok_or_else(|| PlayerError::ContextInitFailed("audio context not initialized".into()))
    }
}

impl<F: ContextFactory> Drop for PlaybackEngine<F> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
