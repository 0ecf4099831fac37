//! Transport state and its pure transition function.
//!
//! `Idle -> Loading -> Ready -> Playing <-> Paused`; any status can fall into
//! `Error`, which only `RetryRequested` leaves. [`transition`] never performs
//! side effects: the engine decides what to do with the audio graph by looking
//! at the event it applied and the state it got back.

use std::sync::Arc;

use waveplayer_types::{
    PlaybackErrorInfo, PlaybackSnapshot, PlaybackStatus, TrackDescriptor, Visualization,
};

use crate::decode::DecodedBuffer;
use crate::error::{PlayerError, Result};

/// Full transport state owned by one engine.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub track: Option<TrackDescriptor>,
    pub buffer: Option<Arc<DecodedBuffer>>,
    /// 0..=100.
    pub buffer_progress: f64,
    pub current_time: f64,
    pub duration: f64,
    /// Audio-clock time at which offset 0 of the current segment would have played.
    pub start_time: f64,
    /// Offset the next `Play` resumes from.
    pub paused_offset: f64,
    pub volume: f32,
    pub is_muted: bool,
    pub is_looping: bool,
    pub visualization: Visualization,
    pub error: Option<PlaybackErrorInfo>,
    /// Id of the active load; completions carrying another id are stale.
    pub load_generation: u64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PlaybackState {
    pub fn new(volume: f32) -> Self {
        Self {
            status: PlaybackStatus::Idle,
            track: None,
            buffer: None,
            buffer_progress: 0.0,
            current_time: 0.0,
            duration: 0.0,
            start_time: 0.0,
            paused_offset: 0.0,
            volume: volume.clamp(0.0, 1.0),
            is_muted: false,
            is_looping: false,
            visualization: Visualization::default(),
            error: None,
            load_generation: 0,
        }
    }

    /// Gain the output should sit at.
    pub fn effective_gain(&self) -> f32 {
        if self.is_muted { 0.0 } else { self.volume }
    }

    /// Position implied by the audio clock while playing, or the stored offset otherwise.
    pub fn position_at(&self, now: f64) -> f64 {
        match self.status {
            PlaybackStatus::Playing => self.clamp_offset(now - self.start_time),
            _ => self.paused_offset,
        }
    }

    fn clamp_offset(&self, t: f64) -> f64 {
        if !t.is_finite() {
            return 0.0;
        }
        t.clamp(0.0, self.duration.max(0.0))
    }

    pub fn snapshot(&self, buffered_bytes: u64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.status,
            track: self.track.clone(),
            buffer_progress: self.buffer_progress,
            current_time: self.current_time,
            duration: self.duration,
            volume: self.volume,
            is_muted: self.is_muted,
            is_looping: self.is_looping,
            buffered_bytes,
            error: self.error.clone(),
        }
    }
}

/// Inputs to [`transition`]. Time values are audio-clock seconds.
#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    LoadRequested {
        track: TrackDescriptor,
        generation: u64,
    },
    LoadProgress {
        generation: u64,
        percent: f64,
    },
    LoadSucceeded {
        generation: u64,
        buffer: Arc<DecodedBuffer>,
    },
    LoadFailed {
        generation: u64,
        error: PlayerError,
    },
    RetryRequested {
        generation: u64,
    },
    Play {
        now: f64,
    },
    Pause {
        now: f64,
    },
    Seek {
        position: f64,
        now: f64,
    },
    Tick {
        now: f64,
    },
    /// The active source reached the end of its buffer.
    Ended {
        now: f64,
    },
    SetVolume(f32),
    SetMuted(bool),
    SetLooping(bool),
    /// Failure outside a load (context init, graph errors).
    Failed(PlayerError),
}

impl PlaybackEvent {
    fn action(&self) -> &'static str {
        match self {
            PlaybackEvent::LoadRequested { .. } => "load",
            PlaybackEvent::LoadProgress { .. } => "report progress",
            PlaybackEvent::LoadSucceeded { .. } => "finish load",
            PlaybackEvent::LoadFailed { .. } => "fail load",
            PlaybackEvent::RetryRequested { .. } => "retry",
            PlaybackEvent::Play { .. } => "play",
            PlaybackEvent::Pause { .. } => "pause",
            PlaybackEvent::Seek { .. } => "seek",
            PlaybackEvent::Tick { .. } => "tick",
            PlaybackEvent::Ended { .. } => "end",
            PlaybackEvent::SetVolume(_) => "set volume",
            PlaybackEvent::SetMuted(_) => "mute",
            PlaybackEvent::SetLooping(_) => "loop",
            PlaybackEvent::Failed(_) => "fail",
        }
    }
}

/// Apply `event` to `state`, returning the next state.
///
/// Load events for a generation other than `state.load_generation` return the
/// state unchanged.
pub fn transition(state: &PlaybackState, event: PlaybackEvent) -> Result<PlaybackState> {
    use PlaybackStatus::*;

    let invalid = PlayerError::InvalidTransition {
        from: state.status,
        action: event.action(),
    };
    let mut next = state.clone();

    match event {
        PlaybackEvent::LoadRequested { track, generation } => {
            next.status = Loading;
            next.track = Some(track);
            next.buffer = None;
            next.buffer_progress = 0.0;
            next.current_time = 0.0;
            next.duration = 0.0;
            next.start_time = 0.0;
            next.paused_offset = 0.0;
            next.error = None;
            next.load_generation = generation;
        }
        PlaybackEvent::LoadProgress { generation, percent } => {
            if generation == state.load_generation && state.status == Loading {
                next.buffer_progress = percent.clamp(0.0, 100.0);
            }
        }
        PlaybackEvent::LoadSucceeded { generation, buffer } => {
            if generation == state.load_generation && state.status == Loading {
                next.status = Ready;
                next.duration = buffer.duration();
                next.buffer = Some(buffer);
                next.buffer_progress = 100.0;
            }
        }
        PlaybackEvent::LoadFailed { generation, error } => {
            if generation == state.load_generation && state.status == Loading {
                next.status = Error;
                next.buffer = None;
                next.error = Some(error.to_info());
            }
        }
        PlaybackEvent::RetryRequested { generation } => {
            let track = match (state.status, &state.track) {
                (Error, Some(track)) => track.clone(),
                _ => return Err(invalid),
            };
            return transition(state, PlaybackEvent::LoadRequested { track, generation });
        }
        PlaybackEvent::Play { now } => {
            match state.status {
                Ready | Paused | Playing => {}
                _ if state.buffer.is_none() => return Err(PlayerError::NoBufferLoaded),
                _ => return Err(invalid),
            }
            if state.buffer.is_none() {
                return Err(PlayerError::NoBufferLoaded);
            }
            let offset = state.position_at(now);
            next.status = Playing;
            next.start_time = now - offset;
            next.current_time = offset;
            next.paused_offset = offset;
        }
        PlaybackEvent::Pause { now } => {
            if state.status != Playing {
                return Err(invalid);
            }
            let offset = state.position_at(now);
            next.status = Paused;
            next.paused_offset = offset;
            next.current_time = offset;
        }
        PlaybackEvent::Seek { position, now } => {
            if !matches!(state.status, Ready | Playing | Paused) {
                return Err(invalid);
            }
            let t = state.clamp_offset(position);
            next.current_time = t;
            next.paused_offset = t;
            next.start_time = now - t;
        }
        PlaybackEvent::Tick { now } => {
            if state.status == Playing {
                next.current_time = state.clamp_offset(now - state.start_time);
            }
        }
        PlaybackEvent::Ended { now } => {
            if state.status != Playing {
                return Err(invalid);
            }
            next.current_time = 0.0;
            next.paused_offset = 0.0;
            if state.is_looping {
                next.start_time = now;
            } else {
                next.status = Ready;
                next.start_time = 0.0;
            }
        }
        PlaybackEvent::SetVolume(level) => {
            next.volume = if level.is_finite() { level.clamp(0.0, 1.0) } else { state.volume };
        }
        PlaybackEvent::SetMuted(muted) => next.is_muted = muted,
        PlaybackEvent::SetLooping(looping) => next.is_looping = looping,
        PlaybackEvent::Failed(error) => {
            next.status = Error;
            next.error = Some(error.to_info());
        }
    }

    Ok(next)
}
