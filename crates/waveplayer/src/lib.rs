//! WavePlayer core.
//!
//! Chunked HTTP loading into a bounded buffer pool, a pure transport state
//! machine driven by an audio-clock engine, analyser sampling for visualizers
//! and playlist sequencing.
//!
//! Data flow: [`playlist::PlaylistNavigator`] picks a track →
//! [`engine::PlaybackEngine`] asks the [`buffer_pool::BufferPool`] for it → the
//! pool fetches byte ranges and decodes them → the engine starts a source in
//! its [`context::AudioContext`] → [`visualization::VisualizationFeed`] samples
//! the analyser each frame. [`session::PlayerSession`] ties the pieces together.

pub mod analyser;
pub mod buffer_pool;
pub mod config;
pub mod context;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod output;
pub mod playlist;
pub mod session;
pub mod state;
pub mod visualization;

pub use config::PlayerConfig;
pub use context::{AudioContext, ContextFactory, OfflineContext, OfflineContextFactory};
pub use engine::{EngineEvent, PlaybackEngine};
pub use error::{PlayerError, Result};
pub use output::{CpalContext, CpalContextFactory};
pub use playlist::{NavigationResult, PlaylistNavigator};
pub use session::PlayerSession;
pub use state::{PlaybackEvent, PlaybackState};
pub use visualization::VisualizationFeed;
pub use waveplayer_types as types;
