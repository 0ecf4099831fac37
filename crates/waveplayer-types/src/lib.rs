use serde::{Deserialize, Serialize};

/// Track metadata plus the URL the audio bytes are fetched from.
///
/// Supplied by the data layer and never mutated by the player.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    /// Stable track id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Display artist.
    pub artist: String,
    /// Display album.
    pub album: String,
    /// HTTP(S) URL of the encoded audio; must support byte-range requests.
    #[serde(rename = "sourceURL", alias = "sourceUrl")]
    pub source_url: String,
    /// Optional artwork reference (URL or asset key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
    /// Whether the track is meant to loop by default.
    #[serde(default)]
    pub is_loop: bool,
}

/// Ordered collection of tracks. Order is playback order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub tracks: Vec<TrackDescriptor>,
    /// Creation timestamp as supplied by the data layer (RFC 3339).
    #[serde(default)]
    pub created_at: String,
    /// Last update timestamp as supplied by the data layer (RFC 3339).
    #[serde(default)]
    pub updated_at: String,
}

/// Transport status of a playback engine.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// Nothing loaded.
    #[default]
    Idle,
    /// Bytes are being fetched/decoded.
    Loading,
    /// A decoded buffer is ready to play.
    Ready,
    /// A source node is producing audio.
    Playing,
    /// Playback suspended at a recorded offset.
    Paused,
    /// The last operation failed; see the error field.
    Error,
}

impl PlaybackStatus {
    /// Short lowercase label for logs and status lines.
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Ready => "ready",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest analyser frame published for a rendering layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Visualization {
    /// Time-domain bytes (128 = silence).
    pub waveform: Option<Vec<u8>>,
    /// Frequency-domain bytes, one per bin.
    pub frequencies: Option<Vec<u8>>,
}

/// Error category surfaced to the presentation layer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackErrorKind {
    ContentLengthUnavailable,
    RangeNotSupported,
    LoadAborted,
    LoadTimedOut,
    DecodeFailed,
    ContextInitFailed,
    NoBufferLoaded,
    Network,
    InvalidTransition,
    Config,
}

/// Structured error stored in playback state for display and retry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackErrorInfo {
    pub kind: PlaybackErrorKind,
    pub message: String,
}

/// Read-only projection of the engine state for a presentation layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub track: Option<TrackDescriptor>,
    /// Load progress of the active load, 0..=100.
    pub buffer_progress: f64,
    /// Playback position in seconds.
    pub current_time: f64,
    /// Track duration in seconds (0 until loaded).
    pub duration: f64,
    pub volume: f32,
    pub is_muted: bool,
    pub is_looping: bool,
    /// Decoded bytes currently cached by the buffer pool.
    pub buffered_bytes: u64,
    pub error: Option<PlaybackErrorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_descriptor_reads_camel_case_fields() {
        let raw = r#"{
            "id": "t1",
            "title": "Tide",
            "artist": "Someone",
            "album": "Shore",
            "sourceURL": "https://cdn.example/tide.mp3",
            "isLoop": true
        }"#;
        let track: TrackDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(track.source_url, "https://cdn.example/tide.mp3");
        assert!(track.is_loop);
        assert!(track.artwork.is_none());
    }

    #[test]
    fn track_descriptor_accepts_source_url_alias() {
        let raw = r#"{"id":"a","title":"","artist":"","album":"","sourceUrl":"http://x/a.wav"}"#;
        let track: TrackDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(track.source_url, "http://x/a.wav");
        assert!(!track.is_loop);
    }

    #[test]
    fn playlist_defaults_timestamps() {
        let raw = r#"{"id":"p","title":"Mix","tracks":[]}"#;
        let playlist: Playlist = serde_json::from_str(raw).unwrap();
        assert!(playlist.tracks.is_empty());
        assert!(playlist.created_at.is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&PlaybackStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        assert_eq!(PlaybackStatus::Loading.to_string(), "loading");
    }

    #[test]
    fn snapshot_default_is_idle() {
        let snap = PlaybackSnapshot::default();
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert!(snap.error.is_none());
    }
}
