//! Per-frame analyser sampling for a rendering layer.

use waveplayer_types::{PlaybackStatus, Visualization};

use crate::context::{AudioContext, ContextFactory};
use crate::engine::PlaybackEngine;

/// Copies analyser bytes into the engine's visualization state once per render frame.
///
/// Sampling never touches transport state. While not playing the last frame is
/// kept; with no audio context both fields are `None`.
#[derive(Debug, Default)]
pub struct VisualizationFeed {
    frames_sampled: u64,
}

impl VisualizationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames that produced fresh analyser data.
    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled
    }

    /// Call from the host's render refresh signal.
    pub fn on_frame<'e, F: ContextFactory>(
        &mut self,
        engine: &'e mut PlaybackEngine<F>,
    ) -> &'e Visualization {
        let (status, ctx, vis) = engine.visualization_parts();
        match ctx {
            None => {
                vis.waveform = None;
                vis.frequencies = None;
            }
            Some(ctx) if status == PlaybackStatus::Playing => {
                let waveform = vis.waveform.get_or_insert_with(Vec::new);
                let frequencies = vis.frequencies.get_or_insert_with(Vec::new);
                ctx.sample_analyser(waveform, frequencies);
                self.frames_sampled += 1;
            }
            Some(_) => {}
        }
        vis
    }
}
