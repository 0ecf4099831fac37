//! Audio context abstraction and the fixed processing graph.
//!
//! Graph layout: `source(s) -> analyser -> gain -> destination`.
//!
//! Source nodes are single-use: [`AudioContext::start_source`] creates, wires
//! and starts a new node, and once stopped (or ended) the id is dead. The
//! audio clock is the number of frames rendered divided by the sample rate, so
//! it only advances when audio is actually produced.
//!
//! [`OfflineContext`] renders on demand with a manually advanced clock; the
//! cpal-backed context lives in [`crate::output`].

use std::sync::Arc;

use crate::analyser::{AnalyserNode, SampleRing};
use crate::config::AnalyserConfig;
use crate::decode::DecodedBuffer;
use crate::error::Result;

/// Identifier of a single-use source node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// Runtime audio context owned by one playback engine.
pub trait AudioContext {
    /// Output sample rate; decoded buffers are resampled to it.
    fn sample_rate(&self) -> u32;

    /// Audio clock in seconds.
    fn current_time(&self) -> f64;

    /// Create a source node for `buffer`, connect it to the analyser and start it at `offset` seconds.
    fn start_source(&mut self, buffer: Arc<DecodedBuffer>, offset: f64) -> Result<SourceId>;

    /// Stop and disconnect a source. Unknown or finished ids are ignored.
    fn stop_source(&mut self, id: SourceId) -> Result<()>;

    /// Linear gain ramp from the current value to `target` over `duration` seconds, starting now.
    fn ramp_gain(&mut self, target: f32, duration: f64);

    /// Fill the analyser byte buffers from the latest rendered audio.
    fn sample_analyser(&mut self, waveform: &mut Vec<u8>, frequencies: &mut Vec<u8>);

    /// Sources that reached the end of their buffer since the last call.
    fn take_ended(&mut self) -> Vec<SourceId>;

    /// Release the output. Further calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

/// Builds a context on first use (engine `initialize`).
pub trait ContextFactory {
    type Context: AudioContext;

    fn create(&self, analyser: &AnalyserConfig) -> Result<Self::Context>;
}

struct ActiveSource {
    id: SourceId,
    buffer: Arc<DecodedBuffer>,
    pos: usize,
}

#[derive(Clone, Copy, Debug)]
struct GainRamp {
    from: f32,
    to: f32,
    start_frame: u64,
    end_frame: u64,
}

/// Render state shared by both context implementations.
pub(crate) struct Graph {
    out_channels: usize,
    sources: Vec<ActiveSource>,
    gain: f32,
    ramp: Option<GainRamp>,
    ring: SampleRing,
    ended: Vec<SourceId>,
    frames_rendered: u64,
    next_id: u64,
}

impl Graph {
    pub(crate) fn new(out_channels: usize, ring: SampleRing) -> Self {
        Self {
            out_channels: out_channels.max(1),
            sources: Vec::new(),
            gain: 1.0,
            ramp: None,
            ring,
            ended: Vec::new(),
            frames_rendered: 0,
            next_id: 1,
        }
    }

    pub(crate) fn channels(&self) -> usize {
        self.out_channels
    }

    pub(crate) fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub(crate) fn active_sources(&self) -> usize {
        self.sources.len()
    }

    pub(crate) fn start_source(&mut self, buffer: Arc<DecodedBuffer>, offset: f64) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        let pos = buffer.frame_at(offset);
        self.sources.push(ActiveSource { id, buffer, pos });
        id
    }

    pub(crate) fn stop_source(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        before != self.sources.len()
    }

    pub(crate) fn stop_all(&mut self) {
        self.sources.clear();
    }

    pub(crate) fn ramp_gain(&mut self, target: f32, duration_frames: u64) {
        let from = self.gain_at(self.frames_rendered);
        if duration_frames == 0 {
            self.gain = target;
            self.ramp = None;
            return;
        }
        self.gain = from;
        self.ramp = Some(GainRamp {
            from,
            to: target,
            start_frame: self.frames_rendered,
            end_frame: self.frames_rendered + duration_frames,
        });
    }

    pub(crate) fn gain_at(&self, frame: u64) -> f32 {
        match self.ramp {
            Some(r) if frame >= r.end_frame => r.to,
            Some(r) if frame <= r.start_frame => r.from,
            Some(r) => {
                let t = (frame - r.start_frame) as f32 / (r.end_frame - r.start_frame) as f32;
                r.from + (r.to - r.from) * t
            }
            None => self.gain,
        }
    }

    pub(crate) fn copy_ring(&self, out: &mut Vec<f32>) {
        self.ring.copy_ordered(out);
    }

    pub(crate) fn take_ended(&mut self) -> Vec<SourceId> {
        std::mem::take(&mut self.ended)
    }

    /// Render interleaved `f32` frames into `out` and advance the clock.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        let channels = self.out_channels;
        let frames = out.len() / channels;
        for frame in 0..frames {
            let gain = self.gain_at(self.frames_rendered);
            let dst = &mut out[frame * channels..(frame + 1) * channels];
            dst.fill(0.0);
            let mut mono = 0.0f32;
            for src in self.sources.iter_mut() {
                if src.pos >= src.buffer.frames() {
                    continue;
                }
                let src_channels = src.buffer.channels();
                let base = src.pos * src_channels;
                let samples = &src.buffer.samples()[base..base + src_channels];
                for (ch, slot) in dst.iter_mut().enumerate() {
                    *slot += map_channel(samples, channels, ch);
                }
                mono += samples.iter().sum::<f32>() / src_channels as f32;
                src.pos += 1;
            }
            self.ring.push(mono);
            for slot in dst.iter_mut() {
                *slot *= gain;
            }
            self.frames_rendered += 1;
        }

        if let Some(r) = self.ramp {
            if self.frames_rendered >= r.end_frame {
                self.gain = r.to;
                self.ramp = None;
            }
        }

        let ended = &mut self.ended;
        self.sources.retain(|s| {
            let done = s.pos >= s.buffer.frames();
            if done {
                ended.push(s.id);
            }
            !done
        });
    }
}

/// Output sample for `dst_ch` from one source frame.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to available channels
fn map_channel(frame: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let src_channels = frame.len();
    match (src_channels, dst_channels) {
        (2, 1) => 0.5 * (frame[0] + frame[1]),
        _ => frame[dst_ch.min(src_channels.saturating_sub(1))],
    }
}

/// Context with a manually advanced clock.
///
/// Nothing is audible; [`OfflineContext::advance`] renders audio into a scratch
/// buffer so the clock, the analyser and the "ended" notifications behave as
/// they would against real hardware.
pub struct OfflineContext {
    sample_rate: u32,
    graph: Graph,
    analyser: AnalyserNode,
    ring_scratch: Vec<f32>,
    render_scratch: Vec<f32>,
    started: Vec<(SourceId, f64)>,
    closed: bool,
}

impl OfflineContext {
    pub fn new(sample_rate: u32, channels: usize, analyser: &AnalyserConfig) -> Self {
        let analyser = AnalyserNode::new(analyser);
        let ring = analyser.ring();
        Self {
            sample_rate: sample_rate.max(1),
            graph: Graph::new(channels, ring),
            analyser,
            ring_scratch: Vec::new(),
            render_scratch: Vec::new(),
            started: Vec::new(),
            closed: false,
        }
    }

    /// Render `seconds` of audio and advance the clock by the same amount.
    pub fn advance(&mut self, seconds: f64) {
        if self.closed || seconds <= 0.0 {
            return;
        }
        let target = ((self.graph.frames_rendered() as f64 / self.sample_rate as f64 + seconds)
            * self.sample_rate as f64)
            .round() as u64;
        let frames = target.saturating_sub(self.graph.frames_rendered()) as usize;
        let channels = self.graph.channels();
        self.render_scratch.resize(frames * channels, 0.0);
        self.graph.render(&mut self.render_scratch);
    }

    /// Number of sources currently producing audio.
    pub fn active_sources(&self) -> usize {
        self.graph.active_sources()
    }

    /// Every `(source, offset)` started so far, oldest first.
    pub fn started_sources(&self) -> &[(SourceId, f64)] {
        &self.started
    }

    /// Gain at the current clock position.
    pub fn gain(&self) -> f32 {
        self.graph.gain_at(self.graph.frames_rendered())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AudioContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.graph.frames_rendered() as f64 / self.sample_rate as f64
    }

    fn start_source(&mut self, buffer: Arc<DecodedBuffer>, offset: f64) -> Result<SourceId> {
        let id = self.graph.start_source(buffer, offset);
        self.started.push((id, offset));
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) -> Result<()> {
        self.graph.stop_source(id);
        Ok(())
    }

    fn ramp_gain(&mut self, target: f32, duration: f64) {
        let frames = (duration.max(0.0) * self.sample_rate as f64).round() as u64;
        self.graph.ramp_gain(target, frames);
    }

    fn sample_analyser(&mut self, waveform: &mut Vec<u8>, frequencies: &mut Vec<u8>) {
        self.graph.copy_ring(&mut self.ring_scratch);
        self.analyser.byte_time_domain(&self.ring_scratch, waveform);
        self.analyser.byte_frequency(&self.ring_scratch, frequencies);
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        self.graph.take_ended()
    }

    fn close(&mut self) -> Result<()> {
        self.graph.stop_all();
        self.closed = true;
        Ok(())
    }
}

/// Factory for [`OfflineContext`].
#[derive(Clone, Copy, Debug)]
pub struct OfflineContextFactory {
    pub sample_rate: u32,
    pub channels: usize,
}

impl Default for OfflineContextFactory {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl ContextFactory for OfflineContextFactory {
    type Context = OfflineContext;

    fn create(&self, analyser: &AnalyserConfig) -> Result<OfflineContext> {
        Ok(OfflineContext::new(self.sample_rate, self.channels, analyser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OfflineContext {
        OfflineContext::new(1_000, 2, &AnalyserConfig { fft_size: 32, ..AnalyserConfig::default() })
    }

    fn tone(frames: usize, value: f32) -> Arc<DecodedBuffer> {
        Arc::new(DecodedBuffer::new(vec![value; frames], 1, 1_000))
    }

    #[test]
    fn clock_advances_with_rendered_frames() {
        let mut ctx = ctx();
        assert_eq!(ctx.current_time(), 0.0);
        ctx.advance(1.5);
        assert!((ctx.current_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn source_starts_at_offset_and_ends() {
        let mut ctx = ctx();
        let id = ctx.start_source(tone(1_000, 0.5), 0.25).unwrap();
        assert_eq!(ctx.active_sources(), 1);
        ctx.advance(0.5);
        assert!(ctx.take_ended().is_empty());
        ctx.advance(0.3);
        assert_eq!(ctx.take_ended(), vec![id]);
        assert_eq!(ctx.active_sources(), 0);
        assert!(ctx.take_ended().is_empty());
    }

    #[test]
    fn stopped_source_never_reports_ended() {
        let mut ctx = ctx();
        let id = ctx.start_source(tone(10, 0.5), 0.0).unwrap();
        ctx.stop_source(id).unwrap();
        ctx.stop_source(id).unwrap();
        ctx.advance(1.0);
        assert!(ctx.take_ended().is_empty());
    }

    #[test]
    fn gain_ramps_linearly() {
        let mut ctx = ctx();
        ctx.ramp_gain(0.0, 0.1);
        ctx.advance(0.05);
        assert!((ctx.gain() - 0.5).abs() < 0.02);
        ctx.advance(0.1);
        assert_eq!(ctx.gain(), 0.0);
        ctx.ramp_gain(0.8, 0.0);
        assert_eq!(ctx.gain(), 0.8);
    }

    #[test]
    fn render_maps_mono_to_stereo_and_applies_gain() {
        let mut graph = Graph::new(2, SampleRing::new(8));
        graph.start_source(tone(4, 0.5), 0.0);
        graph.ramp_gain(0.5, 0);
        let mut out = vec![0.0f32; 8];
        graph.render(&mut out);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn analyser_sees_signal_before_gain() {
        let mut ctx = ctx();
        ctx.ramp_gain(0.0, 0.0);
        ctx.start_source(tone(1_000, 0.5), 0.0).unwrap();
        ctx.advance(0.1);
        let (mut wave, mut freq) = (Vec::new(), Vec::new());
        ctx.sample_analyser(&mut wave, &mut freq);
        assert_eq!(wave.len(), 32);
        assert!(wave.iter().all(|b| *b == 192));
        assert_eq!(freq.len(), 16);
    }

    #[test]
    fn close_stops_everything() {
        let mut ctx = ctx();
        ctx.start_source(tone(1_000, 0.5), 0.0).unwrap();
        ctx.close().unwrap();
        ctx.close().unwrap();
        assert!(ctx.is_closed());
        assert_eq!(ctx.active_sources(), 0);
    }

    #[test]
    fn map_channel_downmixes_stereo() {
        assert_eq!(map_channel(&[1.0, 0.0], 1, 0), 0.5);
        assert_eq!(map_channel(&[0.3], 2, 1), 0.3);
        assert_eq!(map_channel(&[0.1, 0.2, 0.3], 2, 1), 0.2);
    }
}
