//! CPAL-backed audio context.
//!
//! The output callback renders the shared [`Graph`] straight into the device
//! buffer:
//! - mixes active sources with basic channel mapping (mono↔stereo, best-effort otherwise)
//! - feeds the analyser ring before the gain stage
//! - converts `f32` samples to the device sample format
//!
//! The audio clock is the frame counter bumped by the callback, so it stops
//! when the device stops pulling audio.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::analyser::AnalyserNode;
use crate::buffer_pool::lock;
use crate::config::{AnalyserConfig, OutputConfig};
use crate::context::{AudioContext, ContextFactory, Graph, SourceId};
use crate::decode::DecodedBuffer;
use crate::device;
use crate::error::{PlayerError, Result};

/// Audio context playing through a CPAL output stream.
pub struct CpalContext {
    stream: Option<cpal::Stream>,
    graph: Arc<Mutex<Graph>>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    analyser: AnalyserNode,
    ring_scratch: Vec<f32>,
}

impl CpalContext {
    /// Open the configured output device and start the stream.
    pub fn open(output: &OutputConfig, analyser: &AnalyserConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, output.device.as_deref())?;
        let supported = device::pick_output_config(&device, output.sample_rate)?;
        let sample_format = supported.sample_format();
        let config = supported.config();

        let analyser = AnalyserNode::new(analyser);
        let graph = Arc::new(Mutex::new(Graph::new(config.channels as usize, analyser.ring())));
        let frames = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, &graph, &frames),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, &graph, &frames),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, &graph, &frames),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, &graph, &frames),
            other => Err(PlayerError::ContextInitFailed(format!(
                "unsupported sample format: {other:?}"
            ))),
        }?;
        stream
            .play()
            .map_err(|e| PlayerError::ContextInitFailed(format!("start output stream: {e}")))?;

        tracing::info!(
            device = %device::device_name(&device).unwrap_or_default(),
            sample_rate = config.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "audio output opened"
        );

        Ok(Self {
            stream: Some(stream),
            graph,
            frames,
            sample_rate: config.sample_rate,
            analyser,
            ring_scratch: Vec::new(),
        })
    }
}

impl AudioContext for CpalContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn start_source(&mut self, buffer: Arc<DecodedBuffer>, offset: f64) -> Result<SourceId> {
        if self.stream.is_none() {
            return Err(PlayerError::ContextInitFailed("audio output closed".into()));
        }
        Ok(lock(&self.graph).start_source(buffer, offset))
    }

    fn stop_source(&mut self, id: SourceId) -> Result<()> {
        lock(&self.graph).stop_source(id);
        Ok(())
    }

    fn ramp_gain(&mut self, target: f32, duration: f64) {
        let frames = (duration.max(0.0) * self.sample_rate as f64).round() as u64;
        lock(&self.graph).ramp_gain(target, frames);
    }

    fn sample_analyser(&mut self, waveform: &mut Vec<u8>, frequencies: &mut Vec<u8>) {
        lock(&self.graph).copy_ring(&mut self.ring_scratch);
        self.analyser.byte_time_domain(&self.ring_scratch, waveform);
        self.analyser.byte_frequency(&self.ring_scratch, frequencies);
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        lock(&self.graph).take_ended()
    }

    fn close(&mut self) -> Result<()> {
        lock(&self.graph).stop_all();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "pause on close failed");
            }
        }
        Ok(())
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    graph: &Arc<Mutex<Graph>>,
    frames: &Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let graph_cb = graph.clone();
    let frames_cb = frames.clone();
    let mut mix: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                mix.resize(data.len(), 0.0);
                lock(&graph_cb).render(&mut mix);
                for (dst, src) in data.iter_mut().zip(mix.iter()) {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
                }
                frames_cb.fetch_add((data.len() / channels_out) as u64, Ordering::Relaxed);
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::ContextInitFailed(format!("build output stream: {e}")))
}

/// Opens a [`CpalContext`] for the configured output.
#[derive(Clone, Debug, Default)]
pub struct CpalContextFactory {
    pub output: OutputConfig,
}

impl CpalContextFactory {
    pub fn new(output: OutputConfig) -> Self {
        Self { output }
    }
}

impl ContextFactory for CpalContextFactory {
    type Context = CpalContext;

    fn create(&self, analyser: &AnalyserConfig) -> Result<CpalContext> {
        CpalContext::open(&self.output, analyser)
    }
}
