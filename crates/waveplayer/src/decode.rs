//! Whole-buffer audio decode.
//!
//! Uses Symphonia to:
//! - probe the container/codec of the fetched bytes
//! - decode every packet into interleaved `f32`
//! - resample to the audio context rate with Rubato when the rates differ
//!
//! The result is a [`DecodedBuffer`], the playable unit held by the buffer pool.

use std::io::Cursor;

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    calculate_cutoff, Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{PlayerError, Result};

/// Bytes per decoded sample (`f32` PCM).
pub const BYTES_PER_SAMPLE: u64 = 4;

const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Decoded PCM ready for playback.
///
/// Samples are interleaved: `frame0[ch0], frame0[ch1], ..., frame1[ch0], ...`.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedBuffer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Wrap interleaved samples. `channels` and `sample_rate` are clamped to at least 1.
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// A silent buffer of `frames` frames.
    pub fn silence(frames: usize, channels: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; frames * channels.max(1)], channels, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Memory footprint of the decoded samples, 4 bytes per sample.
    pub fn byte_size(&self) -> u64 {
        self.samples.len() as u64 * BYTES_PER_SAMPLE
    }

    /// Frame index for a time offset, clamped to the buffer length.
    pub fn frame_at(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        ((seconds * self.sample_rate as f64) as usize).min(self.frames())
    }
}

/// Turns compressed bytes into a [`DecodedBuffer`] at the requested rate.
pub trait AudioDecoder: Send + Sync {
    /// Decode `bytes`; `hint` is a file extension, `target_rate` the context rate in Hz.
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>, target_rate: u32) -> Result<DecodedBuffer>;
}

/// Symphonia + Rubato decoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>, target_rate: u32) -> Result<DecodedBuffer> {
        let decoded = decode_bytes(bytes, hint)?;
        if target_rate == 0 || decoded.sample_rate() == target_rate {
            tracing::debug!(rate_hz = decoded.sample_rate(), "resample skipped");
            return Ok(decoded);
        }
        tracing::debug!(
            from_hz = decoded.sample_rate(),
            to_hz = target_rate,
            "resampling decoded buffer"
        );
        resample_buffer(&decoded, target_rate)
    }
}

/// Best-effort extension hint from a URL (query and fragment ignored).
pub fn hint_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn decode_failed(e: impl std::fmt::Display) -> PlayerError {
    PlayerError::DecodeFailed(e.to_string())
}

/// Decode a complete in-memory file at its native rate.
fn decode_bytes(bytes: Vec<u8>, hint_ext: Option<&str>) -> Result<DecodedBuffer> {
    if bytes.is_empty() {
        return Err(PlayerError::DecodeFailed("empty input".to_string()));
    }
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = hint_ext {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(decode_failed)?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PlayerError::DecodeFailed("no default audio track".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut rate = codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(decode_failed)?;

    let mut samples: Vec<f32> = Vec::new();
    if let Some(frames) = codec_params.n_frames {
        samples.reserve((frames as usize).saturating_mul(channels.max(1)));
    }

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_failed(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(decode_failed(e)),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count();
        rate = spec.rate;
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() || channels == 0 || rate == 0 {
        return Err(PlayerError::DecodeFailed("no audio frames decoded".to_string()));
    }
    Ok(DecodedBuffer::new(samples, channels, rate))
}

/// Resample a whole buffer to `dst_rate`, compensating for the resampler delay.
fn resample_buffer(src: &DecodedBuffer, dst_rate: u32) -> Result<DecodedBuffer> {
    let channels = src.channels();
    let f_ratio = dst_rate as f64 / src.sample_rate() as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        RESAMPLE_CHUNK_FRAMES,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| PlayerError::DecodeFailed(format!("resampler init: {e}")))?;

    let delay = resampler.output_delay();
    let expected = (src.frames() as f64 * f_ratio).round() as usize;
    let out_capacity_frames = (RESAMPLE_CHUNK_FRAMES as f64 * f_ratio * 1.2).ceil() as usize + 256;
    let mut scratch = vec![0.0f32; out_capacity_frames * channels];
    let mut out: Vec<f32> = Vec::with_capacity((expected + delay) * channels);

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let input = src.samples();
    let silence = vec![0.0f32; RESAMPLE_CHUNK_FRAMES * channels];
    let mut pos = 0usize;
    let mut flushes = 0usize;

    while out.len() / channels < expected + delay {
        let remaining = src.frames().saturating_sub(pos);
        let (chunk, frames): (&[f32], usize) = if remaining >= RESAMPLE_CHUNK_FRAMES {
            indexing.partial_len = None;
            (
                &input[pos * channels..(pos + RESAMPLE_CHUNK_FRAMES) * channels],
                RESAMPLE_CHUNK_FRAMES,
            )
        } else if remaining > 0 {
            indexing.partial_len = Some(remaining);
            (&input[pos * channels..], remaining)
        } else {
            // Push the delayed tail out with silence.
            flushes += 1;
            if flushes > 4 {
                break;
            }
            indexing.partial_len = Some(0);
            (&silence[..], RESAMPLE_CHUNK_FRAMES)
        };

        let input_adapter = InterleavedSlice::new(chunk, channels, frames.max(1))
            .map_err(|e| PlayerError::DecodeFailed(format!("interleaved slice (input): {e}")))?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut scratch, channels, out_capacity_frames)
            .map_err(|e| PlayerError::DecodeFailed(format!("interleaved slice (output): {e}")))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| PlayerError::DecodeFailed(format!("resampler process: {e}")))?;
        out.extend_from_slice(&scratch[..nbr_out * channels]);
        pos += remaining.min(RESAMPLE_CHUNK_FRAMES);
    }

    let start = (delay * channels).min(out.len());
    let end = ((delay + expected) * channels).min(out.len());
    Ok(DecodedBuffer::new(out[start..end].to_vec(), channels, dst_rate))
}
