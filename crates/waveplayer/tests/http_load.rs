//! End-to-end load over real HTTP: a loopback range server, ureq, Symphonia.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use waveplayer::config::{PlayerConfig, PoolConfig};
use waveplayer::types::{PlaybackStatus, TrackDescriptor};
use waveplayer::{EngineEvent, OfflineContextFactory, PlaybackEngine, PlayerError};

const RATE: u32 = 8_000;

fn wav_bytes(frames: usize) -> Vec<u8> {
    let data_len = (frames * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&RATE.to_le_bytes());
    out.extend_from_slice(&(RATE * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / RATE as f32).sin();
        out.extend_from_slice(&((s * 12_000.0) as i16).to_le_bytes());
    }
    out
}

struct RangeServer {
    url: String,
    ranges: Arc<Mutex<Vec<String>>>,
}

/// Serve `body` at `/track.wav`; with `ranged == false` the server ignores `Range`.
fn serve(body: Vec<u8>, ranged: bool) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/track.wav", listener.local_addr().unwrap());
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let seen = ranges.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            handle(stream, &body, ranged, &seen);
        }
    });
    RangeServer { url, ranges }
}

fn handle(mut stream: TcpStream, body: &[u8], ranged: bool, seen: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }

    let is_head = request_line.starts_with("HEAD");
    let accept = if ranged { "bytes" } else { "none" };
    let (status, payload, extra) = match range.as_deref().and_then(|r| r.strip_prefix("bytes=")) {
        Some(spec) if ranged && !is_head => {
            seen.lock().unwrap().push(spec.to_string());
            let (start, end) = spec.split_once('-').unwrap();
            let start: usize = start.parse().unwrap();
            let end: usize = end.parse::<usize>().unwrap().min(body.len() - 1);
            (
                "206 Partial Content",
                &body[start..=end],
                format!("Content-Range: bytes {start}-{end}/{}\r\n", body.len()),
            )
        }
        _ => ("200 OK", body, String::new()),
    };

    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: audio/wav\r\nContent-Length: {}\r\nAccept-Ranges: {accept}\r\n{extra}Connection: close\r\n\r\n",
        payload.len()
    );
    let _ = stream.write_all(head.as_bytes());
    if !is_head {
        let _ = stream.write_all(payload);
    }
    let _ = stream.flush();
}

fn engine(chunk_size: u64) -> PlaybackEngine<OfflineContextFactory> {
    let config = PlayerConfig {
        pool: PoolConfig {
            chunk_size,
            fetch_timeout_ms: 5_000,
            ..PoolConfig::default()
        },
        ..PlayerConfig::default()
    };
    let factory = OfflineContextFactory {
        sample_rate: RATE,
        channels: 1,
    };
    PlaybackEngine::with_http(factory, &config)
}

fn track(url: &str) -> TrackDescriptor {
    TrackDescriptor {
        id: "wav".into(),
        title: "Sine".into(),
        source_url: url.to_string(),
        ..Default::default()
    }
}

#[test]
fn loads_wav_in_ranges_and_plays() {
    let body = wav_bytes(4_000);
    let total = body.len();
    let server = serve(body, true);
    let mut engine = engine(1_024);

    let buffer = engine.load_track_blocking(track(&server.url)).unwrap();
    assert_eq!(buffer.channels(), 1);
    assert_eq!(buffer.sample_rate(), RATE);
    assert!((buffer.duration() - 0.5).abs() < 1e-3);

    let ranges = server.ranges.lock().unwrap().clone();
    assert_eq!(ranges.len(), total.div_ceil(1_024));
    assert_eq!(ranges[0], "0-1023");
    assert_eq!(ranges.last().unwrap(), &format!("{}-{}", (ranges.len() - 1) * 1_024, total - 1));

    let events = engine.poll();
    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), ranges.len());
    assert_eq!(progress.last().copied(), Some(100.0));

    engine.play().unwrap();
    engine.context_mut().unwrap().advance(0.25);
    engine.poll();
    assert_eq!(engine.status(), PlaybackStatus::Playing);
    assert!((engine.state().current_time - 0.25).abs() < 1e-6);
    engine.cleanup();
}

#[test]
fn host_without_ranges_fails_fast() {
    let server = serve(wav_bytes(800), false);
    let mut engine = engine(256);
    let err = engine.load_track_blocking(track(&server.url)).unwrap_err();
    assert_eq!(err, PlayerError::RangeNotSupported);
    assert_eq!(engine.status(), PlaybackStatus::Error);
    assert!(server.ranges.lock().unwrap().is_empty());
}
