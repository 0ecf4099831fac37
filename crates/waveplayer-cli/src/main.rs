//! WavePlayer CLI: plays a playlist of HTTP audio sources through the output device.
//!
//! ## Modes
//! - `play`: load a playlist JSON and play it, with transport commands on stdin.
//! - `probe`: load one URL through the buffer pool and print the decoded shape.
//! - `list-devices`: print output devices.

mod cli;
mod commands;

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing_subscriber::EnvFilter;
use waveplayer::device;
use waveplayer::{
    CpalContextFactory, EngineEvent, OfflineContextFactory, PlaybackEngine, PlayerConfig,
    PlayerSession, PlaylistNavigator, VisualizationFeed,
};
use waveplayer_types::{Playlist, TrackDescriptor};

use commands::TransportCommand;

const FRAME_INTERVAL: Duration = Duration::from_millis(20);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,waveplayer=info")
        }))
        .init();

    match args.cmd {
        cli::Command::Play {
            playlist,
            config,
            device,
            shuffle,
            repeat,
            chunk_size,
            max_pool_size,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if device.is_some() {
                cfg.output.device = device;
            }
            if let Some(bytes) = chunk_size {
                cfg.pool.chunk_size = bytes;
            }
            if let Some(bytes) = max_pool_size {
                cfg.pool.max_pool_size = bytes;
            }
            cfg.validate().context("invalid options")?;
            let playlist = load_playlist(&playlist)?;
            run_play(cfg, playlist, shuffle, repeat)
        }
        cli::Command::Probe { url, config } => {
            let cfg = load_config(config.as_deref())?;
            run_probe(&cfg, &url)
        }
        cli::Command::ListDevices => {
            let host = cpal::default_host();
            let devices = device::list_output_devices(&host).context("list output devices")?;
            for (i, d) in devices.iter().enumerate() {
                let marker = if d.is_default { " (default)" } else { "" };
                println!("#{i}: {}{marker} [{}-{} Hz]", d.name, d.min_rate, d.max_rate);
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PlayerConfig> {
    match path {
        Some(path) => PlayerConfig::load(path).with_context(|| format!("load config {:?}", path)),
        None => Ok(PlayerConfig::default()),
    }
}

fn load_playlist(path: &Path) -> Result<Playlist> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read playlist {:?}", path))?;
    let playlist: Playlist =
        serde_json::from_str(&raw).with_context(|| format!("parse playlist {:?}", path))?;
    if playlist.tracks.is_empty() {
        anyhow::bail!("playlist {:?} has no tracks", path);
    }
    Ok(playlist)
}

fn run_play(cfg: PlayerConfig, playlist: Playlist, shuffle: bool, repeat: bool) -> Result<()> {
    tracing::info!(
        playlist = %playlist.title,
        tracks = playlist.tracks.len(),
        chunk_size = cfg.pool.chunk_size,
        max_pool_size = cfg.pool.max_pool_size,
        "starting playback"
    );

    let factory = CpalContextFactory::new(cfg.output.clone());
    let mut engine = PlaybackEngine::with_http(factory, &cfg);
    engine.initialize().context("open audio output")?;

    let mut navigator = PlaylistNavigator::new(playlist);
    navigator.set_shuffle(shuffle);
    navigator.set_repeat(repeat);
    let mut session = PlayerSession::new(engine, navigator);
    session.start(true)?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let quit_tx = tx.clone();
    let _ = ctrlc::set_handler(move || {
        let _ = quit_tx.send(TransportCommand::Quit);
    });
    commands::spawn_stdin_reader(tx);
    println!("commands: p play/pause, n next, b previous, s <secs> seek, v <0..1> volume, m mute, l loop, r retry, q quit");

    let mut feed = VisualizationFeed::new();
    let mut last_status = Instant::now();
    loop {
        match rx.recv_timeout(FRAME_INTERVAL) {
            Ok(TransportCommand::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(cmd) => {
                if let Err(e) = apply_command(&mut session, cmd) {
                    tracing::warn!("{e}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let index_before = session.navigator().index();
        let events = session.poll();
        let mut finished = false;
        for event in &events {
            match event {
                EngineEvent::Loaded { track_id, duration } => {
                    tracing::info!(track_id = %track_id, seconds = %format!("{duration:.1}"), "ready");
                }
                EngineEvent::LoadFailed { error } => {
                    tracing::error!("load failed: {error} (press r to retry)");
                }
                EngineEvent::TrackEnded { .. } => {
                    finished = session.navigator().index() == index_before
                        && !session.navigator().is_repeat();
                }
                EngineEvent::Progress { .. } | EngineEvent::Looped => {}
            }
        }
        if finished {
            tracing::info!("playlist finished");
            break;
        }

        let vis = feed.on_frame(session.engine_mut());
        if last_status.elapsed() >= STATUS_INTERVAL {
            let level = vis
                .waveform
                .as_ref()
                .map(|w| w.iter().map(|b| (*b as i32 - 128).unsigned_abs()).max().unwrap_or(0))
                .unwrap_or(0);
            log_status(&session, level);
            last_status = Instant::now();
        }
    }

    session.cleanup();
    Ok(())
}

fn apply_command(
    session: &mut PlayerSession<CpalContextFactory>,
    cmd: TransportCommand,
) -> waveplayer::Result<()> {
    match cmd {
        TransportCommand::TogglePlay => session.toggle_play(),
        TransportCommand::Next => session.next().map(|r| tracing::debug!(result = ?r, "next")),
        TransportCommand::Previous => {
            session.previous().map(|r| tracing::debug!(result = ?r, "previous"))
        }
        TransportCommand::Seek(secs) => session.engine_mut().seek(secs),
        TransportCommand::Volume(level) => session.engine_mut().set_volume(level),
        TransportCommand::ToggleMute => session.engine_mut().toggle_mute(),
        TransportCommand::ToggleLoop => session.engine_mut().toggle_loop(),
        TransportCommand::Retry => session.engine_mut().retry_load(),
        TransportCommand::Quit => Ok(()),
    }
}

fn log_status(session: &PlayerSession<CpalContextFactory>, level: u32) {
    let snap = session.engine().snapshot();
    let title = snap.track.as_ref().map(|t| t.title.as_str()).unwrap_or("");
    tracing::info!(
        status = %snap.status,
        track = title,
        position = %format!("{:.1}/{:.1}", snap.current_time, snap.duration),
        progress = %format!("{:.0}%", snap.buffer_progress),
        volume = snap.volume,
        muted = snap.is_muted,
        looping = snap.is_looping,
        buffered_bytes = snap.buffered_bytes,
        level,
        "status"
    );
}

fn run_probe(cfg: &PlayerConfig, url: &str) -> Result<()> {
    let factory = OfflineContextFactory {
        sample_rate: cfg.output.sample_rate.unwrap_or(48_000),
        channels: 2,
    };
    let mut engine = PlaybackEngine::with_http(factory, cfg);
    let track = TrackDescriptor {
        id: "probe".to_string(),
        title: url.to_string(),
        source_url: url.to_string(),
        ..Default::default()
    };
    let started = Instant::now();
    let buffer = engine
        .load_track_blocking(track)
        .with_context(|| format!("load {url}"))?;
    let report = serde_json::json!({
        "url": url,
        "durationSecs": buffer.duration(),
        "channels": buffer.channels(),
        "sampleRate": buffer.sample_rate(),
        "frames": buffer.frames(),
        "decodedBytes": buffer.byte_size(),
        "loadMs": started.elapsed().as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    engine.cleanup();
    Ok(())
}
