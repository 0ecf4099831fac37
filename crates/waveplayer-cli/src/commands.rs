//! Line-based transport commands read from stdin.

use std::io::BufRead;

use crossbeam_channel::Sender;

#[derive(Clone, Debug, PartialEq)]
pub enum TransportCommand {
    TogglePlay,
    Next,
    Previous,
    Seek(f64),
    Volume(f32),
    ToggleMute,
    ToggleLoop,
    Retry,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<TransportCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    let cmd = match head {
        "p" => TransportCommand::TogglePlay,
        "n" => TransportCommand::Next,
        "b" => TransportCommand::Previous,
        "s" => {
            let secs = arg
                .ok_or("usage: s <seconds>")?
                .parse::<f64>()
                .map_err(|e| format!("bad seek position: {e}"))?;
            TransportCommand::Seek(secs)
        }
        "v" => {
            let level = arg
                .ok_or("usage: v <0..1>")?
                .parse::<f32>()
                .map_err(|e| format!("bad volume: {e}"))?;
            TransportCommand::Volume(level)
        }
        "m" => TransportCommand::ToggleMute,
        "l" => TransportCommand::ToggleLoop,
        "r" => TransportCommand::Retry,
        "q" => TransportCommand::Quit,
        other => return Err(format!("unknown command: {other} (p n b s v m l r q)")),
    };
    Ok(Some(cmd))
}

/// Read stdin on a background thread and forward parsed commands.
pub fn spawn_stdin_reader(tx: Sender<TransportCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse(&line) {
                Ok(Some(cmd)) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(msg) => tracing::warn!("{msg}"),
            }
        }
    });
}
