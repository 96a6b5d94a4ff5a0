//! Command surface for the transcription engine.
//!
//! Grammar mirrors the host control interface:
//! `<uuid> start <lang> [interim] [mono|mixed|stereo] [8k|16k|<rate>]
//! [tap-name] [metadata-json]` and `<uuid> stop [tap-name]`. A bare trailing
//! token is a tap name; a token starting with `{` or `[` is metadata.

use std::sync::Arc;
use tracing::{error, warn};

use crate::engine::{DEFAULT_TAP, MixType, StartOptions, TranscribeEngine};
use crate::transcript::CallMetadata;

pub const SYNTAX: &str =
    "<uuid> [start|stop] lang-code [interim] [mono|mixed|stereo] [8k|16k] [tap-name] [metadata]";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { options: StartOptions },
    Stop { tap_name: String },
}

/// Parse one command line into the target call uuid and the command.
pub fn parse(line: &str) -> Result<(String, Command), String> {
    let args: Vec<&str> = line.split_whitespace().collect();
    if args.len() < 2 {
        return Err(usage());
    }
    let uuid = args[0].to_string();
    match args[1].to_ascii_lowercase().as_str() {
        "stop" => {
            let tap_name = args
                .get(2)
                .map(|s| s.to_string())
                .unwrap_or_else(|| DEFAULT_TAP.to_string());
            Ok((uuid, Command::Stop { tap_name }))
        }
        "start" => {
            let Some(lang) = args.get(2) else {
                return Err(usage());
            };
            let mut options = StartOptions::new(*lang);
            options.interim = args.get(3).copied() == Some("interim");
            if let Some(mix) = args.get(4).copied().and_then(MixType::parse) {
                options.mix = mix;
            }
            if let Some(rate) = args.get(5) {
                options.sample_rate = parse_rate(rate).unwrap_or(options.sample_rate);
            }
            for arg in args.iter().skip(6).take(2) {
                if arg.starts_with('{') || arg.starts_with('[') {
                    options.metadata = parse_metadata(arg);
                } else {
                    options.tap_name = arg.to_string();
                }
            }
            Ok((uuid, Command::Start { options }))
        }
        _ => Err(usage()),
    }
}

/// Execute a command line against the engine, returning the status string.
pub async fn execute(engine: &Arc<TranscribeEngine>, line: &str) -> String {
    match parse(line) {
        Err(usage) => usage,
        Ok((uuid, Command::Start { options })) => {
            match engine.start_session(&uuid, options) {
                Ok(()) => "+OK Success".to_string(),
                Err(e) => {
                    error!(error = %e, "start failed");
                    format!("-ERR {e}")
                }
            }
        }
        Ok((uuid, Command::Stop { tap_name })) => {
            match engine.stop_session(&uuid, &tap_name).await {
                Ok(()) => "+OK Success".to_string(),
                Err(e) => {
                    error!(error = %e, "stop failed");
                    format!("-ERR {e}")
                }
            }
        }
    }
}

fn parse_rate(arg: &str) -> Option<u32> {
    match arg {
        "8k" => Some(8000),
        "16k" => Some(16_000),
        _ => arg
            .parse::<u32>()
            .ok()
            .filter(|rate| *rate > 0 && rate % 8000 == 0),
    }
}

fn parse_metadata(arg: &str) -> CallMetadata {
    match serde_json::from_str(arg) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(error = %e, "unparseable session metadata, starting without it");
            CallMetadata::default()
        }
    }
}

fn usage() -> String {
    format!("-USAGE: {SYNTAX}")
}
