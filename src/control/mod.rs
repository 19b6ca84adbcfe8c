//! Module-mode control server: a line-oriented TCP protocol for
//! pause/resume/terminate and grammar management, modeled on the original
//! `jcontrol`/`japi` text protocol (spec.md §6 "EXTERNAL INTERFACES",
//! grounded on `jcontrol/server.c` and `jcontrol/japi_process.c`). Runs
//! synchronously on `std::net`, one worker thread per connection, matching
//! the rest of the engine's single-threaded-core-plus-bounded-io style
//! (spec.md §5 "Scheduling").
use crate::error::EngineResult;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{info, warn};

/// Commands the control server accepts, translated from the line protocol.
/// The session driver consumes these from a channel between network I/O
/// and the decode loop, keeping the two on separate threads without
/// sharing engine state directly (spec.md §5 "Shared resources").
#[derive(Debug, Clone)]
pub enum ControlCommand {
    Pause,
    Resume,
    Terminate,
    Status,
    GrammarEnable { id: usize },
    GrammarDisable { id: usize },
}

fn parse_line(line: &str) -> Option<ControlCommand> {
    let mut parts = line.trim().split_whitespace();
    match parts.next()?.to_ascii_uppercase().as_str() {
        "PAUSE" => Some(ControlCommand::Pause),
        "RESUME" => Some(ControlCommand::Resume),
        "TERMINATE" => Some(ControlCommand::Terminate),
        "STATUS" => Some(ControlCommand::Status),
        "GRAMMAR_ENABLE" => parts.next()?.parse().ok().map(|id| ControlCommand::GrammarEnable { id }),
        "GRAMMAR_DISABLE" => parts.next()?.parse().ok().map(|id| ControlCommand::GrammarDisable { id }),
        _ => None,
    }
}

/// Starts the control server on `addr`, forwarding parsed commands to
/// `commands` and returning immediately; the server runs on a background
/// thread for the lifetime of the process.
pub fn spawn(addr: &str, commands: Sender<ControlCommand>) -> EngineResult<()> {
    let listener = TcpListener::bind(addr)?;
    info!(%addr, "control server listening");
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let tx = commands.clone();
                    thread::spawn(move || handle_connection(stream, tx));
                }
                Err(e) => warn!(error = %e, "control server accept failed"),
            }
        }
    });
    Ok(())
}

fn handle_connection(stream: TcpStream, commands: Sender<ControlCommand>) {
    let peer = stream.peer_addr().ok();
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "control connection clone failed");
            return;
        }
    };
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        match parse_line(&line) {
            Some(cmd) => {
                let _ = writeln!(writer, "OK");
                if commands.send(cmd).is_err() {
                    break;
                }
            }
            None => {
                let _ = writeln!(writer, "ERROR unknown command");
            }
        }
    }
    info!(?peer, "control connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands_case_insensitively() {
        assert!(matches!(parse_line("pause"), Some(ControlCommand::Pause)));
        assert!(matches!(parse_line("RESUME"), Some(ControlCommand::Resume)));
        assert!(matches!(parse_line("TERMINATE\n"), Some(ControlCommand::Terminate)));
    }

    #[test]
    fn parses_grammar_commands_with_id() {
        match parse_line("GRAMMAR_ENABLE 3") {
            Some(ControlCommand::GrammarEnable { id }) => assert_eq!(id, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(parse_line("BOGUS").is_none());
    }
}
