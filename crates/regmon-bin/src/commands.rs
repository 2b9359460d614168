//! Operator commands read from stdin.
//!
//! Stdin is read on a dedicated thread so a pending read never holds the
//! runtime open at shutdown; parsed events reach the loop through a
//! `StreamEventSource`. End of input turns into a quit command.

use core_events::{BackendStatus, CommandEvent, Event, ScrollSignal, StreamEventSource};
use std::io::BufRead;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

pub const HELP: &str = "commands: target <addr> | format <U16|I16|U32|I32|F32|HEX|BIN|ASCII> | up | down | clear | status <running|stopped> | quit";

/// Parse one input line. Blank or unknown lines yield `None`.
pub fn parse_command(line: &str) -> Option<Event> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?.to_ascii_lowercase();
    let arg = parts.next();
    let event = match (verb.as_str(), arg) {
        ("target" | "t", Some(addr)) => {
            Event::Command(CommandEvent::SelectTarget(addr.to_string()))
        }
        ("format" | "f", Some(mode)) => Event::Command(CommandEvent::SetFormat(mode.to_string())),
        ("up" | "u", None) => Event::Scroll(ScrollSignal {
            distance_from_top: 0,
            distance_from_bottom: u32::MAX,
        }),
        ("down" | "d", None) => Event::Scroll(ScrollSignal {
            distance_from_top: u32::MAX,
            distance_from_bottom: 0,
        }),
        ("clear", None) => Event::Command(CommandEvent::Clear),
        ("status", Some(label)) => Event::Status(BackendStatus::from_label(label)),
        ("quit" | "q" | "exit", None) => Event::Command(CommandEvent::Quit),
        _ => {
            warn!(target: "runtime.events", line, "unknown_command");
            return None;
        }
    };
    Some(event)
}

/// Event source fed by a stdin reader thread.
pub fn stdin_source() -> StreamEventSource<UnboundedReceiverStream<Event>> {
    let (tx, rx) = unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("regmon-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(target: "runtime.events", error = %e, "stdin_read_failed");
                        break;
                    }
                };
                let Some(event) = parse_command(&line) else {
                    continue;
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            debug!(target: "runtime.events", "stdin_closed");
            let _ = tx.send(Event::Command(CommandEvent::Quit));
        });
    if let Err(e) = spawned {
        warn!(target: "runtime.events", error = %e, "stdin_thread_spawn_failed");
    }
    StreamEventSource::new("stdin", UnboundedReceiverStream::new(rx))
}
