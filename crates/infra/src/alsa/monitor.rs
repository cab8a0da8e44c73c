//! Device change notifications via `amixer events`
//!
//! `amixer -c N events` prints one `event value: '<name>',<index>` line per
//! changed simple control. A background thread reads those lines and
//! forwards the control ids over a crossbeam channel.

use crossbeam::channel::Sender;
use ftumix_core::domain::ControlId;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::amixer::AmixerError;

static EVENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^event (?:value|info): '(.*)',\d+$").expect("event pattern is valid"));

/// Control named by an event line, if any
pub fn parse_event(line: &str) -> Option<ControlId> {
    EVENT_LINE
        .captures(line.trim_end())
        .map(|caps| ControlId::new(&caps[1]))
}

/// Forward every control named in `reader` until it ends or the receiver
/// goes away; returns the number of notifications sent
pub fn forward_events<R: BufRead>(reader: R, tx: &Sender<ControlId>) -> usize {
    let mut sent = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read mixer event");
                break;
            }
        };
        let Some(id) = parse_event(&line) else {
            continue;
        };
        if tx.send(id).is_err() {
            debug!("Change receiver dropped, stopping monitor");
            break;
        }
        sent += 1;
    }
    sent
}

/// Running `amixer events` process; killed on drop
pub struct EventMonitor {
    child: Child,
    thread: Option<JoinHandle<usize>>,
}

impl EventMonitor {
    pub fn spawn(card: u32, tx: Sender<ControlId>) -> Result<Self, AmixerError> {
        let mut child = Command::new("amixer")
            .arg("-c")
            .arg(card.to_string())
            .arg("events")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| AmixerError::Output {
            control: "events".to_string(),
            reason: "no stdout pipe".to_string(),
        })?;

        let thread = thread::Builder::new()
            .name("ftumix-events".to_string())
            .spawn(move || forward_events(BufReader::new(stdout), &tx))?;

        info!(card, "Device event monitor started");
        Ok(Self {
            child,
            thread: Some(thread),
        })
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "Event monitor already exited");
        }
        let _ = self.child.wait();
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(sent) => debug!(sent, "Device event monitor stopped"),
                Err(_) => warn!("Device event monitor thread panicked"),
            }
        }
    }
}
