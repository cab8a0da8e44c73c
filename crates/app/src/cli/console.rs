//! Interactive console
//!
//! Reads commands from stdin and is the only task that mutates the mixer.
//! Device notifications and snapshot hot reloads are folded into the same
//! loop, so every change goes through one `&mut RoutingModel`.

use anyhow::Context;
use ftumix_core::domain::{
    Category, ChangeQueue, ConfigStore, ControlValue, InputBank, Macro, MacroEngine, RouteKey, RoutingModel,
    MAX_VOLUME,
};
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

const HELP: &str = "\
commands:
  show [json]                 print routes, links and effects
  set <a|d> <out> <in> <vol>  set a route volume (0-100), following links
  master [vol]                print or set the digital master volume
  link <src> <dst>            changes on output src follow to output dst
  unlink <src> <dst>          remove a link
  macro <name>                run a macro (mute-hardware-routes, pass-through-inputs,
                              disable-effects, mute-unmanaged-digital-routes)
  save <path>                 write a snapshot file
  load <path>                 apply a snapshot file
  diff <path>                 show what loading a snapshot file would change
  help                        this text
  quit                        leave";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a channel number (1, 2, ...)")]
    Channel(String),

    #[error("'{0}' is not a volume (0-100)")]
    Volume(String),

    #[error("{0}")]
    Macro(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show { json: bool },
    Set { key: RouteKey, value: u8 },
    Master(Option<u8>),
    Link { source: usize, target: usize },
    Unlink { source: usize, target: usize },
    Macro(Macro),
    Save(PathBuf),
    Load(PathBuf),
    Diff(PathBuf),
    Help,
    Quit,
}

fn channel(text: &str) -> Result<usize, CommandError> {
    text.parse::<usize>()
        .ok()
        .filter(|&n| n >= 1)
        .map(|n| n - 1)
        .ok_or_else(|| CommandError::Channel(text.to_string()))
}

fn volume(text: &str) -> Result<u8, CommandError> {
    text.parse::<u8>()
        .ok()
        .filter(|&v| v <= MAX_VOLUME)
        .ok_or_else(|| CommandError::Volume(text.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, args)) = words.split_first() else {
            return Err(CommandError::Usage("help"));
        };

        let command = match (head, args) {
            ("show", []) => Command::Show { json: false },
            ("show", ["json"]) => Command::Show { json: true },
            ("show", _) => return Err(CommandError::Usage("show [json]")),
            ("set", [bank, out, input, value]) => {
                let bank = match *bank {
                    "a" | "A" => InputBank::Analog,
                    "d" | "D" => InputBank::Digital,
                    _ => return Err(CommandError::Usage("set <a|d> <out> <in> <vol>")),
                };
                Command::Set {
                    key: RouteKey {
                        bank,
                        output: channel(out)?,
                        input: channel(input)?,
                    },
                    value: volume(value)?,
                }
            }
            ("set", _) => return Err(CommandError::Usage("set <a|d> <out> <in> <vol>")),
            ("master", []) => Command::Master(None),
            ("master", [value]) => Command::Master(Some(volume(value)?)),
            ("master", _) => return Err(CommandError::Usage("master [vol]")),
            ("link", [source, target]) => Command::Link {
                source: channel(source)?,
                target: channel(target)?,
            },
            ("link", _) => return Err(CommandError::Usage("link <src> <dst>")),
            ("unlink", [source, target]) => Command::Unlink {
                source: channel(source)?,
                target: channel(target)?,
            },
            ("unlink", _) => return Err(CommandError::Usage("unlink <src> <dst>")),
            ("macro", [name]) => Command::Macro(name.parse().map_err(CommandError::Macro)?),
            ("macro", _) => return Err(CommandError::Usage("macro <name>")),
            ("save", [path]) => Command::Save(PathBuf::from(path)),
            ("load", [path]) => Command::Load(PathBuf::from(path)),
            ("diff", [path]) => Command::Diff(PathBuf::from(path)),
            ("save" | "load" | "diff", _) => return Err(CommandError::Usage("save|load|diff <path>")),
            ("help" | "?", _) => Command::Help,
            ("quit" | "exit" | "q", _) => Command::Quit,
            (other, _) => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Result of one console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

#[derive(Debug, Serialize)]
struct RouteReport {
    name: String,
    category: Category,
    volume: u8,
}

#[derive(Debug, Serialize)]
struct EffectReport {
    control: String,
    value: ControlValue,
}

/// Machine-readable state for `show json`
#[derive(Debug, Serialize)]
struct StateReport {
    outputs: usize,
    master: Option<u8>,
    routes: Vec<RouteReport>,
    /// 1-based `[source, target]` pairs
    links: Vec<[usize; 2]>,
    effects: Vec<EffectReport>,
}

impl StateReport {
    fn capture(model: &RoutingModel) -> Self {
        Self {
            outputs: model.output_count(),
            master: model.master_average(),
            routes: model
                .routes()
                .iter()
                .map(|r| RouteReport {
                    name: r.key.to_string(),
                    category: r.category(),
                    volume: r.volume(),
                })
                .collect(),
            links: model
                .links()
                .edges()
                .iter()
                .map(|e| [e.source + 1, e.target + 1])
                .collect(),
            effects: model
                .effects()
                .iter()
                .filter_map(|id| model.registry().control(id))
                .map(|c| EffectReport {
                    control: c.id.to_string(),
                    value: c.value(),
                })
                .collect(),
        }
    }
}

fn write_state(out: &mut impl fmt::Write, model: &RoutingModel) -> fmt::Result {
    let outputs = model.output_count();

    for bank in [InputBank::Analog, InputBank::Digital] {
        writeln!(out, "{} routes (rows: outputs, columns: inputs)", bank.prefix())?;
        for output in 0..outputs {
            write!(out, "  Out{:<3}", output + 1)?;
            for input in 0..outputs {
                let key = RouteKey { bank, output, input };
                match model.route(key) {
                    Some(route) => write!(out, " {:>3}", route.volume())?,
                    None => out.write_str("   -")?,
                }
            }
            writeln!(out)?;
        }
    }

    match model.master_average() {
        Some(master) => writeln!(out, "master: {}", master)?,
        None => writeln!(out, "master: -")?,
    }

    let links: Vec<String> = model
        .links()
        .edges()
        .iter()
        .map(|e| format!("Out{}>Out{}", e.source + 1, e.target + 1))
        .collect();
    writeln!(
        out,
        "links: {}",
        if links.is_empty() { "(none)".to_string() } else { links.join(", ") }
    )?;

    for id in model.effects() {
        if let Some(control) = model.registry().control(id) {
            writeln!(out, "{} = {}", control.id, control.value())?;
        }
    }
    Ok(())
}

/// Fold pending device notifications into the model
///
/// Runs on every tick, also when nothing arrived, so the model can age out
/// the echoes it expects for its own writes.
fn apply_device_changes(model: &mut RoutingModel, changes: &ChangeQueue) -> Vec<RouteKey> {
    let changed = model.refresh(&changes.drain());
    for key in &changed {
        debug!(route = %key, volume = model.get_route(*key).unwrap_or(0), "Route changed on device");
    }
    changed
}

/// Run one command against the model
pub async fn execute(model: &mut RoutingModel, command: Command) -> anyhow::Result<Reply> {
    debug!(?command, "Executing console command");
    let text = match command {
        Command::Show { json: false } => {
            let mut text = String::new();
            write_state(&mut text, model)?;
            text
        }
        Command::Show { json: true } => serde_json::to_string_pretty(&StateReport::capture(model))?,
        Command::Set { key, value } => {
            let written = model.set_route(key, value)?;
            format!("{} = {} ({} control(s) written)", key, value, written.len())
        }
        Command::Master(None) => match model.master_average() {
            Some(master) => format!("master: {}", master),
            None => "no digital self-routes on this card".to_string(),
        },
        Command::Master(Some(value)) => {
            let written = model.set_master(value)?;
            format!("master = {} ({} control(s) written)", value, written.len())
        }
        Command::Link { source, target } => {
            if model.link(source, target)? {
                format!("linked Out{} > Out{}", source + 1, target + 1)
            } else {
                format!("Out{} > Out{} already linked", source + 1, target + 1)
            }
        }
        Command::Unlink { source, target } => {
            if model.unlink(source, target) {
                format!("unlinked Out{} > Out{}", source + 1, target + 1)
            } else {
                format!("Out{} > Out{} was not linked", source + 1, target + 1)
            }
        }
        Command::Macro(m) => {
            let written = MacroEngine::run(model, m)?;
            format!("{}: {} control(s) written", m, written.len())
        }
        Command::Save(path) => {
            ConfigStore::save_to_file(model, &path)
                .await
                .with_context(|| format!("saving {}", path.display()))?;
            format!("saved {}", path.display())
        }
        Command::Load(path) => {
            let written = ConfigStore::load_from_file(model, &path)
                .await
                .with_context(|| format!("loading {}", path.display()))?;
            format!("loaded {} ({} control(s) written)", path.display(), written.len())
        }
        Command::Diff(path) => {
            let differences = ConfigStore::diff_file(model, &path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            if differences.is_empty() {
                "no differences".to_string()
            } else {
                differences
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Help => HELP.to_string(),
        Command::Quit => return Ok(Reply::Quit),
    };
    Ok(Reply::Text(text))
}

async fn next_reload(rx: &mut Option<broadcast::Receiver<PathBuf>>) -> Result<PathBuf, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Event loop: console commands, device notifications and hot reloads
pub async fn run(
    model: &mut RoutingModel,
    changes: &ChangeQueue,
    refresh_every: Duration,
    mut reloads: Option<broadcast::Receiver<PathBuf>>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(refresh_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Console ready, type 'help' for commands");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match line.parse::<Command>() {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                match execute(model, command).await {
                    Ok(Reply::Text(text)) => println!("{}", text),
                    Ok(Reply::Quit) => break,
                    Err(e) => println!("error: {:#}", e),
                }
            }
            _ = ticker.tick() => {
                apply_device_changes(model, changes);
            }
            reload = next_reload(&mut reloads) => match reload {
                Ok(path) => match ConfigStore::load_from_file(model, &path).await {
                    Ok(written) => info!(path = %path.display(), written = written.len(), "Snapshot reloaded"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Snapshot reload failed"),
                },
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Reload events coalesced"),
                Err(RecvError::Closed) => {
                    warn!("Snapshot watcher stopped");
                    reloads = None;
                }
            },
        }
    }
    Ok(())
}
