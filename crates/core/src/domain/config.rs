//! Snapshot files for the mixer state
//!
//! This module provides:
//! - [`Snapshot`]: every control value plus every output link, in a
//!   line-oriented text form that is easy to edit by hand
//! - [`ConfigStore`]: async save/load/diff of snapshot files
//! - [`ConfigWatcher`]: hot-reload notifications when a snapshot file changes
//!
//! File format, one entry per line:
//!
//! ```text
//! # comment
//! AIn1 - Out1=75
//! Effect Switch=off
//! @link 1 2
//! ```
//!
//! Control lines are `<control-id>=<value>`; link lines are
//! `@link <source> <target>` with 1-based output numbers.

use crate::domain::control::{ControlError, ControlId, ControlValue};
use crate::domain::link::LinkEdge;
use crate::domain::routing::{MixerError, RoutingModel};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tag that starts a link line
pub const LINK_TAG: &str = "@link";

const HEADER: &str = "# ftumix snapshot";

/// Errors that can occur while saving or loading snapshot files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to apply snapshot: {0}")]
    Apply(#[from] MixerError),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),
}

/// A snapshot line that could not be accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}: `{content}`")]
pub struct ParseError {
    /// 1-based line number
    pub line: usize,
    pub content: String,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unrecognized line")]
    Unrecognized,

    #[error("unknown control '{0}'")]
    UnknownControl(String),

    #[error("control listed more than once")]
    Duplicate,

    #[error("invalid value")]
    BadValue,

    #[error("{0}")]
    OutOfRange(ControlError),

    #[error("expected `@link <source> <target>` with output numbers from 1")]
    BadLink,

    #[error("output linked to itself")]
    SelfLink,

    #[error("no such output: Out{0}")]
    UnknownOutput(usize),
}

/// Point-in-time copy of all control values and links
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    controls: Vec<(ControlId, ControlValue)>,
    links: Vec<LinkEdge>,
}

/// One way in which live state differs from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    Control {
        id: ControlId,
        live: ControlValue,
        stored: ControlValue,
    },
    Links {
        live: Vec<LinkEdge>,
        stored: Vec<LinkEdge>,
    },
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difference::Control { id, live, stored } => write!(f, "{}: {} -> {}", id, live, stored),
            Difference::Links { live, stored } => {
                write!(f, "links: {} -> {}", format_links(live), format_links(stored))
            }
        }
    }
}

fn format_links(edges: &[LinkEdge]) -> String {
    if edges.is_empty() {
        return "(none)".to_string();
    }
    edges
        .iter()
        .map(|e| format!("Out{}>Out{}", e.source + 1, e.target + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Snapshot {
    /// Capture every discovered control and every link
    ///
    /// Controls come in enumeration order, links in insertion order.
    pub fn capture(model: &RoutingModel) -> Self {
        Self {
            controls: model
                .registry()
                .controls()
                .iter()
                .map(|c| (c.id.clone(), c.value()))
                .collect(),
            links: model.links().edges().to_vec(),
        }
    }

    pub fn controls(&self) -> &[(ControlId, ControlValue)] {
        &self.controls
    }

    pub fn links(&self) -> &[LinkEdge] {
        &self.links
    }

    /// Text form of the snapshot
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(HEADER.len() + self.controls.len() * 24);
        out.push_str(HEADER);
        out.push('\n');
        for (id, value) in &self.controls {
            out.push_str(&format!("{}={}\n", id, value));
        }
        for edge in &self.links {
            out.push_str(&format!("{} {} {}\n", LINK_TAG, edge.source + 1, edge.target + 1));
        }
        out
    }

    /// Parse and validate a snapshot against the live model
    ///
    /// The first bad line aborts the parse. Blank lines and `#` comments are
    /// ignored. Nothing is written to the model.
    pub fn parse(text: &str, model: &RoutingModel) -> std::result::Result<Self, ParseError> {
        let mut controls = Vec::new();
        let mut seen = HashSet::new();
        let mut links: Vec<LinkEdge> = Vec::new();

        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let fail = |kind| ParseError {
                line: n + 1,
                content: raw.to_string(),
                kind,
            };

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with(LINK_TAG) && !line.contains('=') {
                let edge = parse_link(line, model.output_count()).map_err(fail)?;
                if !links.contains(&edge) {
                    links.push(edge);
                }
                continue;
            }

            let Some((id, value)) = line.rsplit_once('=') else {
                return Err(fail(ParseErrorKind::Unrecognized));
            };
            let id = ControlId::new(id.trim());
            let control = model
                .registry()
                .control(&id)
                .ok_or_else(|| fail(ParseErrorKind::UnknownControl(id.to_string())))?;
            let value = control
                .kind
                .parse_value(value.trim())
                .ok_or_else(|| fail(ParseErrorKind::BadValue))?;
            control
                .kind
                .validate(&id, value)
                .map_err(|e| fail(ParseErrorKind::OutOfRange(e)))?;
            if !seen.insert(id.clone()) {
                return Err(fail(ParseErrorKind::Duplicate));
            }
            controls.push((id, value));
        }

        debug!(controls = controls.len(), links = links.len(), "Snapshot parsed");
        Ok(Self { controls, links })
    }

    /// Apply the snapshot to the live model
    ///
    /// Links are replaced wholesale by the snapshot's links (an empty list
    /// removes every link). Controls are partial: only the listed ones are
    /// written, each directly and without link propagation, since the snapshot
    /// already holds the propagated values. A device failure stops the apply;
    /// controls written before it stay written.
    pub fn apply(&self, model: &mut RoutingModel) -> std::result::Result<Vec<ControlId>, MixerError> {
        model.replace_links(&self.links)?;

        let mut applied = Vec::with_capacity(self.controls.len());
        for (id, value) in &self.controls {
            if let Err(source) = model.write_control(id, *value) {
                return Err(MixerError::Control(source).after(applied));
            }
            applied.push(id.clone());
        }
        info!(
            controls = applied.len(),
            links = self.links.len(),
            "Snapshot applied"
        );
        Ok(applied)
    }

    /// What applying this snapshot would change
    pub fn diff(&self, model: &RoutingModel) -> Vec<Difference> {
        let mut differences: Vec<Difference> = self
            .controls
            .iter()
            .filter_map(|(id, stored)| {
                let live = model.registry().get(id).ok()?;
                (live != *stored).then(|| Difference::Control {
                    id: id.clone(),
                    live,
                    stored: *stored,
                })
            })
            .collect();

        let live: HashSet<&LinkEdge> = model.links().edges().iter().collect();
        let stored: HashSet<&LinkEdge> = self.links.iter().collect();
        if live != stored {
            differences.push(Difference::Links {
                live: model.links().edges().to_vec(),
                stored: self.links.clone(),
            });
        }
        differences
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn parse_link(line: &str, outputs: usize) -> std::result::Result<LinkEdge, ParseErrorKind> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some(LINK_TAG) {
        return Err(ParseErrorKind::Unrecognized);
    }
    let mut output = || -> std::result::Result<usize, ParseErrorKind> {
        let number: usize = parts
            .next()
            .and_then(|p| p.parse().ok())
            .filter(|&n| n >= 1)
            .ok_or(ParseErrorKind::BadLink)?;
        if number > outputs {
            return Err(ParseErrorKind::UnknownOutput(number));
        }
        Ok(number - 1)
    };
    let source = output()?;
    let target = output()?;
    if parts.next().is_some() {
        return Err(ParseErrorKind::BadLink);
    }
    if source == target {
        return Err(ParseErrorKind::SelfLink);
    }
    Ok(LinkEdge::new(source, target))
}

/// Snapshot file operations
pub struct ConfigStore;

impl ConfigStore {
    /// Save the full live state
    #[instrument(skip(model, path))]
    pub async fn save_to_file<P: AsRef<Path>>(model: &RoutingModel, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving snapshot");

        let text = Snapshot::capture(model).render();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, text).await?;

        debug!("Snapshot saved successfully");
        Ok(())
    }

    /// Read and validate a snapshot file without applying it
    #[instrument(skip(model, path))]
    pub async fn read_snapshot<P: AsRef<Path>>(model: &RoutingModel, path: P) -> Result<Snapshot> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        Ok(Snapshot::parse(&contents, model)?)
    }

    /// Load a snapshot file into the live state
    ///
    /// The file is validated completely before anything is written; a
    /// [`ParseError`] leaves the model untouched.
    ///
    /// Controls and links follow different rules on purpose:
    /// - controls are **partial**: only controls named in the file change,
    ///   everything else keeps its current value;
    /// - links are **total**: the live links become exactly the file's links,
    ///   so a file without `@link` lines removes all links.
    ///
    /// Returns the controls written.
    #[instrument(skip(model, path))]
    pub async fn load_from_file<P: AsRef<Path>>(model: &mut RoutingModel, path: P) -> Result<Vec<ControlId>> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading snapshot");

        let snapshot = Self::read_snapshot(model, path).await?;
        let applied = snapshot.apply(model)?;

        debug!(written = applied.len(), "Snapshot loaded successfully");
        Ok(applied)
    }

    /// Differences between a snapshot file and the live state
    pub async fn diff_file<P: AsRef<Path>>(model: &RoutingModel, path: P) -> Result<Vec<Difference>> {
        let snapshot = Self::read_snapshot(model, path).await?;
        Ok(snapshot.diff(model))
    }
}

/// Watches a snapshot file for modifications
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    changes_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch `path`; its parent directory is watched so editors that replace
    /// the file on save are still noticed
    pub fn new(path: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (changes_tx, _changes_rx) = broadcast::channel(32);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|n| n.to_os_string());

        let tx_clone = changes_tx.clone();
        let watched = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Snapshot watch error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) {
                return;
            }
            if event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name)
            {
                if let Err(e) = tx_clone.send(watched.clone()) {
                    error!("Failed to send snapshot change event: {}", e);
                }
            }
        })?;

        watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), "Snapshot watcher started");

        Ok(Self {
            _watcher: watcher,
            changes_tx,
        })
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.changes_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::control::ControlRegistry;
    use crate::domain::routing::RouteKey;
    use crate::domain::simulated::{SimulatedCard, SimulatedHandle};
    use tempfile::TempDir;

    fn model(channels: usize) -> (RoutingModel, SimulatedHandle) {
        let card = SimulatedCard::fast_track_ultra(channels);
        let handle = card.handle();
        let registry = ControlRegistry::discover(Box::new(card)).unwrap();
        (RoutingModel::new(registry), handle)
    }

    fn values(model: &RoutingModel) -> Vec<ControlValue> {
        model.registry().controls().iter().map(|c| c.value()).collect()
    }

    #[test]
    fn test_render_is_ordered() {
        let (mut model, _) = model(2);
        model.link(1, 0).unwrap();
        model.link(0, 1).unwrap();

        let text = Snapshot::capture(&model).render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "AIn1 - Out1=0");
        assert_eq!(lines[5], "DIn1 - Out1=100");
        assert!(lines.contains(&"Effect Switch=on"));
        assert_eq!(&lines[lines.len() - 2..], &["@link 2 1", "@link 1 2"]);
    }

    #[test]
    fn test_round_trip_restores_everything() {
        let (mut model, _) = model(3);
        model.set_route(RouteKey::analog(0, 1), 37).unwrap();
        model.write_control(&ControlId::new("Effect Switch"), ControlValue::Switch(false)).unwrap();
        model.link(0, 2).unwrap();
        model.link(2, 1).unwrap();
        let text = Snapshot::capture(&model).render();
        let saved_values = values(&model);
        let saved_links = model.links().edges().to_vec();

        // scramble
        model.set_route(RouteKey::analog(0, 1), 90).unwrap();
        model.write_control(&ControlId::new("Effect Volume"), ControlValue::Level(5)).unwrap();
        model.unlink(0, 2);
        model.link(1, 0).unwrap();

        Snapshot::parse(&text, &model).unwrap().apply(&mut model).unwrap();
        assert_eq!(values(&model), saved_values);
        assert_eq!(model.links().edges(), saved_links.as_slice());
        assert_eq!(model.get_route(RouteKey::analog(0, 1)).unwrap(), 37);
    }

    #[test]
    fn test_partial_load_touches_only_listed_controls() {
        let (mut model, handle) = model(2);
        model.set_route(RouteKey::analog(1, 1), 22).unwrap();
        let before = values(&model);
        handle.clear_writes();

        let text = "AIn1 - Out1=64\nEffect Switch = off\n";
        Snapshot::parse(text, &model).unwrap().apply(&mut model).unwrap();

        let after = values(&model);
        let changed: Vec<&ControlId> = model
            .registry()
            .controls()
            .iter()
            .zip(before.iter().zip(after.iter()))
            .filter(|(_, (b, a))| b != a)
            .map(|(c, _)| &c.id)
            .collect();
        assert_eq!(
            changed,
            vec![&ControlId::new("AIn1 - Out1"), &ControlId::new("Effect Switch")]
        );
        assert_eq!(handle.writes().len(), 2);
        assert_eq!(model.get_route(RouteKey::analog(1, 1)).unwrap(), 22);
    }

    #[test]
    fn test_load_does_not_propagate() {
        let (mut model, _) = model(2);
        let text = "@link 1 2\nAIn1 - Out1=50\nAIn1 - Out2=10\n";
        Snapshot::parse(text, &model).unwrap().apply(&mut model).unwrap();

        assert!(model.links().is_linked(0, 1));
        assert_eq!(model.get_route(RouteKey::analog(0, 0)).unwrap(), 50);
        assert_eq!(model.get_route(RouteKey::analog(1, 0)).unwrap(), 10);
    }

    #[test]
    fn test_links_are_replaced_totally() {
        let (mut model, _) = model(3);
        model.link(0, 1).unwrap();
        model.link(1, 2).unwrap();

        Snapshot::parse("@link 3 1\n", &model).unwrap().apply(&mut model).unwrap();
        assert_eq!(model.links().edges(), &[LinkEdge::new(2, 0)]);

        Snapshot::parse("AIn1 - Out1=1\n", &model).unwrap().apply(&mut model).unwrap();
        assert!(model.links().is_empty());
    }

    #[test]
    fn test_malformed_line_aborts_without_mutation() {
        let (model, handle) = model(2);
        let text = "AIn1 - Out1=64\nAIn2 - Out1=loud\nAIn2 - Out2=3\n";

        let err = Snapshot::parse(text, &model).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.content, "AIn2 - Out1=loud");
        assert_eq!(err.kind, ParseErrorKind::BadValue);
        assert!(handle.writes().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        let (model, _) = model(2);
        let kind = |text: &str| Snapshot::parse(text, &model).unwrap_err().kind;

        assert_eq!(kind("just some words"), ParseErrorKind::Unrecognized);
        assert_eq!(
            kind("AIn9 - Out9=1"),
            ParseErrorKind::UnknownControl("AIn9 - Out9".to_string())
        );
        assert!(matches!(kind("AIn1 - Out1=101"), ParseErrorKind::OutOfRange(_)));
        assert_eq!(kind("Effect Switch=maybe"), ParseErrorKind::BadValue);
        assert_eq!(kind("AIn1 - Out1=1\nAIn1 - Out1=2"), ParseErrorKind::Duplicate);
        assert_eq!(kind("@link 1"), ParseErrorKind::BadLink);
        assert_eq!(kind("@link 0 1"), ParseErrorKind::BadLink);
        assert_eq!(kind("@link 1 2 3"), ParseErrorKind::BadLink);
        assert_eq!(kind("@link 2 2"), ParseErrorKind::SelfLink);
        assert_eq!(kind("@link 1 3"), ParseErrorKind::UnknownOutput(3));
        assert_eq!(kind("@linkage 1 2"), ParseErrorKind::Unrecognized);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let (model, _) = model(2);
        let snapshot = Snapshot::parse("# saved by hand\n\n   \nAIn1 - Out1=9\r\n", &model).unwrap();
        assert_eq!(
            snapshot.controls(),
            &[(ControlId::new("AIn1 - Out1"), ControlValue::Level(9))]
        );
    }

    #[test]
    fn test_diff() {
        let (mut model, _) = model(2);
        let snapshot = Snapshot::parse("AIn1 - Out1=0\nAIn2 - Out1=40\n@link 1 2\n", &model).unwrap();

        let differences = snapshot.diff(&model);
        assert_eq!(differences.len(), 2);
        assert_eq!(
            differences[0],
            Difference::Control {
                id: ControlId::new("AIn2 - Out1"),
                live: ControlValue::Level(0),
                stored: ControlValue::Level(40),
            }
        );
        assert_eq!(differences[1].to_string(), "links: (none) -> Out1>Out2");

        snapshot.apply(&mut model).unwrap();
        assert!(snapshot.diff(&model).is_empty());
    }

    #[test]
    fn test_device_failure_during_apply_is_partial() {
        let (mut model, handle) = model(2);
        handle.fail_writes(&ControlId::new("AIn2 - Out1"));

        let snapshot = Snapshot::parse("AIn1 - Out1=5\nAIn2 - Out1=6\nAIn1 - Out2=7\n", &model).unwrap();
        let err = snapshot.apply(&mut model).unwrap_err();
        assert_eq!(err.applied(), &[ControlId::new("AIn1 - Out1")]);
        assert_eq!(model.get_route(RouteKey::analog(0, 0)).unwrap(), 5);
        assert_eq!(model.get_route(RouteKey::analog(1, 0)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("studio.ftu");

        let (mut model, _) = model(2);
        model.set_route(RouteKey::digital(1, 0), 12).unwrap();
        model.link(1, 0).unwrap();
        ConfigStore::save_to_file(&model, &path).await.unwrap();
        assert!(path.exists());

        model.set_route(RouteKey::digital(1, 0), 99).unwrap();
        model.unlink(1, 0);

        let written = ConfigStore::load_from_file(&mut model, &path).await.unwrap();
        assert_eq!(written.len(), model.registry().len());
        assert_eq!(model.get_route(RouteKey::digital(1, 0)).unwrap(), 12);
        assert!(model.links().is_linked(1, 0));
        assert!(ConfigStore::diff_file(&model, &path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let (mut model, _) = model(1);
        let err = ConfigStore::load_from_file(&mut model, temp_dir.path().join("absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[tokio::test]
    async fn test_load_parse_error_leaves_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.ftu");
        std::fs::write(&path, "AIn1 - Out1=10\n@link 1 1\n").unwrap();

        let (mut model, handle) = model(2);
        let err = ConfigStore::load_from_file(&mut model, &path).await.unwrap_err();
        match err {
            ConfigError::Parse(e) => assert_eq!(e.line, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(handle.writes().is_empty());
    }

    #[tokio::test]
    async fn test_watcher_reports_only_the_watched_file() {
        use std::time::Duration;
        use tokio::sync::broadcast::error::TryRecvError;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watched.ftu");
        tokio::fs::write(&path, "AIn1 - Out1=0\n").await.unwrap();

        let watcher = ConfigWatcher::new(path.clone()).unwrap();
        let mut rx = watcher.subscribe();

        tokio::fs::write(temp_dir.path().join("other.ftu"), "AIn1 - Out1=5\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        tokio::fs::write(&path, "AIn1 - Out1=9\n").await.unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change event for the watched file")
            .unwrap();
        assert_eq!(changed, path);
    }
}
