//! Integration tests for the mixer stack
//!
//! These run the whole chain (registry, routing model, links, macros,
//! snapshot files and startup) against a simulated card.

use ftumix_core::domain::{
    run_startup, ChangeQueue, ConfigStore, ControlDescriptor, ControlId, ControlRegistry, ControlValue, LinkEdge,
    Macro, MacroEngine, MixerError, RouteKey, RoutingModel, SimulatedCard, SimulatedHandle, StartupOptions,
};
use ftumix_infra::alsa::amixer::{parse_scontrols, parse_sget, ControlShape};
use tempfile::TempDir;

fn ultra(channels: usize) -> (RoutingModel, SimulatedHandle) {
    let card = SimulatedCard::fast_track_ultra(channels);
    let handle = card.handle();
    let registry = ControlRegistry::discover(Box::new(card)).unwrap();
    (RoutingModel::new(registry), handle)
}

fn level(handle: &SimulatedHandle, name: &str) -> Option<ControlValue> {
    handle.value(&ControlId::new(name))
}

// ============================================================================
// ROUTING AND LINKS
// ============================================================================

#[test]
fn test_linked_output_follows_route_change() {
    let (mut model, handle) = ultra(8);
    model.link(0, 1).unwrap();

    model.set_route(RouteKey::analog(0, 2), 75).unwrap();

    assert_eq!(level(&handle, "AIn3 - Out1"), Some(ControlValue::Level(75)));
    assert_eq!(level(&handle, "AIn3 - Out2"), Some(ControlValue::Level(75)));
    assert_eq!(level(&handle, "AIn3 - Out3"), Some(ControlValue::Level(0)));
}

#[test]
fn test_cycle_writes_each_output_once() {
    let (mut model, handle) = ultra(4);
    model.link(0, 1).unwrap();
    model.link(1, 2).unwrap();
    model.link(2, 0).unwrap();
    handle.clear_writes();

    model.set_route(RouteKey::digital(1, 3), 10).unwrap();

    let written: Vec<String> = handle.writes().iter().map(|(id, _)| id.to_string()).collect();
    assert_eq!(written, vec!["DIn4 - Out2", "DIn4 - Out3", "DIn4 - Out1"]);
}

#[test]
fn test_master_volume_with_links() {
    let (mut model, _) = ultra(3);
    model.set_route(RouteKey::digital(0, 0), 20).unwrap();
    model.set_route(RouteKey::digital(1, 1), 40).unwrap();
    model.set_route(RouteKey::digital(2, 2), 60).unwrap();
    assert_eq!(model.master_average(), Some(40));

    model.link(0, 2).unwrap();
    model.set_master(50).unwrap();

    for c in 0..3 {
        assert_eq!(model.get_route(RouteKey::digital(c, c)).unwrap(), 50);
    }
    // DIn1 on Out1 propagated to DIn1 on Out3
    assert_eq!(model.get_route(RouteKey::digital(2, 0)).unwrap(), 50);
    assert_eq!(model.get_route(RouteKey::digital(1, 0)).unwrap(), 0);
}

#[test]
fn test_device_failure_midway_keeps_applied_writes() {
    let (mut model, handle) = ultra(3);
    model.link(0, 1).unwrap();
    model.link(0, 2).unwrap();
    handle.fail_writes(&ControlId::new("AIn2 - Out3"));

    let err = model.set_route(RouteKey::analog(0, 1), 66).unwrap_err();
    assert!(err.is_device());
    assert_eq!(
        err.applied(),
        &[ControlId::new("AIn2 - Out1"), ControlId::new("AIn2 - Out2")]
    );
    assert_eq!(level(&handle, "AIn2 - Out2"), Some(ControlValue::Level(66)));

    handle.heal();
    model.set_route(RouteKey::analog(0, 1), 66).unwrap();
    assert_eq!(level(&handle, "AIn2 - Out3"), Some(ControlValue::Level(66)));
}

// ============================================================================
// MACROS
// ============================================================================

#[test]
fn test_every_macro_is_idempotent() {
    for m in Macro::ALL {
        let (mut model, handle) = ultra(4);
        model.link(1, 3).unwrap();
        model.set_route(RouteKey::analog(1, 2), 33).unwrap();

        MacroEngine::run(&mut model, m).unwrap();
        let once: Vec<_> = model.registry().controls().iter().map(|c| c.value()).collect();
        handle.clear_writes();
        MacroEngine::run(&mut model, m).unwrap();
        let twice: Vec<_> = model.registry().controls().iter().map(|c| c.value()).collect();

        assert_eq!(once, twice, "{} changed state on second run", m);
    }
}

// ============================================================================
// SNAPSHOT FILES
// ============================================================================

#[tokio::test]
async fn test_save_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("studio.ftu");

    let (mut model, _) = ultra(8);
    model.link(0, 1).unwrap();
    model.link(3, 2).unwrap();
    model.set_route(RouteKey::analog(0, 4), 81).unwrap();
    MacroEngine::run(&mut model, Macro::DisableEffects).unwrap();
    ConfigStore::save_to_file(&model, &path).await.unwrap();
    let saved: Vec<_> = model.registry().controls().iter().map(|c| c.value()).collect();

    let (mut fresh, _) = ultra(8);
    fresh.link(5, 6).unwrap();
    ConfigStore::load_from_file(&mut fresh, &path).await.unwrap();

    let loaded: Vec<_> = fresh.registry().controls().iter().map(|c| c.value()).collect();
    assert_eq!(loaded, saved);
    assert_eq!(fresh.links().edges(), &[LinkEdge::new(0, 1), LinkEdge::new(3, 2)]);
    assert_eq!(fresh.get_route(RouteKey::analog(1, 4)).unwrap(), 81);
}

#[tokio::test]
async fn test_partial_snapshot_and_total_links() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("partial.ftu");
    std::fs::write(&path, "# only one route\nAIn2 - Out2=40\n").unwrap();

    let (mut model, handle) = ultra(2);
    model.set_route(RouteKey::analog(0, 0), 12).unwrap();
    model.link(0, 1).unwrap();
    handle.clear_writes();

    ConfigStore::load_from_file(&mut model, &path).await.unwrap();

    assert_eq!(handle.writes(), vec![(ControlId::new("AIn2 - Out2"), ControlValue::Level(40))]);
    assert_eq!(model.get_route(RouteKey::analog(0, 0)).unwrap(), 12);
    assert!(model.links().is_empty());
}

#[tokio::test]
async fn test_malformed_snapshot_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.ftu");
    std::fs::write(&path, "AIn1 - Out1=10\n@link 1 2\nDIn1 - Out1=\n").unwrap();

    let (mut model, handle) = ultra(2);
    model.link(1, 0).unwrap();

    assert!(ConfigStore::load_from_file(&mut model, &path).await.is_err());
    assert!(handle.writes().is_empty());
    assert_eq!(model.links().edges(), &[LinkEdge::new(1, 0)]);
}

// ============================================================================
// STARTUP
// ============================================================================

#[tokio::test]
async fn test_startup_sequence() {
    let temp_dir = TempDir::new().unwrap();
    let load = temp_dir.path().join("in.ftu");
    let save = temp_dir.path().join("out.ftu");
    std::fs::write(&load, "AIn1 - Out1=50\nAIn1 - Out2=50\n@link 1 2\n").unwrap();

    let (mut model, _) = ultra(2);
    let options = StartupOptions {
        load_config: Some(load),
        mute_hardware_routes: true,
        pass_through_inputs: true,
        save_config: Some(save.clone()),
        ..StartupOptions::default()
    };
    let report = run_startup(&mut model, &options).await.unwrap();
    assert_eq!(report.macros.len(), 4);

    // mute then pass-through; the link copies AIn1 - Out1 onto Out2
    assert_eq!(model.get_route(RouteKey::analog(0, 0)).unwrap(), 100);
    assert_eq!(model.get_route(RouteKey::analog(1, 0)).unwrap(), 100);
    assert_eq!(model.get_route(RouteKey::analog(0, 1)).unwrap(), 0);

    let saved = std::fs::read_to_string(save).unwrap();
    assert!(saved.contains("AIn1 - Out2=100"));
    assert!(saved.contains("@link 1 2"));
}

#[tokio::test]
async fn test_startup_device_failure_exit_code() {
    let (mut model, handle) = ultra(2);
    handle.fail_writes(&ControlId::new("DIn2 - Out1"));

    let err = run_startup(&mut model, &StartupOptions::default()).await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

// ============================================================================
// DEVICE NOTIFICATIONS
// ============================================================================

#[test]
fn test_external_changes_refresh_cache() {
    let (mut model, handle) = ultra(2);
    let queue = ChangeQueue::new();
    let tx = queue.sender();

    handle.poke(&ControlId::new("DIn2 - Out2"), ControlValue::Level(30));
    for _ in 0..3 {
        tx.send(ControlId::new("DIn2 - Out2")).unwrap();
    }
    tx.send(ControlId::new("Effect Switch")).unwrap();

    let batch = queue.drain();
    assert_eq!(batch.len(), 2);
    assert_eq!(model.refresh(&batch), vec![RouteKey::digital(1, 1)]);
    assert_eq!(model.master_average(), Some(65));
}

// ============================================================================
// AMIXER-SHAPED CARD
// ============================================================================

#[test]
fn test_amixer_listing_drives_routing_model() {
    let listing = "\
Simple mixer control 'AIn1 - Out1',0
Simple mixer control 'DIn1 - Out1',0
Simple mixer control 'Effect Switch',0
";
    let sget = |name: &str| match name {
        "Effect Switch" => "  Capabilities: pswitch\n  Mono: Playback [on]\n".to_string(),
        _ => "  Capabilities: volume\n  Limits: 0 - 100\n  Mono: 100 [100%]\n".to_string(),
    };

    let controls: Vec<(ControlDescriptor, ControlValue)> = parse_scontrols(listing)
        .into_iter()
        .map(|name| match parse_sget(&name, &sget(&name)).unwrap() {
            ControlShape::Volume { min, max, value } => (ControlDescriptor::volume(name, min, max), ControlValue::Level(value)),
            ControlShape::Switch(on) => (ControlDescriptor::switch(name), ControlValue::Switch(on)),
            ControlShape::Unsupported => panic!("unexpected enum control"),
        })
        .collect();

    let registry = ControlRegistry::discover(Box::new(SimulatedCard::new(controls))).unwrap();
    let mut model = RoutingModel::new(registry);
    assert_eq!(model.output_count(), 1);
    assert_eq!(model.effects(), &[ControlId::new("Effect Switch")]);

    MacroEngine::run(&mut model, Macro::MuteHardwareRoutes).unwrap();
    assert_eq!(model.get_route(RouteKey::analog(0, 0)).unwrap(), 0);
    assert!(matches!(
        model.set_route(RouteKey::analog(1, 0), 5),
        Err(MixerError::UnknownRoute(_))
    ));
}
