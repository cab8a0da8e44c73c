//! ftumix command-line application

mod console;

use anyhow::{bail, Context};
use clap::Parser;
use ftumix_core::domain::{
    run_startup, ChangeQueue, ConfigWatcher, ControlRegistry, MixerBackend, RoutingModel, Settings, SimulatedCard,
    StartupError, StartupOptions,
};
use ftumix_infra::alsa::{find_card, read_cards, AmixerBackend, EventMonitor, CARDS_PATH};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ftumix")]
#[command(about = "A little mixer for the M-Audio Fast Track Ultra audio interfaces", long_about = None)]
struct Cli {
    /// Card index of the interface to control (default: first card named in the settings)
    #[arg(short = 'c', long = "card")]
    card: Option<u32>,

    /// Snapshot file to load on startup
    #[arg(short = 'l', long = "load-config")]
    load_config: Option<PathBuf>,

    /// Do not start the console; exit after startup
    #[arg(short = 'X', long = "no-gui")]
    no_gui: bool,

    /// Do not disable all effects on startup
    #[arg(short = 'F', long = "dont-disable-fx")]
    dont_disable_fx: bool,

    /// Do not mute the digital routes between differently numbered channels on startup
    #[arg(short = 'M', long = "dont-mute-most-digital-outputs")]
    dont_mute_most_digital_outputs: bool,

    /// Mute all hardware routes of the analog inputs
    #[arg(short = 'm', long = "mute-hardware-routes")]
    mute_hardware_routes: bool,

    /// Route every analog input to the output with the same number
    #[arg(short = 'p', long = "pass-through-inputs")]
    pass_through_inputs: bool,

    /// Save a snapshot file once startup is done
    #[arg(short = 's', long = "save-config")]
    save_config: Option<PathBuf>,

    /// Use a simulated card with this many channels instead of the hardware
    #[arg(long, value_name = "CHANNELS", value_parser = clap::value_parser!(u8).range(1..=16))]
    simulate: Option<u8>,

    /// Reload the snapshot file whenever it changes on disk
    #[arg(long)]
    watch: bool,

    /// Settings file (default: ~/.config/ftumix/settings.toml)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn startup_options(&self, settings: &Settings) -> StartupOptions {
        let defaults = StartupOptions::from_settings(settings);
        StartupOptions {
            load_config: self.load_config.clone().or(defaults.load_config),
            disable_effects: defaults.disable_effects && !self.dont_disable_fx,
            mute_unmanaged_digital_routes: defaults.mute_unmanaged_digital_routes
                && !self.dont_mute_most_digital_outputs,
            mute_hardware_routes: self.mute_hardware_routes,
            pass_through_inputs: self.pass_through_inputs,
            save_config: self.save_config.clone(),
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn locate_card(cli: &Cli, settings: &Settings) -> anyhow::Result<u32> {
    if let Some(card) = cli.card {
        return Ok(card);
    }
    let cards = read_cards(Path::new(CARDS_PATH)).with_context(|| format!("reading {}", CARDS_PATH))?;
    match find_card(&cards, &settings.card_names) {
        Some(card) => {
            info!(card = card.index, id = %card.id, "Using card");
            Ok(card.index)
        }
        None => bail!(
            "no card named {} found, use --card to pick one",
            settings.card_names.join(" or ")
        ),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = match &cli.settings {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let settings = Settings::load_or_default(&settings_path).await;

    let card = match cli.simulate {
        Some(_) => None,
        None => Some(locate_card(&cli, &settings)?),
    };
    let backend: Box<dyn MixerBackend> = match (card, cli.simulate) {
        (Some(card), _) => Box::new(AmixerBackend::new(card)),
        (None, channels) => {
            let channels = usize::from(channels.unwrap_or(8));
            info!(channels, "Using simulated card");
            Box::new(SimulatedCard::fast_track_ultra(channels))
        }
    };

    let registry = ControlRegistry::discover(backend).map_err(StartupError::Discovery)?;
    let mut model = RoutingModel::new(registry);
    info!(
        outputs = model.output_count(),
        routes = model.routes().len(),
        "Mixer ready"
    );

    let options = cli.startup_options(&settings);
    run_startup(&mut model, &options).await?;

    if cli.no_gui {
        return Ok(());
    }

    let changes = ChangeQueue::new();
    let _monitor = match card {
        Some(card) => Some(EventMonitor::spawn(card, changes.sender()).context("starting event monitor")?),
        None => None,
    };

    let watcher = match (&options.load_config, cli.watch) {
        (Some(path), true) => Some(ConfigWatcher::new(path.clone())?),
        (None, true) => bail!("--watch needs a snapshot file (--load-config)"),
        _ => None,
    };
    let reloads = watcher.as_ref().map(ConfigWatcher::subscribe);

    console::run(
        &mut model,
        &changes,
        Duration::from_millis(settings.refresh_interval_ms),
        reloads,
    )
    .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("ftumix starting");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e.downcast_ref::<StartupError>().map_or(1, StartupError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftumix_core::domain::ControlError;

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "ftumix", "-c", "2", "-l", "studio.ftu", "-X", "-F", "-m", "-p", "-s", "out.ftu",
        ]);
        assert_eq!(cli.card, Some(2));
        assert!(cli.no_gui);

        let options = cli.startup_options(&Settings::default());
        assert_eq!(options.load_config, Some(PathBuf::from("studio.ftu")));
        assert!(!options.disable_effects);
        assert!(options.mute_unmanaged_digital_routes);
        assert!(options.mute_hardware_routes);
        assert!(options.pass_through_inputs);
        assert_eq!(options.save_config, Some(PathBuf::from("out.ftu")));
    }

    #[test]
    fn test_settings_supply_defaults() {
        let mut settings = Settings::default();
        settings.default_snapshot = Some(PathBuf::from("default.ftu"));
        settings.startup.mute_unmanaged_digital_routes = false;

        let options = Cli::parse_from(["ftumix", "--simulate", "8"]).startup_options(&settings);
        assert_eq!(options.load_config, Some(PathBuf::from("default.ftu")));
        assert!(options.disable_effects);
        assert!(!options.mute_unmanaged_digital_routes);
    }

    #[test]
    fn test_simulate_range() {
        assert!(Cli::try_parse_from(["ftumix", "--simulate", "0"]).is_err());
        assert!(Cli::try_parse_from(["ftumix", "--dont-mute-most-digital-outputs", "-v"]).is_ok());
    }

    #[tokio::test]
    async fn test_startup_error_exit_code_survives_anyhow() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = dir.path().join("settings.toml");
        let snapshot = dir.path().join("broken.ftu");
        std::fs::write(&snapshot, "@link 1\n").unwrap();

        let args: Vec<std::ffi::OsString> = vec![
            "ftumix".into(),
            "--simulate".into(),
            "2".into(),
            "-X".into(),
            "--settings".into(),
            settings.into_os_string(),
            "-l".into(),
            snapshot.into_os_string(),
        ];
        let cli = Cli::parse_from(args);
        let err = run(cli).await.unwrap_err();
        assert_eq!(err.downcast_ref::<StartupError>().map(StartupError::exit_code), Some(2));
    }

    #[test]
    fn test_discovery_error_keeps_device_exit_code() {
        let err: anyhow::Error =
            StartupError::Discovery(ControlError::Enumeration("amixer: card 9 not found".to_string())).into();
        assert_eq!(err.downcast_ref::<StartupError>().map(StartupError::exit_code), Some(3));
    }
}
