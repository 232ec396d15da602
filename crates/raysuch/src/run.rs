use anyhow::{Context, Result};
use renderer::Renderer;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, ConfigAction, RunArgs};
use crate::config::{apply_overrides, load_settings, renderer_config, SettingsOrigin};
use crate::paths::AppPaths;

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    tracing::debug!(config = %paths.config_dir().display(), "resolved raysuch paths");

    match cli.command {
        Some(Command::Config(config)) => match config.action {
            ConfigAction::Check => check_config(&cli.run, &paths),
            ConfigAction::Where => {
                println!("{}", paths.config_dir().display());
                Ok(())
            }
        },
        None => run_renderer(cli.run, &paths),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn check_config(args: &RunArgs, paths: &AppPaths) -> Result<()> {
    let (mut settings, origin) = load_settings(args.config.as_deref(), paths)?;
    apply_overrides(&mut settings, args)?;
    renderer_config(&settings, None)?;
    match &origin {
        SettingsOrigin::File(path) => tracing::info!(path = %path.display(), "configuration is valid"),
        SettingsOrigin::Defaults => tracing::info!("no configuration file found; using defaults"),
    }
    let rendered = settings
        .to_toml_string()
        .context("failed to render resolved settings")?;
    print!("{rendered}");
    Ok(())
}

fn run_renderer(args: RunArgs, paths: &AppPaths) -> Result<()> {
    let (mut settings, origin) = load_settings(args.config.as_deref(), paths)?;
    apply_overrides(&mut settings, &args)?;
    let config = renderer_config(&settings, args.capture.clone())?;
    tracing::info!(
        origin = ?origin,
        size = %format!("{}x{}", config.surface_size.0, config.surface_size.1),
        tile = %settings.render.tile,
        compute = %config.shaders.compute.display(),
        "starting renderer"
    );

    let mut renderer = Renderer::new(config);
    renderer.run()
}
