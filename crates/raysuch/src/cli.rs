use std::path::PathBuf;

use clap::{Parser, Subcommand};
use settings::{parse_extent, Extent, LookToggleSetting};

#[derive(Parser, Debug)]
#[command(
    name = "raysuch",
    author,
    version,
    about = "Fly a first-person camera through a GPU compute ray tracer"
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Settings file; defaults to `raysuch.toml` in the config directory when present.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Override the window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_nonzero_extent)]
    pub size: Option<Extent>,

    /// Override the compute workgroup tile (e.g. `8x8`).
    #[arg(long, value_name = "XxY", value_parser = parse_nonzero_extent)]
    pub tile: Option<Extent>,

    /// How the toggle-look key behaves: `edge` (once per press) or `level` (every frame held).
    #[arg(long, value_name = "MODE", value_parser = parse_look_toggle)]
    pub look_toggle: Option<LookToggleSetting>,

    /// Directory holding `compute/raytrace.comp`, `present/quad.vert` and `present/quad.frag`.
    #[arg(long, value_name = "DIR")]
    pub shader_dir: Option<PathBuf>,

    /// Present without waiting for vertical blank.
    #[arg(long)]
    pub no_vsync: bool,

    /// Save the first presented frame to this PNG file.
    #[arg(long, value_name = "PNG")]
    pub capture: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect configuration.
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the settings and print them, fully resolved, as TOML.
    Check,
    /// Print the directory searched for `raysuch.toml`.
    Where,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_nonzero_extent(value: &str) -> Result<Extent, String> {
    let extent = parse_extent(value)?;
    if extent.width == 0 || extent.height == 0 {
        return Err(format!("'{value}' must have non-zero dimensions"));
    }
    Ok(extent)
}

pub fn parse_look_toggle(value: &str) -> Result<LookToggleSetting, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "edge" | "press" => Ok(LookToggleSetting::Edge),
        "level" | "held" => Ok(LookToggleSetting::Level),
        other => Err(format!("unknown look toggle mode '{other}'; use edge or level")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extents_accept_either_separator() {
        assert_eq!(
            parse_nonzero_extent("1280x720").unwrap(),
            Extent {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(parse_nonzero_extent("8X4").unwrap(), Extent { width: 8, height: 4 });
    }

    #[test]
    fn zero_extent_is_rejected() {
        assert!(parse_nonzero_extent("0x720").is_err());
        assert!(parse_nonzero_extent("16").is_err());
    }

    #[test]
    fn look_toggle_modes_parse() {
        assert_eq!(parse_look_toggle("Edge").unwrap(), LookToggleSetting::Edge);
        assert_eq!(parse_look_toggle("level").unwrap(), LookToggleSetting::Level);
        assert!(parse_look_toggle("sometimes").is_err());
    }

    #[test]
    fn run_flags_and_config_subcommand_parse() {
        let cli = Cli::try_parse_from([
            "raysuch",
            "--size",
            "800x600",
            "--tile",
            "8x8",
            "--no-vsync",
            "--capture",
            "out.png",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.no_vsync);
        assert_eq!(cli.run.size.map(|s| (s.width, s.height)), Some((800, 600)));
        assert_eq!(cli.run.capture, Some(PathBuf::from("out.png")));

        let cli = Cli::try_parse_from(["raysuch", "config", "check", "--config", "a.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand {
                action: ConfigAction::Check
            }))
        ));
        assert_eq!(cli.run.config, Some(PathBuf::from("a.toml")));
    }
}
