//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// slitred - long-slit spectrograph reduction
///
/// Reduces a list of science exposures across a detector mosaic, building
/// and reusing master calibration frames per instrument configuration.
#[derive(Parser, Debug)]
#[command(name = "slitred")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SLITRED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .slitred.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reduce the exposures listed in a manifest
    Run(RunArgs),

    /// Show the instrument configuration key of every exposure and detector
    Keys(KeysArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Exposure manifest (TOML, or JSON by extension)
    pub manifest: PathBuf,

    /// Reuse master frames computed for earlier exposures
    #[arg(long)]
    pub reuse_master: bool,

    /// Prepare the calibrations only; skip the science stages
    #[arg(long)]
    pub prep_only: bool,

    /// Fail a unit instead of falling back to a stale master frame
    #[arg(long)]
    pub no_stale_fallback: bool,

    /// Number of detectors in the mosaic (overrides mosaic.ndet)
    #[arg(long)]
    pub ndet: Option<usize>,

    /// Output directory for spectra and QA logs (overrides output.directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not write per-exposure QA logs
    #[arg(long)]
    pub no_qa: bool,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the keys command
#[derive(Parser, Debug)]
pub struct KeysArgs {
    /// Exposure manifest (TOML, or JSON by extension)
    pub manifest: PathBuf,

    /// Number of detectors in the mosaic (overrides mosaic.ndet)
    #[arg(long)]
    pub ndet: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format for listings and summaries
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Dot-separated key, e.g. reduce.reuse_master
        key: String,

        /// Value
        value: String,

        /// Write to the project-local .slitred.toml
        #[arg(long)]
        local: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run() {
        let cli = Cli::parse_from(["slitred", "run", "night1.toml"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.manifest, PathBuf::from("night1.toml"));
                assert!(!args.reuse_master);
                assert!(!args.prep_only);
                assert!(args.ndet.is_none());
                assert!(matches!(args.format, OutputFormat::Table));
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "slitred",
            "run",
            "night1.json",
            "--reuse-master",
            "--prep-only",
            "--ndet",
            "2",
            "-o",
            "out",
            "--format",
            "json",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.reuse_master);
                assert!(args.prep_only);
                assert_eq!(args.ndet, Some(2));
                assert_eq!(args.output, Some(PathBuf::from("out")));
                assert!(matches!(args.format, OutputFormat::Json));
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_keys() {
        let cli = Cli::parse_from(["slitred", "keys", "m.toml", "--format", "plain"]);
        match cli.command {
            Commands::Keys(args) => {
                assert_eq!(args.manifest, PathBuf::from("m.toml"));
                assert!(matches!(args.format, OutputFormat::Plain));
            }
            _ => panic!("expected Keys command"),
        }
    }

    #[test]
    fn cli_parses_config_set_local() {
        let cli = Cli::parse_from(["slitred", "config", "set", "reduce.prep_only", "true", "--local"]);
        match cli.command {
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Set { key, value, local }),
            }) => {
                assert_eq!(key, "reduce.prep_only");
                assert_eq!(value, "true");
                assert!(local);
            }
            _ => panic!("expected Config Set command"),
        }
    }

    #[test]
    fn cli_no_local_flag() {
        let cli = Cli::parse_from(["slitred", "--no-local", "config", "path"]);
        assert!(cli.no_local);
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["slitred", "config"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["slitred", "-v", "config"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["slitred", "-vv", "config"]);
        assert_eq!(cli.verbose, 2);
    }
}
