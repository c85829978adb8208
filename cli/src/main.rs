use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use font_core::{FontError, ScanScope};
use font_extractor::default_project_roots;
use font_resolver_engine::PipelineOrchestrator;
use font_setup::{get_config_path, load_config, save_config, FontFetchConfig, API_KEY_ENV};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod report;

#[derive(Parser)]
#[command(
    name = "fontfetch",
    about = "Find the fonts your title templates need and install the missing ones",
    version,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the platform default
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan project files and install every font they reference that is missing here.
    #[command(alias = "r")]
    Run {
        /// Files or directories to scan (default: the DaVinci Resolve template folders)
        #[arg(value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Which project file kinds to scan
        #[arg(short = 's', long = "scope", value_enum, default_value_t = ScopeArg::Both)]
        scope: ScopeArg,

        /// Resolve and validate, but write nothing
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Google Fonts API key
        #[arg(long = "api-key", env = API_KEY_ENV, hide_env_values = true)]
        api_key: Option<String>,

        /// Provider order for this run, e.g. `-S dafont -S google-fonts`
        #[arg(short = 'S', long = "source", value_name = "SOURCE")]
        sources: Vec<String>,

        /// Install here instead of the user font directory
        #[arg(long = "install-dir", value_name = "DIR")]
        install_dir: Option<PathBuf>,

        /// Check these directories for installed fonts instead of the system ones
        #[arg(long = "font-dir", value_name = "DIR")]
        font_dirs: Vec<PathBuf>,
    },

    /// Inspect or create the configuration file.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print where the configuration file lives
    Path,

    /// Write the default configuration (keeps an existing file unless --force)
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Containers,
    Settings,
    Both,
}

impl From<ScopeArg> for ScanScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Containers => ScanScope::ContainersOnly,
            ScopeArg::Settings => ScanScope::SettingsOnly,
            ScopeArg::Both => ScanScope::Both,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            paths,
            scope,
            dry_run,
            json,
            api_key,
            sources,
            install_dir,
            font_dirs,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if !sources.is_empty() {
                config.sources = sources;
            }
            if install_dir.is_some() {
                config.install_dir = install_dir;
            }
            if !font_dirs.is_empty() {
                config.font_dirs = font_dirs;
            }

            let setup = config.build(api_key, scope.into(), dry_run)?;
            let abort = setup.options.abort.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; finishing in-flight work");
                    abort.abort();
                }
            });

            let paths = if paths.is_empty() {
                let defaults = default_project_roots();
                if defaults.is_empty() {
                    bail!("no DaVinci Resolve template folders found; pass the paths to scan");
                }
                if !json {
                    for path in &defaults {
                        println!("{} {}", "📁 Scanning".cyan(), path.display());
                    }
                }
                defaults
            } else {
                paths
            };

            let pipeline = PipelineOrchestrator::new(setup.sources, setup.http, setup.options)?;
            debug!("installing into {}", pipeline.install_dir().display());

            let report = match pipeline.run(&paths).await {
                Ok(report) => report,
                Err(FontError::MissingCredential) => {
                    eprintln!("{}", "❌ No Google Fonts API key and no fallback source configured".red().bold());
                    eprintln!("   Set {} or pass --api-key, or add other sources to the config", API_KEY_ENV);
                    process::exit(2);
                }
                Err(e) => return Err(e.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report::print_report(&report, dry_run, cli.verbose);
            }

            if report.failures().next().is_some() || !report.file_errors.is_empty() || report.aborted {
                process::exit(1);
            }
        }

        Commands::Config(ConfigCommands::Show) => {
            let config = load_config(cli.config.as_deref())?;
            report::print_config(&config);
        }

        Commands::Config(ConfigCommands::Path) => {
            let path = match cli.config {
                Some(path) => path,
                None => get_config_path()?,
            };
            println!("{}", path.display());
        }

        Commands::Config(ConfigCommands::Init { force }) => {
            let path = match cli.config {
                Some(path) => path,
                None => get_config_path()?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let written = save_config(&FontFetchConfig::default(), Some(&path))
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{} {}", "✅ Configuration written to".green(), written.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
