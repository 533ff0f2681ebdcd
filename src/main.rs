use clap::{Parser, Subcommand};
use devicemgrd::{config, daemon, panic_handler, Config};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "devicemgrd")]
#[command(author, version, about = "Expose configurable input devices on D-Bus", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the foreground
    Start,

    /// Stop the running daemon
    Stop,

    /// Check daemon status
    Status,

    /// Inspect configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },

    /// Print every object path the configured devices would expose
    Paths,
}

fn init_logging(verbose: bool, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("devicemgrd=debug")
        } else {
            EnvFilter::new(format!("devicemgrd={}", level))
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the config and start logging at its level.
fn load_config(verbose: bool, path: Option<&Path>) -> anyhow::Result<Config> {
    let config = Config::load_or_default(path)?;
    init_logging(verbose, &config.logging.level);
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic_handler::install();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start => {
            let config = load_config(cli.verbose, config_path)?;
            info!("Starting devicemgrd...");
            daemon::run(config).await?;
        }

        // Needs no config, so a broken file cannot keep the daemon alive.
        Commands::Stop => {
            init_logging(cli.verbose, "info");
            info!("Stopping devicemgrd...");
            daemon::stop().await?;
        }

        Commands::Status => {
            let config = load_config(cli.verbose, config_path)?;
            daemon::status(&config).await?;
        }

        Commands::Config { show } => {
            load_config(cli.verbose, config_path)?;
            if show {
                config::show(config_path)?;
            } else {
                println!("Nothing to do; pass --show to print the configuration");
            }
        }

        Commands::Paths => {
            let config = load_config(cli.verbose, config_path)?;
            for path in daemon::dry_run(&config).await? {
                println!("{}", path.as_str());
            }
        }
    }

    Ok(())
}
