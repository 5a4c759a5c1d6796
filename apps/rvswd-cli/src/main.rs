use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rvswd_core::{FirmwareImage, ProgrammerSession, SessionConfig, SimulatedTarget};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "CH32V20x RVSWD flash programmer", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Session configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a raw binary image to code flash and relaunch the target
    Program {
        /// Firmware image (defaults to image_path from the config)
        image: Option<PathBuf>,
    },
    /// Halt the target and print its decoded option bytes
    OptionBytes,
    /// Write a default configuration file
    InitConfig {
        /// Destination path
        file: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Program { image } => {
            let path = match image.or_else(|| config.image_path.as_ref().map(PathBuf::from)) {
                Some(path) => path,
                None => bail!("No firmware image given and none configured"),
            };
            let firmware = FirmwareImage::from_file(&path)
                .with_context(|| format!("loading firmware {}", path.display()))?;

            info!(
                swdio = config.swdio_pin,
                swclk = config.swclk_pin,
                blocks = firmware.block_count(),
                "Using simulated RVSWD target"
            );
            let mut link = SimulatedTarget::new();
            let mut session = ProgrammerSession::new(config);
            session.program(&mut link, firmware.as_bytes(), &mut |msg: &str, pct: u8| {
                println!("{}: {}%", msg, pct)
            })?;
            info!("Successfully flashed the CH32V203 microcontroller");
        }
        Command::OptionBytes => {
            info!(
                swdio = config.swdio_pin,
                swclk = config.swclk_pin,
                "Using simulated RVSWD target"
            );
            let mut link = SimulatedTarget::new();
            let ob = ProgrammerSession::new(config).read_option_bytes(&mut link)?;
            print!("{}", ob);
        }
        Command::InitConfig { file } => {
            SessionConfig::default()
                .save_to_file(&file)
                .with_context(|| format!("writing config {}", file.display()))?;
            info!(path = %file.display(), "Wrote default configuration");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
