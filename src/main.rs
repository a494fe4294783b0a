//! # drum_stage
//!
//! Command-line front end of the drum stage. Every invocation is a fresh
//! session: the stage is homed before any other command runs.
//!
//! # Usage
//!
//! ```bash
//! # Home only
//! drum_stage --config config/drum.toml home
//!
//! # Absolute move, radius 500 steps, angle 90 degrees
//! drum_stage move 500 90
//!
//! # Try it without hardware
//! drum_stage --dummy cart 100 -50
//!
//! # Verbose logging
//! RUST_LOG=debug drum_stage --port /dev/ttyACM0 status
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drum_stage::adapters::{Channel, DummyDrum};
use drum_stage::{logging, Position, SafeMotionController, StageConfig};
use std::path::PathBuf;
use tracing::info;

/// Safe motion control of the two-axis drum stage
#[derive(Parser, Debug)]
#[command(name = "drum_stage")]
#[command(version)]
#[command(about = "Home and position the drum stage over its serial link")]
struct Args {
    /// Configuration file (TOML); DRUM_* environment variables override it
    #[arg(short, long, default_value = drum_stage::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated device instead of a serial port
    #[arg(long)]
    dummy: bool,

    /// Serial port, overriding the configured port and candidates
    #[arg(short, long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration and exit
    PrintConfig,
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that connect to and home the stage first.
#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Home both axes and report the origin
    Home,
    /// Move to an absolute (radius, angle)
    Move {
        radius: f64,
        #[arg(allow_negative_numbers = true)]
        angle: f64,
    },
    /// Move by a relative (radius, angle) offset
    MoveRel {
        #[arg(allow_negative_numbers = true)]
        delta_radius: f64,
        #[arg(allow_negative_numbers = true)]
        delta_angle: f64,
    },
    /// Move to cartesian (x, y) in radius units
    Cart {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
    },
    /// Print the device status line
    Status,
    /// Validate a position without moving
    Check {
        radius: f64,
        #[arg(allow_negative_numbers = true)]
        angle: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = StageConfig::load_from(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    logging::init_from_config(&config);

    let command = match args.command {
        Command::PrintConfig => {
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }
        Command::Session(command) => command,
    };

    let channel = open_channel(args.dummy, args.port.as_deref(), &config)?;
    let stage = SafeMotionController::new(channel, config)?;
    stage
        .initialize()
        .await
        .context("Homing failed; check the stage before retrying")?;

    match command {
        SessionCommand::Home => {
            info!("Stage homed");
            println!("Homed at {}", stage.current_position().unwrap_or_default());
        }
        SessionCommand::Move { radius, angle } => {
            let reached = stage.move_abs(radius, angle).await?;
            println!("At {}", reached);
        }
        SessionCommand::MoveRel {
            delta_radius,
            delta_angle,
        } => {
            let reached = stage.move_rel(delta_radius, delta_angle).await?;
            println!("At {}", reached);
        }
        SessionCommand::Cart { x, y } => {
            let reached = stage.cart_move_abs(x, y).await?;
            println!("At {}", reached);
        }
        SessionCommand::Status => {
            println!("{}", stage.status().await?);
        }
        SessionCommand::Check { radius, angle } => {
            let position = Position::new(radius, angle);
            match stage.validate(position) {
                Ok(steps) => println!("{} is safe: {}", position, steps),
                Err(e) => println!("{} rejected: {}", position, e),
            }
        }
    }

    Ok(())
}

fn open_channel(
    dummy: bool,
    port: Option<&str>,
    config: &StageConfig,
) -> Result<Box<dyn Channel>> {
    if dummy {
        info!("Using simulated drum");
        return Ok(Box::new(DummyDrum::new()));
    }
    open_serial(port, config)
}

#[cfg(feature = "serial")]
fn open_serial(port: Option<&str>, config: &StageConfig) -> Result<Box<dyn Channel>> {
    use drum_stage::adapters::SerialChannel;

    let baud = config.serial.baud_rate;
    let channel = match port.or(config.serial.port.as_deref()) {
        Some(port) => SerialChannel::open(port, baud)?,
        None => SerialChannel::discover(config.serial.candidates.as_slice(), baud)
            .context("No drum device found on any candidate port")?,
    };
    info!(port = channel.port_name(), "Got device");
    Ok(Box::new(channel))
}

#[cfg(not(feature = "serial"))]
fn open_serial(_port: Option<&str>, _config: &StageConfig) -> Result<Box<dyn Channel>> {
    anyhow::bail!("built without the `serial` feature; use --dummy")
}
