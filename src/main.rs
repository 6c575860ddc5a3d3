//! CLI entry point for enderscope.
//!
//! One command per invocation against the configured stage, or against the
//! simulated firmware with `--simulate`.
//!
//! # Usage
//!
//! ```bash
//! enderscope --simulate position
//! enderscope goto 10 20 1.5
//! enderscope jog --direction north
//! enderscope acquire --plan plan.toml --prefix run/sample
//! enderscope zstack --slices 50 --step 0.001 --prefix stack/sample
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use enderscope::hardware::check_peripherals;
use enderscope::{tracing_init, Hardware, Settings};
use scope_core::{parse_position_input, Illuminator, Rgb, Stage};
use scope_driver_marlin::JogDirection;
use scope_experiment::{start_preview, AcquisitionPlan, ZStackSettings};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "enderscope")]
#[command(about = "Motorized microscope control on 3D-printer hardware", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/enderscope.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Drive the simulated firmware instead of the serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the device-reported stage position
    Position,

    /// Home all axes
    Home,

    /// Move to an absolute position
    Goto {
        /// X in millimeters
        x: String,
        /// Y in millimeters
        y: String,
        /// Z in millimeters
        z: String,
    },

    /// Relative move, either by explicit deltas or one configured step
    Jog {
        /// Step once in this direction using the configured jog size
        #[arg(long, value_enum, conflicts_with_all = ["dx", "dy", "dz"])]
        direction: Option<Direction>,
        /// X delta in millimeters
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        dx: f64,
        /// Y delta in millimeters
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        dy: f64,
        /// Z delta in millimeters
        #[arg(long, allow_negative_numbers = true)]
        dz: Option<f64>,
    },

    /// Autofocus at the current position
    Autofocus,

    /// Run an acquisition plan
    Acquire {
        /// Plan file (TOML)
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Output directory and base name
        #[arg(long)]
        prefix: String,
    },

    /// Capture a z-stack around the current plane
    Zstack {
        /// Number of slices
        #[arg(long, default_value_t = 50)]
        slices: u32,
        /// Distance between slices in millimeters
        #[arg(long, default_value_t = 0.001)]
        step: f64,
        /// Output directory and base name
        #[arg(long)]
        prefix: String,
    },

    /// Capture one frame to a file (.tif, .png or .jpg)
    Snapshot {
        /// Output path
        path: PathBuf,
    },

    /// Control an illumination zone
    Light {
        /// Zone name: brightfield or fluorescence
        zone: String,
        #[command(subcommand)]
        action: LightAction,
    },

    /// Stream the live preview to a JPEG file until Ctrl-C
    Preview {
        /// File rewritten with every new frame
        #[arg(long, default_value = "preview.jpg")]
        output: PathBuf,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Heat the bed and wait until it holds the target
    BedTemp {
        /// Target temperature in degrees Celsius
        celsius: i32,
    },
}

impl Commands {
    /// Name of a command that drives the camera or the lights.
    fn peripheral_command(&self) -> Option<&'static str> {
        match self {
            Commands::Autofocus => Some("autofocus"),
            Commands::Acquire { .. } => Some("acquire"),
            Commands::Zstack { .. } => Some("zstack"),
            Commands::Snapshot { .. } => Some("snapshot"),
            Commands::Light { .. } => Some("light"),
            Commands::Preview { .. } => Some("preview"),
            Commands::Position
            | Commands::Home
            | Commands::Goto { .. }
            | Commands::Jog { .. }
            | Commands::BedTemp { .. } => None,
        }
    }
}

#[derive(Subcommand)]
enum LightAction {
    /// Switch on
    On,
    /// Switch off
    Off,
    /// Set intensity in [0, 1]
    Intensity {
        /// New intensity
        value: f64,
    },
    /// Set the base color
    Color {
        /// Red
        r: u8,
        /// Green
        g: u8,
        /// Blue
        b: u8,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl From<Direction> for JogDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::North => JogDirection::North,
            Direction::South => JogDirection::South,
            Direction::East => JogDirection::East,
            Direction::West => JogDirection::West,
            Direction::Up => JogDirection::Up,
            Direction::Down => JogDirection::Down,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(cli.config.as_deref())?;
    tracing_init::init_from_settings(&settings)?;
    if let Some(command) = cli.command.peripheral_command() {
        check_peripherals(command, cli.simulate)?;
    }

    let hw = Hardware::connect(&settings, cli.simulate).await?;

    match cli.command {
        Commands::Position => {
            let here = hw.stage.reconcile().await?;
            println!("X:{:.3} Y:{:.3} Z:{:.3}", here.x, here.y, here.z);
        }
        Commands::Home => {
            hw.stage.home().await?;
            info!("Homed");
        }
        Commands::Goto { x, y, z } => {
            let target = parse_position_input(&x, &y, &z)?;
            hw.stage.move_to(target).await?;
            info!(x = target.x, y = target.y, z = target.z, "Moved");
        }
        Commands::Jog {
            direction,
            dx,
            dy,
            dz,
        } => match direction {
            Some(direction) => {
                let direction = JogDirection::from(direction);
                let step = if direction.is_vertical() {
                    settings.stage.z_step_mm
                } else {
                    settings.stage.xy_step_mm
                };
                hw.stage.jog(direction, step).await?;
            }
            None => hw.stage.move_relative(dx, dy, dz).await?,
        },
        Commands::Autofocus => {
            let result = hw.engine.autofocus_here().await?;
            println!(
                "Best focus at Z:{:.3} (score {:.3}, {} up / {} down fine steps)",
                result.best.position.z,
                result.best.score,
                result.fine_up_steps,
                result.fine_down_steps
            );
        }
        Commands::Acquire { plan, prefix } => {
            let plan = match plan {
                Some(path) => load_plan(&path)?,
                None => AcquisitionPlan::default(),
            };
            let run = hw.engine.run(&plan, &prefix);
            tokio::pin!(run);
            let report = tokio::select! {
                report = &mut run => report?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, stopping after the current cell");
                    hw.engine.abort()?;
                    run.await?
                }
            };
            println!(
                "Run {} wrote {} images over {} cells",
                report.run_uid,
                report.images.len(),
                report.visits.len()
            );
        }
        Commands::Zstack {
            slices,
            step,
            prefix,
        } => {
            let settings = ZStackSettings {
                slice_count: slices,
                step_mm: step,
            };
            let report = hw.engine.run_zstack(&settings, &prefix).await?;
            println!("Wrote {} slices", report.images.len());
        }
        Commands::Snapshot { path } => {
            let written = hw.engine.snapshot(&path).await?;
            println!("{}", written.display());
        }
        Commands::Light { zone, action } => {
            let light = hw
                .zone(&zone)
                .with_context(|| format!("Unknown light zone '{zone}'"))?;
            match action {
                LightAction::On => light.set_on(true)?,
                LightAction::Off => light.set_on(false)?,
                LightAction::Intensity { value } => light.set_intensity(value)?,
                LightAction::Color { r, g, b } => light.set_rgb_color(Rgb::new(r, g, b))?,
            }
            info!(zone = light.name(), on = light.is_on(), "Light updated");
        }
        Commands::Preview { output, seconds } => {
            let preview = start_preview(&hw.engine.microscope().arbiter, settings.preview.clone())?;
            let mut frames = preview.subscribe();
            let deadline = async {
                match seconds {
                    Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    changed = frames.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let latest = frames.borrow_and_update().clone();
                        if let Some(frame) = latest {
                            tokio::fs::write(&output, &frame.jpeg)
                                .await
                                .with_context(|| format!("Failed to write {}", output.display()))?;
                        }
                    }
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            let published = preview.stop().await?;
            println!("{published} preview frames, latest in {}", output.display());
        }
        Commands::BedTemp { celsius } => {
            hw.stage.wait_for_bed_temperature(celsius).await?;
            info!(celsius, "Bed at temperature");
        }
    }
    Ok(())
}

fn load_plan(path: &Path) -> Result<AcquisitionPlan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let plan: AcquisitionPlan =
        toml::from_str(&text).with_context(|| format!("Invalid plan {}", path.display()))?;
    plan.validate()?;
    Ok(plan)
}
