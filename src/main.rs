use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hrc_arm::calibration::{self, CalibrationModel};
use hrc_arm::daemon::build_actuator;
use hrc_arm::kinematics::{ArmGeometry, JointLimits, WorkspacePoint};
use hrc_arm::{Actuator, Config, Daemon, PixelPoint};

/// HRC - voice and OCR driven stylus arm
#[derive(Parser)]
#[command(name = "hrc", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/hrc/config.toml)
    #[arg(short, long, env = "HRC_CONFIG")]
    config: Option<PathBuf>,

    /// Calibration file
    #[arg(long, env = "HRC_CALIBRATION")]
    calibration: Option<PathBuf>,

    /// Use the simulated servo driver (no hardware)
    #[arg(long)]
    simulate: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fit a calibration from a CSV of `px,py,wx,wy` records and save it
    Calibrate {
        /// CSV file with one calibration point per line
        input: PathBuf,
        /// Shoulder to elbow length (m); reuses the existing file's when omitted
        #[arg(long)]
        l1: Option<f64>,
        /// Elbow to stylus tip length (m)
        #[arg(long)]
        l2: Option<f64>,
        /// Height of the screen plane relative to the shoulder (m)
        #[arg(long)]
        touch_height: Option<f64>,
        /// Region margin as a fraction of the calibrated box
        #[arg(long, default_value_t = calibration::DEFAULT_MARGIN)]
        margin: f64,
    },
    /// Map a pixel to workspace coordinates and joint angles
    Resolve {
        px: f64,
        py: f64,
    },
    /// Solve joint angles for a workspace point
    Solve {
        x: f64,
        y: f64,
        /// Height (m); defaults to the calibrated touch plane
        #[arg(long)]
        z: Option<f64>,
    },
    /// Interpret an utterance as a command
    Interpret {
        text: String,
    },
    /// Send the arm home
    Home,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hrc_arm=info",
        1 => "info,hrc_arm=debug",
        2 => "debug",
        _ => "trace",
    };

    // Status events may own stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(cli.config.as_deref(), cli.simulate)?;
    if let Some(path) = cli.calibration {
        config.calibration_path = path;
    }
    tracing::debug!(?config, "loaded configuration");

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Calibrate {
                input,
                l1,
                l2,
                touch_height,
                margin,
            } => cmd_calibrate(&config.calibration_path, &input, l1.zip(l2), touch_height, margin),
            Command::Resolve { px, py } => cmd_resolve(&config.calibration_path, px, py),
            Command::Solve { x, y, z } => cmd_solve(&config.calibration_path, x, y, z),
            Command::Interpret { text } => cmd_interpret(&config, &text),
            Command::Home => cmd_home(&config).await,
        };
    }

    tracing::info!(
        calibration = %config.calibration_path.display(),
        simulate = config.servo.simulate,
        "starting hrc arm"
    );

    // Run until interrupted
    Daemon::new(config).run().await?;

    Ok(())
}

fn cmd_calibrate(
    path: &Path,
    input: &Path,
    geometry: Option<(f64, f64)>,
    touch_height: Option<f64>,
    margin: f64,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(input)?;
    let pairs = calibration::parse_point_records(&content)?;

    let existing = CalibrationModel::load(path).ok();
    let (arm, limits, height) = match (&existing, geometry) {
        (_, Some((l1, l2))) => (
            ArmGeometry::new(l1, l2),
            existing.as_ref().map_or_else(JointLimits::default, CalibrationModel::limits),
            touch_height.or(existing.as_ref().map(CalibrationModel::touch_height)),
        ),
        (Some(model), None) => (
            model.geometry(),
            model.limits(),
            touch_height.or(Some(model.touch_height())),
        ),
        (None, None) => anyhow::bail!(
            "no existing calibration at {}; pass --l1 and --l2",
            path.display()
        ),
    };

    // A failed fit leaves the previous file untouched
    let model = CalibrationModel::with_margin(pairs, arm, limits, height.unwrap_or(0.0), margin)?;
    model.save(path)?;

    println!(
        "Calibrated {} points, RMS residual {:.4} mm",
        model.pairs().len(),
        model.fit_residual() * 1000.0
    );
    println!("Saved to {}", path.display());
    Ok(())
}

fn cmd_resolve(path: &Path, px: f64, py: f64) -> anyhow::Result<()> {
    let model = CalibrationModel::load(path)?;
    let point = model.resolve(PixelPoint::new(px, py))?;
    let angles = model.solver().solve(point)?;

    println!(
        "pixel ({px}, {py}) -> workspace ({:.4}, {:.4}, {:.4}) m",
        point.x, point.y, point.z
    );
    println!("joints {angles}");
    Ok(())
}

fn cmd_solve(path: &Path, x: f64, y: f64, z: Option<f64>) -> anyhow::Result<()> {
    let model = CalibrationModel::load(path)?;
    let solver = model.solver();
    let point = WorkspacePoint::new(x, y, z.unwrap_or_else(|| model.touch_height()));

    let angles = solver.solve(point)?;
    let check = solver.forward(&angles);

    println!("joints {angles}");
    println!(
        "forward check ({:.4}, {:.4}, {:.4}), error {:.2e} m",
        check.x,
        check.y,
        check.z,
        check.distance(&point)
    );
    Ok(())
}

fn cmd_interpret(config: &Config, text: &str) -> anyhow::Result<()> {
    let intent = config.voice.interpreter().interpret(text);
    println!("{}", serde_json::to_string_pretty(&intent)?);
    Ok(())
}

async fn cmd_home(config: &Config) -> anyhow::Result<()> {
    let mut actuator = build_actuator(config)?;
    let ack = actuator.home().await?;
    println!("Homed via {} in {:?}", actuator.name(), ack.elapsed);
    Ok(())
}
