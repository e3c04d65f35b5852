use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use anomaly_inspector::{
    read_image, write_image, AppConfig, CameraConfig, CameraProfile, InspectorApp, Inspection,
    PreprocessingStep, StepOp,
};

#[derive(Parser, Debug)]
#[command(name = "anomaly-inspector")]
#[command(about = "Visual anomaly inspection for fixed production-line cameras")]
#[command(version)]
#[command(long_about = "Compares live frames from fixed cameras against a standard image \
after a configurable preprocessing pipeline, classifies each frame as Normal or Anomaly \
by mean squared error, stores highlighted anomalies and signals verdicts to a Modbus TCP \
controller.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "inspector.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print an example configuration and exit
    #[arg(long, help = "Print an example configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't start components
    #[arg(long, help = "Perform dry run - initialize components but don't start them")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily rotated files in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Compare two image files once using the configured pipeline and exit
    #[arg(long, num_args = 2, value_names = ["STANDARD", "TARGET"])]
    compare: Option<Vec<PathBuf>>,

    /// Threshold for --compare; defaults to the first configured camera's
    #[arg(long, requires = "compare")]
    threshold: Option<f64>,

    /// Write the highlighted target of --compare to this path
    #[arg(long, value_name = "PATH", requires = "compare")]
    highlight_out: Option<PathBuf>,

    /// Save a camera's current frame as its standard image and exit
    #[arg(long, value_name = "CAMERA", conflicts_with = "compare")]
    capture_standard: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_example_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting anomaly inspector v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match AppConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(paths) = &args.compare {
        return run_compare(&args, &config, paths).await;
    }

    let mut app = InspectorApp::new(config, Some(PathBuf::from(&args.config)))
        .await
        .map_err(|e| {
            error!("Failed to create inspector: {}", e);
            e
        })?;

    app.initialize().await.map_err(|e| {
        error!("Failed to initialize inspector: {}", e);
        e
    })?;

    if let Some(camera) = args.capture_standard {
        let path = app.capture_standard(camera).await.map_err(|e| {
            error!("Failed to capture standard for camera {}: {}", camera, e);
            e
        })?;
        println!("✓ Camera {} standard image saved to {}", camera, path.display());
        return Ok(());
    }

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        println!(
            "✓ Dry run completed successfully - {} camera monitor(s) initialized",
            app.monitored_cameras().len()
        );
        return Ok(());
    }

    app.start().await.map_err(|e| {
        error!("Failed to start inspector: {}", e);
        e
    })?;

    let exit_code = app.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Inspector exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

/// One-shot comparison of two files
async fn run_compare(args: &Args, config: &AppConfig, paths: &[PathBuf]) -> Result<()> {
    let [standard_path, target_path] = paths else {
        anyhow::bail!("--compare takes exactly two paths");
    };

    let threshold = args
        .threshold
        .or_else(|| config.cameras.first().map(|c| c.threshold))
        .context("no --threshold given and no camera configured")?;

    let standard = read_image(standard_path)
        .await
        .with_context(|| format!("reading standard {}", standard_path.display()))?;
    let target = read_image(target_path)
        .await
        .with_context(|| format!("reading target {}", target_path.display()))?;

    let profile = CameraProfile::new(0, threshold)?;
    let inspection = Inspection::prepare(profile, config.pipeline()?, Some(&standard))?;
    let highlight = args
        .highlight_out
        .as_ref()
        .map(|_| config.monitor.highlight_threshold);
    let result = inspection.inspect(Some(&target), highlight)?;

    println!("score: {:.4}", result.score);
    println!("threshold: {}", threshold);
    println!("verdict: {}", result.verdict);

    if let (Some(path), Some(overlay)) = (&args.highlight_out, &result.overlay) {
        write_image(path, overlay, config.storage.jpeg_quality).await?;
        println!("highlight: {}", path.display());
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("anomaly_inspector={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "inspector.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print an example configuration in TOML format
fn print_example_config() -> Result<()> {
    let mut config = AppConfig::default();

    let mut camera = CameraConfig::new(0, 100.0);
    camera.description = Some("Station 1".to_string());
    camera.standard_image = Some("./standards/cam0.png".to_string());
    camera.source = Some("/run/inspector/cam0.jpg".to_string());
    camera.signal_register = Some(100);
    config.cameras.push(camera);

    config.preprocessing = vec![
        PreprocessingStep::new(1, StepOp::Grayscale),
        PreprocessingStep::new(2, StepOp::GaussianBlur { kernel_size: 5 }),
    ];

    println!("# Anomaly Inspector Configuration File");
    println!("# Example configuration; every value can be overridden with");
    println!("# INSPECTOR_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
