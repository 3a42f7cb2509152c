//! `psoc6`: host console for the dual-core CIFAR-10 classifier.
//!
//! ```text
//! USAGE:
//!   psoc6 run                        Interactive console (ENTER sends the image)
//!   psoc6 classify [--count N]       Send N images and print the scores
//!   psoc6 timing START END [-r N]    Evaluate the SysTick elapsed-time formula
//!   psoc6 export-weights <path>      Write the model as a .q7w weight file
//!   psoc6 layout                     Message layout, stage plan, buffer sizes
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use psoc6_chip::cifar10::{COL_BUFFER_LEN, SCRATCH_BYTES};
use psoc6_chip::ipc::{message_size, PointerWidth, CYPIPE_INTR_MASK};
use psoc6_chip::systick;
use psoc6_driver::{
    elapsed_ns, Console, Direction, DualCoreSystem, RunOutcome, RuntimeConfig, Stage, StaticCamera,
};
use psoc6_models::Cifar10Model;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "psoc6", about = "Dual-core q7 CIFAR-10 classifier", version)]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Weight file (.q7w); synthetic weights are used when omitted.
    #[arg(long, global = true)]
    weights: Option<PathBuf>,

    /// Seed for the synthetic weights.
    #[arg(long, global = true, default_value_t = 1)]
    seed: u32,

    /// Raw 32×32×3 HWC image file; the compiled-in sample when omitted.
    #[arg(long, global = true)]
    image: Option<PathBuf>,

    /// Address width used for the packed pipe messages.
    #[arg(long, global = true, value_enum, default_value_t = Width::Bits32)]
    pointer_width: Width,

    /// Suppress per-stage banners and timings.
    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Width {
    Bits32,
    Bits64,
}

impl From<Width> for PointerWidth {
    fn from(w: Width) -> Self {
        match w {
            Width::Bits32 => Self::Bits32,
            Width::Bits64 => Self::Bits64,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Interactive console on stdin/stdout.
    Run,
    /// Send images without a console and print the scores.
    Classify {
        /// Number of images to send.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Evaluate the elapsed-time formula for raw counter readings.
    Timing {
        /// Counter value at stage start.
        start: u32,
        /// Counter value at stage end.
        end: u32,
        /// Rollovers counted between the two readings.
        #[arg(long, short, default_value_t = 0)]
        rollovers: u64,
    },
    /// Write the active model as a weight file.
    ExportWeights {
        /// Output path.
        path: PathBuf,
    },
    /// Print the message layout, stage plan and buffer sizes.
    Layout,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run => cmd_run(&cli.model)?,
        Cmd::Classify { count } => cmd_classify(&cli.model, count)?,
        Cmd::Timing {
            start,
            end,
            rollovers,
        } => cmd_timing(start, end, rollovers),
        Cmd::ExportWeights { path } => cmd_export(&cli.model, &path)?,
        Cmd::Layout => cmd_layout(&cli.model)?,
    }

    Ok(())
}

fn load_model(args: &ModelArgs) -> Result<Cifar10Model> {
    match &args.weights {
        Some(path) => Cifar10Model::from_file(path)
            .with_context(|| format!("loading weights from {}", path.display())),
        None => Ok(Cifar10Model::synthetic(args.seed)),
    }
}

fn camera(args: &ModelArgs) -> Result<StaticCamera> {
    match &args.image {
        Some(path) => StaticCamera::from_file(path)
            .with_context(|| format!("loading image from {}", path.display())),
        None => Ok(StaticCamera::sample()),
    }
}

fn config(args: &ModelArgs) -> RuntimeConfig {
    RuntimeConfig::default()
        .with_pointer_width(args.pointer_width.into())
        .with_verbose(!args.quiet)
}

fn cmd_run(args: &ModelArgs) -> Result<()> {
    let model = Arc::new(load_model(args)?);
    let mut system =
        DualCoreSystem::new(model, Console::stdout(), config(args)).start(camera(args)?)?;

    let sent = system.run_console(std::io::stdin().lock())?;
    let summary = system.shutdown()?;
    eprintln!(
        "\n{sent} sent, {} classified, {} missing input, {} superseded",
        summary.cm4.classified, summary.cm4.missing_input, summary.overwritten
    );
    Ok(())
}

fn cmd_classify(args: &ModelArgs, count: u32) -> Result<()> {
    let model = Arc::new(load_model(args)?);
    let config = config(args)
        .with_missing_input_delay(Duration::ZERO)
        .with_outcomes(true);
    let mut system = DualCoreSystem::new(model, Console::stdout(), config).start(camera(args)?)?;
    let outcomes = system
        .take_outcomes()
        .context("outcome channel not available")?;

    for i in 1..=count {
        system.cm0().trigger()?;
        match outcomes.recv().context("inference core stopped")? {
            RunOutcome::Classified(run) => {
                let total: u64 = run.timings.iter().map(|t| t.elapsed().reported_ns()).sum();
                eprintln!(
                    "[{i}/{count}] class {}  score {}  {:.3} ms",
                    run.top_class(),
                    run.scores[run.top_class()],
                    total as f64 / 1e6
                );
            }
            RunOutcome::MissingInput => eprintln!("[{i}/{count}] missing input"),
        }
    }

    system.shutdown()?;
    Ok(())
}

fn cmd_timing(start: u32, end: u32, rollovers: u64) {
    let elapsed = elapsed_ns(start, end, rollovers);
    println!("{elapsed}");
    println!("reported ns : {}", elapsed.reported_ns());
    println!("period      : {} s ({} ns)", systick::period_seconds_display(), systick::PERIOD_NS);
}

fn cmd_export(args: &ModelArgs, path: &Path) -> Result<()> {
    let model = load_model(args)?;
    model
        .to_weight_file()
        .write(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!(
        "Wrote {} parameters to {}",
        model.parameter_count(),
        path.display()
    );
    Ok(())
}

fn cmd_layout(args: &ModelArgs) -> Result<()> {
    let width: PointerWidth = args.pointer_width.into();
    println!("Pipe message");
    println!("  client_id   1 byte   (0 = CM0+ -> CM4, 1 = CM4 -> CM0+)");
    println!("  user_code   1 byte   (always 0)");
    println!("  intr_mask   2 bytes  (default {CYPIPE_INTR_MASK:#06x})");
    println!("  image_ref   {} bytes", width.bytes());
    println!("  total       {} bytes", message_size(width));
    println!(
        "  endpoints   CM0+ -> CM4 at {}, CM4 -> CM0+ at {}",
        Direction::Cm0ToCm4.endpoint_addr(),
        Direction::Cm4ToCm0.endpoint_addr()
    );
    println!();

    println!("Stage plan");
    println!("  {:<12} {:>5} {:>6} {:>8}", "stage", "reads", "writes", "elements");
    for stage in Stage::ALL {
        let reads = if stage == Stage::Preprocess {
            "image".to_string()
        } else {
            stage.input().to_string()
        };
        println!(
            "  {:<12} {:>5} {:>6} {:>8}",
            stage.label(),
            reads,
            stage.output().to_string(),
            stage.output_len()
        );
    }
    println!();

    let model = load_model(args)?;
    println!("Buffers");
    println!("  scratch A/B  {SCRATCH_BYTES} bytes each");
    println!("  column       {COL_BUFFER_LEN} × q15");
    println!("  parameters   {}", model.parameter_count());
    Ok(())
}
