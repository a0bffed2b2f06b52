//! FLUX CLI
//!
//! Runs integer pipelines of flux processors from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod stage;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use flux_core::{FlowState, FluxConfig, FluxResult};
use flux_runtime::{from_fn, FluxPipeline, FluxProcessor, FluxStage, Metrics, Operation};
use futures::{stream, StreamExt};
use serde::Serialize;
use stage::{resolve_config, ConfigOverrides, StageSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flux")]
#[command(about = "FLUX - entropy-bounded stream processors", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline over 1..=EVENTS
    Run {
        /// Number of source events
        #[arg(short, long, default_value_t = 10)]
        events: u64,
        /// Stage as KIND:N (add, mul, fail); repeat for more stages
        #[arg(short, long = "stage", value_name = "KIND:N")]
        stages: Vec<StageSpec>,
        /// JSON config file applied to every stage
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// Print the lifecycle transition table
    States,
}

/// Per-stage summary printed after a run
#[derive(Serialize)]
struct StageReport<'a> {
    stage: &'a str,
    state: FlowState,
    events_processed: u64,
    entropy_remaining: f64,
    metrics: Metrics,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn build_stage(
    spec: StageSpec,
    config: &FluxConfig,
) -> FluxResult<Arc<FluxProcessor<impl Operation<Input = i64, Output = i64>>>> {
    let op = from_fn(spec.to_string(), move |x: i64| async move { spec.apply(x) });
    let mut builder = FluxProcessor::builder(op).config(config.clone());
    if config.feedback_enabled() {
        builder = builder.passthrough_feedback();
    }
    Ok(Arc::new(builder.build()?))
}

async fn run(events: u64, specs: Vec<StageSpec>, config: FluxConfig) -> Result<()> {
    let specs = if specs.is_empty() {
        vec![StageSpec::Mul(2), StageSpec::Add(1)]
    } else {
        specs
    };

    let processors = specs
        .iter()
        .map(|spec| build_stage(*spec, &config))
        .collect::<FluxResult<Vec<_>>>()?;
    let stages: Vec<Arc<dyn FluxStage<i64>>> = processors
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn FluxStage<i64>>)
        .collect();
    let pipeline = FluxPipeline::new(stages)?;

    let last = i64::try_from(events).unwrap_or(i64::MAX);
    let mut output = pipeline.start(stream::iter(1..=last)).await?;

    loop {
        tokio::select! {
            item = output.next() => match item {
                Some(value) => println!("{value}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping pipeline");
                pipeline.stop().await?;
                break;
            }
        }
    }
    pipeline.wait().await?;

    for processor in &processors {
        let report = StageReport {
            stage: processor.name(),
            state: processor.state(),
            events_processed: processor.events_processed(),
            entropy_remaining: processor.entropy_remaining(),
            metrics: processor.metrics(),
        };
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

fn print_states() {
    for state in FlowState::ALL {
        let successors: Vec<&str> = state.successors().iter().map(|s| s.as_str()).collect();
        let successors = if successors.is_empty() {
            "(terminal)".to_string()
        } else {
            successors.join(", ")
        };
        println!("{:<10} -> {}", state.as_str(), successors);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            events,
            stages,
            config,
            overrides,
        } => {
            let config = resolve_config(config.as_deref(), &overrides)?;
            run(events, stages, config).await
        }
        Commands::States => {
            print_states();
            Ok(())
        }
    }
}
