//! Sequence Ensemble
//!
//! Command-line driver for one-shot predictions and simulated feedback runs.

use clap::{Parser, Subcommand, ValueEnum};
use sequence_ensemble::{
    config::Config,
    ensemble::EnsembleCoordinator,
    feedback::{
        BatchFeedbackLoop, BatchOptions, BatchState, GenerationMode, InMemorySequenceStore,
        InMemoryTaskQueue, SymbolGenerator, TaskQueue,
    },
    types::{parse_sequence, GeneratorFamily},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sequence-ensemble")]
#[command(about = "Adaptive ensemble prediction for four-symbol sequences")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict the next symbol of a sequence
    Predict {
        /// Symbols as "0,1,2,3", "0 1 2 3" or "0123"
        #[arg(short, long)]
        sequence: String,
    },
    /// Feed a generated stream through the batch feedback loop
    Simulate {
        /// Number of symbols to generate
        #[arg(short = 'n', long, default_value = "200")]
        count: usize,
        #[arg(short, long, value_enum, default_value = "cycle")]
        mode: SimulationMode,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Overrides batch.batch_size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Overrides batch.batch_delay_ms
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Process in-process instead of through the task queue
        #[arg(long)]
        no_queue: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SimulationMode {
    Uniform,
    Cycle,
    Lcg,
}

impl SimulationMode {
    fn generation(self, seed: u64) -> GenerationMode {
        match self {
            SimulationMode::Uniform => GenerationMode::Uniform,
            SimulationMode::Cycle => GenerationMode::Cycle { period: 4, noise: 0.1 },
            SimulationMode::Lcg => GenerationMode::Deterministic {
                family: GeneratorFamily::Lcg,
                seed: seed % 4096,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Predict { sequence } => predict(config, &sequence),
        Commands::Simulate {
            count,
            mode,
            seed,
            batch_size,
            delay_ms,
            no_queue,
        } => simulate(config, count, mode, seed, batch_size, delay_ms, no_queue).await,
    }
}

fn predict(config: Config, sequence: &str) -> anyhow::Result<()> {
    let sequence = parse_sequence(sequence)?;
    tracing::info!("Predicting after {} symbols", sequence.len());

    let coordinator = EnsembleCoordinator::new(&config);
    let result = coordinator.predict(&sequence);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn simulate(
    config: Config,
    count: usize,
    mode: SimulationMode,
    seed: u64,
    batch_size: Option<usize>,
    delay_ms: Option<u64>,
    no_queue: bool,
) -> anyhow::Result<()> {
    tracing::info!("Starting simulation: {} symbols, seed {}", count, seed);

    let coordinator = Arc::new(EnsembleCoordinator::new(&config));
    let queue: Option<Arc<dyn TaskQueue>> = if no_queue {
        None
    } else {
        Some(Arc::new(InMemoryTaskQueue::new(config.batch.event_capacity)))
    };
    let feedback = Arc::new(BatchFeedbackLoop::new(
        config.batch.clone(),
        coordinator.clone(),
        Arc::new(InMemorySequenceStore::new()),
        queue,
    ));
    let worker = feedback.spawn_worker();

    // Log every prediction as it is emitted
    let mut events = feedback.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    "observed {} (previous correct: {:?}) → next {:?} conf={:.3}",
                    event.observed,
                    event.previous_correct,
                    event.result.symbol,
                    event.result.confidence
                ),
                Err(RecvError::Lagged(n)) => tracing::warn!("Skipped {} prediction events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut generator = SymbolGenerator::new(mode.generation(seed), seed);
    let raw: Vec<i64> = generator.take(count).into_iter().map(|s| s.value() as i64).collect();

    let mut options = BatchOptions::new("simulation");
    if let Some(size) = batch_size {
        options = options.with_batch_size(size);
    }
    if let Some(delay) = delay_ms {
        options = options.with_delay_ms(delay);
    }
    let handle = feedback.submit_batch(&raw, options).await?;

    loop {
        let status = feedback.get_batch_status(handle)?;
        if !matches!(status.status, BatchState::Queued | BatchState::Running) {
            tracing::info!("Batch {} finished: {:?}", handle, status);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    feedback.cancel();
    if let Some(worker) = worker {
        worker.await?;
    }
    printer.abort();

    println!("{}", serde_json::to_string_pretty(&coordinator.model_stats())?);
    match coordinator.ensemble_accuracy() {
        Some(accuracy) => println!("ensemble accuracy: {:.1}%", accuracy * 100.0),
        None => println!("ensemble accuracy: no emitted predictions"),
    }
    Ok(())
}
