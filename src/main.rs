//! Command-Line Trainer
//!
//! Trains a character-level model on a text through the worker protocol and
//! prints samples from it.
//!
//! ## Usage
//!
//! ```bash
//! # List model presets
//! microgpt --list-presets
//!
//! # Train the tiny preset on a file and print three samples
//! microgpt --data names.txt --preset tiny --steps 500 --generate 3
//!
//! # Custom shape, inline text, GPU if one is available
//! microgpt --text "hello world " --embd 32 --layers 2 --heads 4 --context 16 --gpu
//!
//! # Everything from a JSON run file (same shape as a train request)
//! microgpt --config run.json
//!
//! # Verify the backward pass against finite differences
//! microgpt --grad-check
//! ```
//!
//! Set `RUST_LOG=debug` for per-step detail.

use anyhow::{bail, Context, Result};
use clap::Parser;
use microgpt::grad_check::{grad_check, GradCheckOptions};
use microgpt::messages::{Request, Response, DEFAULT_MAX_TOKENS};
use microgpt::progress::ProgressLog;
use microgpt::{
    compute_param_count, AdamConfig, Architecture, HostLimits, WorkerHandle, DEFAULT_TEMPERATURE,
};
use serde::Deserialize;
use std::fs;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(
    name = "microgpt",
    about = "Train a tiny character-level transformer and sample from it"
)]
struct Args {
    /// Model preset: tiny, small or medium
    #[arg(long)]
    preset: Option<String>,

    /// List available presets and exit
    #[arg(long)]
    list_presets: bool,

    // Model architecture (overrides preset or run file)
    /// Embedding dimension
    #[arg(long)]
    embd: Option<usize>,

    /// Number of transformer layers
    #[arg(long)]
    layers: Option<usize>,

    /// Number of attention heads
    #[arg(long)]
    heads: Option<usize>,

    /// Context window length (block_size)
    #[arg(long)]
    context: Option<usize>,

    // Training parameters
    /// Training steps
    #[arg(long)]
    steps: Option<usize>,

    /// Initial learning rate (decays linearly to zero)
    #[arg(long)]
    lr: Option<f32>,

    // Input
    /// Path to the training text
    #[arg(long, conflicts_with = "text")]
    data: Option<String>,

    /// Training text given inline
    #[arg(long)]
    text: Option<String>,

    /// JSON run file: {"text", "modelConfig", "adamConfig"}
    #[arg(long)]
    config: Option<String>,

    /// Try to train on a GPU
    #[arg(long)]
    gpu: bool,

    // Sampling
    /// Number of samples to print after training
    #[arg(long, default_value_t = 3)]
    generate: usize,

    /// Sampling temperature
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Maximum characters per sample (capped by the context window)
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize,

    /// Run the finite-difference gradient check and exit
    #[arg(long)]
    grad_check: bool,
}

/// A run described in JSON, shaped like a train request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RunFile {
    text: Option<String>,
    model_config: Option<Architecture>,
    adam_config: Option<AdamConfig>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_presets() {
    println!("\nAvailable presets:\n");
    println!(
        "  {:<8} {:>5} {:>6} {:>5} {:>7} {:>12}",
        "NAME", "EMBD", "LAYERS", "HEADS", "CONTEXT", "PARAMS(V=64)"
    );
    println!("  {}", "-".repeat(50));
    for name in Architecture::PRESETS {
        if let Some(arch) = Architecture::preset(name) {
            println!(
                "  {:<8} {:>5} {:>6} {:>5} {:>7} {:>12}",
                name,
                arch.n_embd,
                arch.n_layer,
                arch.n_head,
                arch.block_size,
                compute_param_count(&arch.with_vocab(64))
            );
        }
    }
    println!("\nUsage: microgpt --data <FILE> --preset <NAME>");
}

fn run_grad_check() -> Result<()> {
    let report = grad_check(GradCheckOptions::default())?;
    println!(
        "\n  {:<12} {:>12} {:>8} {:>8} {:>12} {:>12}",
        "PARAM", "MAX REL ERR", "CHECKED", "KINKS", "|ANALYTIC|", "|NUMERIC|"
    );
    println!("  {}", "-".repeat(70));
    for p in &report.params {
        println!(
            "  {:<12} {:>12.2e} {:>8} {:>8} {:>12.4e} {:>12.4e}",
            p.name, p.max_rel_error, p.checked, p.skipped_kinks, p.analytical_norm, p.numerical_norm
        );
    }
    println!();
    if !report.passed {
        bail!("gradient check failed: max relative error {:.3e}", report.max_rel_error);
    }
    println!("Gradient check passed (max relative error {:.3e})", report.max_rel_error);
    Ok(())
}

fn resolve_run(args: &Args) -> Result<(String, Architecture, AdamConfig)> {
    let file = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
            serde_json::from_str::<RunFile>(&raw).with_context(|| format!("parsing {}", path))?
        }
        None => RunFile::default(),
    };

    let mut arch = match &args.preset {
        Some(name) => Architecture::preset(name).with_context(|| {
            format!("Unknown preset '{}'. Use --list-presets to see available options.", name)
        })?,
        None => file.model_config.unwrap_or_default(),
    };
    arch.n_embd = args.embd.unwrap_or(arch.n_embd);
    arch.n_layer = args.layers.unwrap_or(arch.n_layer);
    arch.n_head = args.heads.unwrap_or(arch.n_head);
    arch.block_size = args.context.unwrap_or(arch.block_size);

    let mut adam = file.adam_config.unwrap_or_default();
    adam.lr = args.lr.unwrap_or(adam.lr);
    adam.max_steps = args.steps.unwrap_or(adam.max_steps);

    let text = match (&args.text, &args.data, file.text) {
        (Some(text), _, _) => text.clone(),
        (None, Some(path), _) => {
            fs::read_to_string(path).with_context(|| format!("{} not found", path))?
        }
        (None, None, Some(text)) => text,
        (None, None, None) => bail!("Provide training text with --data, --text or --config"),
    };

    Ok((text, arch, adam))
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if args.list_presets {
        print_presets();
        return Ok(());
    }
    if args.grad_check {
        return run_grad_check();
    }

    let (text, arch, adam) = resolve_run(&args)?;
    info!(
        chars = text.chars().count(),
        n_embd = arch.n_embd,
        n_layer = arch.n_layer,
        n_head = arch.n_head,
        block_size = arch.block_size,
        steps = adam.max_steps,
        lr = adam.lr,
        "starting run"
    );

    let worker = WorkerHandle::spawn(HostLimits::default())?;

    if args.gpu {
        worker.post(Request::InitGpu)?;
        if let Response::GpuStatus(status) = worker.recv()? {
            if status.available {
                info!(adapter = %status.gpu_name, "GPU backend active");
            } else {
                warn!("no GPU available, training on CPU");
            }
        }
    }

    worker.post(Request::Train {
        text,
        model_config: arch,
        adam_config: adam,
    })?;

    let mut log = ProgressLog::new(adam.max_steps);
    loop {
        match worker.recv()? {
            Response::Ready {
                param_count,
                vocab_size,
            } => {
                info!(
                    "Model ready: {} parameters ({:.2}M), vocabulary {}",
                    param_count,
                    param_count as f64 / 1_000_000.0,
                    vocab_size
                );
            }
            Response::Progress { step, loss, .. } => {
                let lr = microgpt::optimizer::decayed_lr(adam.lr, step, adam.max_steps);
                log.log(step, lr, loss);
            }
            Response::WeightsSnapshot { step, .. } => debug!(step, "weights snapshot"),
            Response::Complete { final_loss } => {
                info!(?final_loss, steps = log.len(), "training complete");
                break;
            }
            Response::Timeout { step } => {
                bail!("training exceeded its time budget at step {}; try a smaller model", step)
            }
            Response::Error { message } => bail!("training failed: {}", message),
            other => debug!(kind = other.kind(), "ignored message"),
        }
    }

    for i in 0..args.generate {
        worker.post(Request::Generate {
            temperature: args.temperature,
            max_tokens: args.max_tokens,
        })?;
        match worker.recv()? {
            Response::Generated { text } => println!("Sample {}: {:?}", i + 1, text),
            Response::Error { message } => bail!("generation failed: {}", message),
            other => debug!(kind = other.kind(), "ignored message"),
        }
    }

    worker.terminate();
    Ok(())
}
