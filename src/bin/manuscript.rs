//! CLI binary for edgequake-manuscript.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `RewriteConfig`, drives one run and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_manuscript::pipeline::input::load_document;
use edgequake_manuscript::{
    discard_checkpoint, recover, write_document, BackoffGrowth, CancelToken, CheckpointPolicy,
    Document, LlmService, Orchestrator, ProgressCallback, ReassemblyStrategy, RewriteConfig,
    RewriteProgressCallback, RunStatus, RunSummary, ToneProfile, TransformMode,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per batch.
///
/// The bar length is the orchestrator's running estimate and is updated on
/// every event, so it may grow or shrink slightly as the run proceeds.
struct CliProgressCallback {
    bar: ProgressBar,
    batch_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            batch_started: Mutex::new(None),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/~{len} batches  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rewriting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self) -> f64 {
        self.batch_started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RewriteProgressCallback for CliProgressCallback {
    fn on_run_start(&self, estimated_batches: usize) {
        self.activate_bar(estimated_batches);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting run of ~{estimated_batches} batches…"))
        ));
    }

    fn on_batch_start(&self, sequence: u64, estimated_total: usize) {
        *self.batch_started.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.bar.set_length(estimated_total as u64);
        self.bar.set_message(format!("batch {sequence}"));
    }

    fn on_batch_complete(&self, sequence: u64, estimated_total: usize, output_len: usize) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} Batch {:>3}/~{:<3}  {:<10}  {}",
            green("✓"),
            sequence,
            estimated_total,
            dim(&format!("{output_len:>6} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.set_length(estimated_total as u64);
        self.bar.inc(1);
    }

    fn on_batch_error(&self, sequence: u64, estimated_total: usize, error: &str) {
        let secs = self.elapsed_secs();

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Batch {:>3}/~{:<3}  {}  {}",
            red("✗"),
            sequence,
            estimated_total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.set_length(estimated_total as u64);
        self.bar.inc(1);
    }

    fn on_checkpoint_error(&self, sequence: u64, error: &str) {
        self.bar.println(format!(
            "  {} Checkpoint after batch {} not saved: {}",
            yellow("⚠"),
            sequence,
            error
        ));
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();

        match summary.status {
            RunStatus::Completed if summary.degraded == 0 => eprintln!(
                "{} {} batches rewritten successfully",
                green("✔"),
                bold(&summary.succeeded.to_string())
            ),
            RunStatus::Completed => eprintln!(
                "{} {}/{} batches rewritten  ({} left unmodified)",
                cyan("⚠"),
                bold(&summary.succeeded.to_string()),
                summary.batches,
                red(&summary.degraded.to_string()),
            ),
            RunStatus::HaltedOnFatalError => eprintln!(
                "{} Halted after {} batches: {}",
                red("✘"),
                summary.batches,
                red(summary.fatal_reason.as_deref().unwrap_or("fatal error")),
            ),
            RunStatus::Cancelled => eprintln!(
                "{} Cancelled after {} batches",
                yellow("■"),
                summary.batches
            ),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rewrite a manuscript (stdout)
  manuscript book.md

  # Rewrite to file with a crash-safe checkpoint
  manuscript book.md -o book.rewritten.md --checkpoint book.ckpt

  # Children's edition with house rules
  manuscript --tone kid-friendly --house-rules "Whirlwind is referred to as HE." book.md -o kids.md

  # Audit only: write a defect report
  manuscript --mode audit book.md -o audit.md

  # Workbook cleanup: replace fill-in lines with a call to action
  manuscript --mode workbook --cta "Use your Activity Workbook." workbook.md -o clean.md

  # A previous run crashed or halted: write out what it finished
  manuscript --recover --checkpoint book.ckpt -o partial.md

  # Start over, throwing the previous checkpoint away
  manuscript --discard-checkpoint --checkpoint book.ckpt book.md -o book.rewritten.md

  # Structured documents and JSON run reports
  manuscript book.json -o book.out.json
  manuscript --json book.md > run.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  MANUSCRIPT_*            Every flag has a MANUSCRIPT_ variable (see --help)
  RUST_LOG                Override log filtering (e.g. edgequake_manuscript=debug)

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Rewrite:         manuscript book.md -o book.rewritten.md
"#;

/// Rewrite long manuscripts with an LLM, batch by batch.
#[derive(Parser, Debug)]
#[command(
    name = "manuscript",
    version,
    about = "Rewrite, audit or clean up long manuscripts with an LLM, batch by batch",
    long_about = "Batch the paragraphs of a Markdown, text or JSON document, send each batch to an \
LLM with bounded retries, and write the answers back into the original paragraph slots. \
Progress is checkpointed after every batch so a crash or a fatal error never loses finished work.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local document path (.md, .txt, .json) or HTTP/HTTPS URL.
    #[arg(required_unless_present = "recover")]
    input: Option<String>,

    /// Write the output document to this file instead of stdout.
    #[arg(short, long, env = "MANUSCRIPT_OUTPUT")]
    output: Option<PathBuf>,

    /// What to do with each batch.
    #[arg(long, env = "MANUSCRIPT_MODE", value_enum, default_value = "rewrite")]
    mode: ModeArg,

    /// Voice of the rewrite.
    #[arg(long, env = "MANUSCRIPT_TONE", value_enum, default_value = "strict")]
    tone: ToneArg,

    /// Custom tone instruction; replaces --tone.
    #[arg(long, env = "MANUSCRIPT_TONE_INSTRUCTION")]
    tone_instruction: Option<String>,

    /// Book-specific rules appended to every instruction.
    #[arg(long, env = "MANUSCRIPT_HOUSE_RULES")]
    house_rules: Option<String>,

    /// How answers are written back.
    #[arg(long, env = "MANUSCRIPT_STRATEGY", value_enum, default_value = "structure")]
    strategy: StrategyArg,

    /// Separator between blocks with --strategy block.
    #[arg(long, env = "MANUSCRIPT_BLOCK_SEPARATOR", default_value = "* * *")]
    block_separator: String,

    /// Seal a batch once it reaches this many bytes.
    #[arg(long, env = "MANUSCRIPT_BATCH_SIZE", default_value_t = 4000,
          value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Paragraphs with fewer trimmed characters are copied through unsent.
    #[arg(long, env = "MANUSCRIPT_MIN_CHARS", default_value_t = 3)]
    min_chars: usize,

    /// Total attempts per batch, first call included.
    #[arg(long, env = "MANUSCRIPT_MAX_RETRIES", default_value_t = 6)]
    max_retries: u32,

    /// First wait after a transient failure, in milliseconds.
    #[arg(long, env = "MANUSCRIPT_INITIAL_BACKOFF_MS", default_value_t = 2000)]
    initial_backoff_ms: u64,

    /// Multiply the wait by this factor after each transient failure.
    #[arg(long, env = "MANUSCRIPT_BACKOFF_FACTOR", default_value_t = 2.0,
          conflicts_with = "backoff_step_ms")]
    backoff_factor: f64,

    /// Grow the wait linearly by this many milliseconds instead.
    #[arg(long, env = "MANUSCRIPT_BACKOFF_STEP_MS")]
    backoff_step_ms: Option<u64>,

    /// Upper bound for any single wait, in milliseconds.
    #[arg(long, env = "MANUSCRIPT_MAX_BACKOFF_MS", default_value_t = 60_000)]
    max_backoff_ms: u64,

    /// Checkpoint file; progress is kept in memory only when unset.
    #[arg(long, env = "MANUSCRIPT_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// What to do when the checkpoint cannot be written.
    #[arg(long, env = "MANUSCRIPT_CHECKPOINT_POLICY", value_enum, default_value = "warn")]
    checkpoint_policy: CheckpointPolicyArg,

    /// Write the partial output of the last checkpoint and exit.
    #[arg(long, requires = "checkpoint", conflicts_with = "discard_checkpoint")]
    recover: bool,

    /// Delete an existing checkpoint before starting.
    #[arg(long, requires = "checkpoint")]
    discard_checkpoint: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "MANUSCRIPT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per batch.
    #[arg(long, env = "MANUSCRIPT_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0); defaults to the tone's.
    #[arg(long, env = "MANUSCRIPT_TEMPERATURE")]
    temperature: Option<f32>,

    /// Keep Markdown emphasis, headings and bullets in rewritten text.
    #[arg(long, env = "MANUSCRIPT_KEEP_MARKDOWN")]
    keep_markdown: bool,

    /// Fill-in line length that marks a workbook exercise.
    #[arg(long, env = "MANUSCRIPT_BLANK_LINE_THRESHOLD", default_value_t = 4)]
    blank_line_threshold: usize,

    /// Call to action inserted by workbook cleanup.
    #[arg(long, env = "MANUSCRIPT_CTA")]
    cta: Option<String>,

    /// Print the run report as JSON instead of the document.
    #[arg(long, env = "MANUSCRIPT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "MANUSCRIPT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MANUSCRIPT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MANUSCRIPT_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MANUSCRIPT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-attempt LLM call timeout in seconds.
    #[arg(long, env = "MANUSCRIPT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Audit,
    Rewrite,
    Workbook,
}

impl From<ModeArg> for TransformMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Audit => TransformMode::Audit,
            ModeArg::Rewrite => TransformMode::Rewrite,
            ModeArg::Workbook => TransformMode::WorkbookCleanup,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ToneArg {
    KidFriendly,
    Strict,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Structure,
    Block,
}

impl From<StrategyArg> for ReassemblyStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Structure => ReassemblyStrategy::StructurePreserving,
            StrategyArg::Block => ReassemblyStrategy::BlockConcatenating,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CheckpointPolicyArg {
    Warn,
    Halt,
}

impl From<CheckpointPolicyArg> for CheckpointPolicy {
    fn from(v: CheckpointPolicyArg) -> Self {
        match v {
            CheckpointPolicyArg::Warn => CheckpointPolicy::WarnAndContinue,
            CheckpointPolicyArg::Halt => CheckpointPolicy::Halt,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-batch feedback, so library INFO logs
    // are suppressed while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.recover;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn RewriteProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Recovery mode ────────────────────────────────────────────────────
    if cli.recover {
        let checkpoint = recover(&config)
            .context("Failed to read checkpoint")?
            .context("No checkpoint found; nothing to recover")?;
        emit_document(&cli, &checkpoint.artifact).await?;
        if !cli.quiet {
            eprintln!(
                "{} Recovered {} run up to batch {} ({}/{} paragraphs consumed)",
                green("✔"),
                checkpoint.mode,
                checkpoint.last_completed_sequence,
                checkpoint.paragraphs_consumed,
                checkpoint.total_paragraphs
            );
        }
        return Ok(());
    }

    if cli.discard_checkpoint {
        discard_checkpoint(&config).context("Failed to discard checkpoint")?;
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let input = cli.input.as_deref().context("An input document is required")?;
    let (_resolved, doc) = load_document(input, config.download_timeout_secs)
        .await
        .context("Failed to load document")?;
    anyhow::ensure!(!doc.is_empty(), "{input} contains no paragraphs");

    let service = LlmService::from_config(&config).context("Failed to set up LLM provider")?;
    let cancel = CancelToken::new();
    let mut orchestrator =
        Orchestrator::new(Arc::new(service), config.clone()).with_cancel_token(cancel.clone());

    // First Ctrl-C stops between batches; the checkpoint stays usable.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Stopping after the current batch…", yellow("■"));
            cancel.cancel();
        }
    });

    let result = orchestrator.run(&doc).await.context("Rewrite failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise run report")?;
        println!("{json}");
    } else {
        emit_document(&cli, &result.artifact).await?;
    }

    if result.is_complete() {
        orchestrator
            .discard_checkpoint()
            .context("Failed to remove checkpoint")?;
    }

    if !cli.quiet && !cli.json {
        let stats = &result.stats;
        if !show_progress {
            eprintln!(
                "Run {}: {}/{} batches in {}ms",
                result.status, stats.batches_succeeded, stats.batches_total, stats.total_duration_ms
            );
        }
        eprintln!(
            "   {} paragraphs rewritten, {} unmodified, {} passed through",
            dim(&stats.paragraphs_rewritten.to_string()),
            dim(&stats.paragraphs_unmodified.to_string()),
            dim(&stats.paragraphs_passed_through.to_string()),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out  ·  {} attempts",
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
            dim(&stats.total_attempts.to_string()),
        );
        if !result.is_complete() {
            if let Some(ref path) = config.checkpoint_path {
                eprintln!(
                    "   Partial output saved; recover it with --recover --checkpoint {}",
                    path.display()
                );
            }
        }
    }

    result.into_result().context("Run did not complete")?;
    Ok(())
}

/// Write `doc` to `--output`, or to stdout as Markdown.
async fn emit_document(cli: &Cli, doc: &Document) -> Result<()> {
    if let Some(ref path) = cli.output {
        write_document(doc, path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    } else {
        let markdown = doc.to_markdown();
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(markdown.as_bytes())
            .context("Failed to write to stdout")?;
    }
    Ok(())
}

/// Map CLI args to `RewriteConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RewriteConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let tone = match (&cli.tone_instruction, cli.tone) {
        (Some(instruction), _) => ToneProfile::Custom {
            instruction: instruction.clone(),
            temperature: cli.temperature.unwrap_or(0.3),
        },
        (None, ToneArg::KidFriendly) => ToneProfile::KidFriendly,
        (None, ToneArg::Strict) => ToneProfile::StrictGrammar,
    };

    let growth = match cli.backoff_step_ms {
        Some(step_ms) => BackoffGrowth::Linear { step_ms },
        None => BackoffGrowth::Exponential {
            factor: cli.backoff_factor,
        },
    };

    let mut builder = RewriteConfig::builder()
        .mode(cli.mode.into())
        .tone(tone)
        .reassembly(cli.strategy.into())
        .block_separator(cli.block_separator.clone())
        .batch_size(cli.batch_size as usize)
        .min_paragraph_chars(cli.min_chars)
        .max_retries(cli.max_retries)
        .initial_backoff_ms(cli.initial_backoff_ms)
        .backoff_growth(growth)
        .max_backoff_ms(cli.max_backoff_ms)
        .checkpoint_policy(cli.checkpoint_policy.into())
        .strip_markdown(!cli.keep_markdown)
        .max_tokens(cli.max_tokens)
        .blank_line_threshold(cli.blank_line_threshold)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(ref rules) = cli.house_rules {
        builder = builder.house_rules(rules.clone());
    }
    if let Some(ref cta) = cli.cta {
        builder = builder.call_to_action(cta.clone());
    }
    if let Some(ref path) = cli.checkpoint {
        builder = builder.checkpoint_path(path.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
