//! Configuration types for a batched rewrite run.
//!
//! All run behaviour is controlled through [`RewriteConfig`], built via its
//! [`RewriteConfigBuilder`]. Tone, model and checkpoint location are passed
//! in explicitly when a run starts; nothing is read from ambient state once
//! the config is built.

use crate::error::RewriteError;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_CALL_TO_ACTION;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a batched rewrite run.
///
/// # Example
/// ```rust
/// use edgequake_manuscript::{RewriteConfig, TransformMode, ToneProfile};
///
/// let config = RewriteConfig::builder()
///     .mode(TransformMode::Rewrite)
///     .tone(ToneProfile::KidFriendly)
///     .batch_size(3000)
///     .max_retries(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.effective_temperature(), 0.7);
/// ```
#[derive(Clone)]
pub struct RewriteConfig {
    /// Byte threshold at which a batch is sealed (`BATCH_SIZE`). Default: 4000.
    ///
    /// Smaller batches lose less work when a request fails but issue more
    /// requests, which exhausts a shared rate limit sooner.
    pub batch_size: usize,

    /// Paragraphs whose trimmed text is shorter than this many characters are
    /// passed through untouched and never sent. Default: 3.
    pub min_paragraph_chars: usize,

    /// Total attempts per batch, first call included (`MAX_RETRIES`). Default: 6.
    pub max_retries: u32,

    /// Wait before the first retry of a transient failure. Default: 2000 ms.
    pub initial_backoff_ms: u64,

    /// How the wait grows between transient retries. Default: doubling.
    pub backoff_growth: BackoffGrowth,

    /// Upper bound for any single wait. Default: 60 000 ms.
    pub max_backoff_ms: u64,

    /// Fixed pause after an unclassified error. Default: 1000 ms.
    pub unknown_error_pause_ms: u64,

    /// What the service is asked to do with each batch. Default: Rewrite.
    pub mode: TransformMode,

    /// Instruction flavour and sampling temperature. Default: StrictGrammar.
    pub tone: ToneProfile,

    /// Overrides the tone's temperature when set.
    pub temperature: Option<f32>,

    /// Book-specific rules appended to every instruction
    /// (e.g. "Whirlwind is referred to as HE").
    pub house_rules: Option<String>,

    /// How batch results are written into the output. Default: StructurePreserving.
    pub reassembly: ReassemblyStrategy,

    /// Text placed between blocks in block-concatenating mode. Default: `* * *`.
    pub block_separator: String,

    /// Remove Markdown artefacts (bold, headings, bullets, double spaces)
    /// from rewritten text. Default: true.
    pub strip_markdown: bool,

    /// Where the checkpoint file lives. `None` keeps progress in memory only.
    pub checkpoint_path: Option<PathBuf>,

    /// What to do when the checkpoint cannot be written. Default: WarnAndContinue.
    pub checkpoint_policy: CheckpointPolicy,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Maximum tokens the model may generate per batch. Default: 8192.
    ///
    /// Must comfortably exceed the token count of `batch_size` bytes of
    /// prose, or rewritten batches come back truncated and fail the
    /// segment-count check.
    pub max_tokens: usize,

    /// Per-attempt timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Fill-in line length that marks a workbook exercise. Default: 4.
    pub blank_line_threshold: usize,

    /// Text inserted after each workbook question.
    pub call_to_action: String,

    /// Optional per-batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            batch_size: 4000,
            min_paragraph_chars: 3,
            max_retries: 6,
            initial_backoff_ms: 2000,
            backoff_growth: BackoffGrowth::default(),
            max_backoff_ms: 60_000,
            unknown_error_pause_ms: 1000,
            mode: TransformMode::default(),
            tone: ToneProfile::default(),
            temperature: None,
            house_rules: None,
            reassembly: ReassemblyStrategy::default(),
            block_separator: "* * *".to_string(),
            strip_markdown: true,
            checkpoint_path: None,
            checkpoint_policy: CheckpointPolicy::default(),
            model: None,
            provider_name: None,
            provider: None,
            system_prompt: None,
            max_tokens: 8192,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            blank_line_threshold: 4,
            call_to_action: DEFAULT_CALL_TO_ACTION.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RewriteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteConfig")
            .field("batch_size", &self.batch_size)
            .field("min_paragraph_chars", &self.min_paragraph_chars)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("backoff_growth", &self.backoff_growth)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("mode", &self.mode)
            .field("tone", &self.tone)
            .field("temperature", &self.temperature)
            .field("reassembly", &self.reassembly)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("checkpoint_policy", &self.checkpoint_policy)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RewriteProgressCallback>"),
            )
            .finish()
    }
}

impl RewriteConfig {
    /// Create a new builder for `RewriteConfig`.
    pub fn builder() -> RewriteConfigBuilder {
        RewriteConfigBuilder {
            config: Self::default(),
        }
    }

    /// Sampling temperature actually sent: explicit override, else the tone's.
    pub fn effective_temperature(&self) -> f32 {
        self.temperature.unwrap_or_else(|| self.tone.temperature())
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`RewriteConfig`].
#[derive(Debug)]
pub struct RewriteConfigBuilder {
    config: RewriteConfig,
}

impl RewriteConfigBuilder {
    pub fn batch_size(mut self, bytes: usize) -> Self {
        self.config.batch_size = bytes;
        self
    }

    pub fn min_paragraph_chars(mut self, n: usize) -> Self {
        self.config.min_paragraph_chars = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn backoff_growth(mut self, growth: BackoffGrowth) -> Self {
        self.config.backoff_growth = growth;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn unknown_error_pause_ms(mut self, ms: u64) -> Self {
        self.config.unknown_error_pause_ms = ms;
        self
    }

    pub fn mode(mut self, mode: TransformMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn tone(mut self, tone: ToneProfile) -> Self {
        self.config.tone = tone;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn house_rules(mut self, rules: impl Into<String>) -> Self {
        self.config.house_rules = Some(rules.into());
        self
    }

    pub fn reassembly(mut self, strategy: ReassemblyStrategy) -> Self {
        self.config.reassembly = strategy;
        self
    }

    pub fn block_separator(mut self, sep: impl Into<String>) -> Self {
        self.config.block_separator = sep.into();
        self
    }

    pub fn strip_markdown(mut self, v: bool) -> Self {
        self.config.strip_markdown = v;
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = Some(path.into());
        self
    }

    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.config.checkpoint_policy = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn blank_line_threshold(mut self, n: usize) -> Self {
        self.config.blank_line_threshold = n;
        self
    }

    pub fn call_to_action(mut self, cta: impl Into<String>) -> Self {
        self.config.call_to_action = cta.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RewriteConfig, RewriteError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(RewriteError::InvalidConfig(
                "Batch size must be ≥ 1 byte".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(RewriteError::InvalidConfig(
                "max_retries counts attempts and must be ≥ 1".into(),
            ));
        }
        if c.max_backoff_ms < c.initial_backoff_ms {
            return Err(RewriteError::InvalidConfig(format!(
                "max backoff ({}ms) is below the initial backoff ({}ms)",
                c.max_backoff_ms, c.initial_backoff_ms
            )));
        }
        if let BackoffGrowth::Exponential { factor } = c.backoff_growth {
            if !factor.is_finite() || factor < 1.0 {
                return Err(RewriteError::InvalidConfig(format!(
                    "Backoff factor must be a finite number ≥ 1.0, got {factor}"
                )));
            }
        }
        if matches!(c.mode, TransformMode::WorkbookCleanup) && c.blank_line_threshold < 2 {
            return Err(RewriteError::InvalidConfig(
                "Workbook blank-line threshold must be ≥ 2".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the service is asked to do with each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformMode {
    /// Report defects per batch, or the sentinel `CLEAN`. The output is a report.
    Audit,
    /// Replace each paragraph with corrected text. (default)
    #[default]
    Rewrite,
    /// Replace fill-in-the-blank lines in workbook exercises with a call to action.
    WorkbookCleanup,
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransformMode::Audit => "audit",
            TransformMode::Rewrite => "rewrite",
            TransformMode::WorkbookCleanup => "workbook",
        })
    }
}

/// Voice the rewrite should take, with the temperature that suits it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ToneProfile {
    /// Warm, empathetic, simple vocabulary for readers aged 6–10.
    KidFriendly,
    /// Neutral; keep the author's voice exactly. (default)
    #[default]
    StrictGrammar,
    /// Caller-supplied instruction and temperature.
    Custom { instruction: String, temperature: f32 },
}

impl ToneProfile {
    pub fn instruction(&self) -> &str {
        match self {
            ToneProfile::KidFriendly => "Tone: Warm, empathetic. Simple vocabulary (Age 6-10).",
            ToneProfile::StrictGrammar => "Tone: Neutral. Keep author's voice exact.",
            ToneProfile::Custom { instruction, .. } => instruction,
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            ToneProfile::KidFriendly => 0.7,
            ToneProfile::StrictGrammar => 0.3,
            ToneProfile::Custom { temperature, .. } => *temperature,
        }
    }
}

/// How a batch's result is written back into the output document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReassemblyStrategy {
    /// Split the answer per paragraph and write each segment into its
    /// original slot, keeping the slot's style. (default)
    #[default]
    StructurePreserving,
    /// Append the whole answer as one block. Loses paragraph styles but
    /// cannot misalign text.
    BlockConcatenating,
}

/// Growth of the wait between transient retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackoffGrowth {
    /// `initial + step × (n − 1)`
    Linear { step_ms: u64 },
    /// `initial × factor^(n − 1)`
    Exponential { factor: f64 },
}

impl Default for BackoffGrowth {
    fn default() -> Self {
        BackoffGrowth::Exponential { factor: 2.0 }
    }
}

/// Reaction to a checkpoint that cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CheckpointPolicy {
    /// Log a warning and keep going with in-memory progress only. (default)
    #[default]
    WarnAndContinue,
    /// Stop the run; the previous checkpoint remains the recoverable artifact.
    Halt,
}
