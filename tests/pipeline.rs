//! Integration tests for whole runs against scripted services.
//!
//! Every test drives a real [`Orchestrator`] through the public API; only the
//! text-generation service is faked. Backoffs are a few milliseconds so the
//! retry paths run quickly.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_manuscript::{
    recover, BatchDisposition, BatchError, CancelToken, Checkpoint, CheckpointError,
    CheckpointPolicy, CheckpointStore, Document, FileCheckpointStore, Generation, Orchestrator,
    ReassemblyStrategy, RewriteConfig, RewriteError, RewriteProgressCallback, RunState, RunStatus,
    ServiceError, StyleTag, TransformMode,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

type Script = dyn Fn(&str) -> Result<Generation, ServiceError> + Send + Sync;

/// A service whose answer is computed from the batch text in the prompt.
struct Scripted {
    script: Box<Script>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(script: impl Fn(&str) -> Result<Generation, ServiceError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Uppercases every batch, so each paragraph maps to one segment.
    fn shouting() -> Arc<Self> {
        Self::new(|body| Ok(Generation::new(body.to_uppercase())))
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl edgequake_manuscript::TransformationService for Scripted {
    async fn generate(&self, prompt: &str, _temperature: f32) -> Result<Generation, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.script)(batch_body(prompt))
    }
}

/// The batch text between the triple quotes of a prompt.
fn batch_body(prompt: &str) -> &str {
    prompt
        .split("\"\"\"\n")
        .nth(1)
        .and_then(|rest| rest.split("\n\"\"\"").next())
        .unwrap_or_default()
}

/// Twelve 100-byte paragraphs tagged `p00` … `p11`.
fn twelve_paragraphs() -> Document {
    Document::from_parts((0..12).map(|i| {
        let head = format!("p{i:02} ");
        let text = format!("{head}{}", "x".repeat(100 - head.len()));
        (text, StyleTag::Normal)
    }))
}

fn fast_config() -> edgequake_manuscript::RewriteConfigBuilder {
    RewriteConfig::builder()
        .batch_size(500)
        .max_retries(3)
        .initial_backoff_ms(1)
        .max_backoff_ms(4)
        .unknown_error_pause_ms(1)
}

fn checkpoint_in(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("run.ckpt")
}

/// A store whose saves always fail.
struct FullDisk;

impl CheckpointStore for FullDisk {
    fn save(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Err(CheckpointError::Io {
            path: PathBuf::from("/full/run.ckpt"),
            source: std::io::Error::other("No space left on device"),
        })
    }

    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(None)
    }

    fn clear(&self) -> Result<(), CheckpointError> {
        Ok(())
    }

    fn location(&self) -> String {
        "/full/run.ckpt".to_string()
    }
}

// ── Retry exhaustion and checkpoints ─────────────────────────────────────────

#[tokio::test]
async fn exhausted_batch_is_left_unmodified_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config().checkpoint_path(checkpoint_in(&dir)).build().unwrap();

    // Batch 2 (p05..p09) is rate limited on every attempt.
    let service = Scripted::new(|body| {
        if body.contains("p05") {
            Err(ServiceError::Transient("429 Too Many Requests".into()))
        } else {
            Ok(Generation::new(body.to_uppercase()))
        }
    });

    let doc = twelve_paragraphs();
    let mut orch = Orchestrator::new(service.clone(), config.clone());
    let result = orch.run(&doc).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(orch.state(), RunState::Completed);
    assert_eq!(result.batches.len(), 3);
    assert_eq!(result.batches[1].attempts, 3);
    assert_eq!(result.batches[1].disposition, BatchDisposition::Unmodified);
    assert!(matches!(
        result.batches[1].error,
        Some(BatchError::RetriesExhausted { sequence: 2, attempts: 3, .. })
    ));
    assert_eq!(service.calls(), 1 + 3 + 1);

    for (i, p) in result.artifact.paragraphs.iter().enumerate() {
        if (5..10).contains(&i) {
            assert_eq!(p.text, doc.paragraphs[i].text, "paragraph {i} must be untouched");
        } else {
            assert_eq!(p.text, doc.paragraphs[i].text.to_uppercase(), "paragraph {i}");
        }
    }
    assert_eq!(result.stats.paragraphs_rewritten, 7);
    assert_eq!(result.stats.paragraphs_unmodified, 5);
    assert_eq!(result.stats.batches_degraded, 1);

    // The caller deletes the checkpoint; until then it mirrors the output.
    let checkpoint = recover(&config).unwrap().expect("checkpoint left for caller");
    assert_eq!(checkpoint.last_completed_sequence, 3);
    assert_eq!(checkpoint.artifact, result.artifact);
    assert_eq!(checkpoint.paragraphs_consumed, 12);
}

#[tokio::test]
async fn fatal_error_halts_and_keeps_previous_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config().checkpoint_path(checkpoint_in(&dir)).build().unwrap();

    let service = Scripted::new(|body| {
        if body.contains("p05") {
            Err(ServiceError::Fatal("404 model not found".into()))
        } else {
            Ok(Generation::new(body.to_uppercase()))
        }
    });

    let doc = twelve_paragraphs();
    let mut orch = Orchestrator::new(service.clone(), config.clone());
    let result = orch.run(&doc).await.unwrap();

    assert_eq!(result.status, RunStatus::HaltedOnFatalError);
    assert_eq!(orch.state(), RunState::HaltedOnFatalError);
    assert_eq!(service.calls(), 2, "no retry on fatal, no batch after the halt");
    assert_eq!(result.batches.len(), 2);
    assert_eq!(result.last_completed_sequence, Some(1));
    assert!(result.fatal_reason.as_deref().unwrap().contains("404"));

    let checkpoint = FileCheckpointStore::new(checkpoint_in(&dir)).load().unwrap().unwrap();
    assert_eq!(checkpoint.last_completed_sequence, 1);
    assert_eq!(checkpoint.artifact.paragraphs[4].text, doc.paragraphs[4].text.to_uppercase());
    assert_eq!(checkpoint.artifact.paragraphs[5].text, doc.paragraphs[5].text);
    assert_eq!(checkpoint.artifact, result.artifact);

    match result.into_result() {
        Err(RewriteError::FatalService { sequence, reason }) => {
            assert_eq!(sequence, 2);
            assert!(reason.contains("404"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn leftover_checkpoint_must_be_recovered_or_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config().checkpoint_path(checkpoint_in(&dir)).build().unwrap();
    let doc = twelve_paragraphs();

    let failing = Scripted::new(|body| {
        if body.contains("p10") {
            Err(ServiceError::Fatal("401 invalid api key".into()))
        } else {
            Ok(Generation::new(body.to_uppercase()))
        }
    });
    let halted = Orchestrator::new(failing, config.clone()).run(&doc).await.unwrap();
    assert_eq!(halted.last_completed_sequence, Some(2));

    let mut retry = Orchestrator::new(Scripted::shouting(), config.clone());
    let err = retry.run(&doc).await.unwrap_err();
    assert!(matches!(err, RewriteError::CheckpointExists { sequence: 2, .. }));
    assert_eq!(retry.state(), RunState::Idle);

    let partial = retry.recover().unwrap().unwrap();
    assert_eq!(partial.artifact.paragraphs[9].text, doc.paragraphs[9].text.to_uppercase());
    assert_eq!(partial.artifact.paragraphs[10].text, doc.paragraphs[10].text);

    retry.discard_checkpoint().unwrap();
    let done = retry.run(&doc).await.unwrap();
    assert!(done.is_complete());
    assert_eq!(done.stats.paragraphs_rewritten, 12);
}

// ── Reassembly ───────────────────────────────────────────────────────────────

#[test]
fn segment_mismatch_leaves_batch_unmodified() {
    let doc = Document::from_parts([
        ("Their going to the park.", StyleTag::Normal),
        ("Its a nice day.", StyleTag::Normal),
    ]);
    // Merges both paragraphs into one.
    let service = Scripted::new(|_| Ok(Generation::new("They're going to the park. It's a nice day.")));
    let config = fast_config().build().unwrap();

    let result = tokio_test::block_on(Orchestrator::new(service, config).run(&doc)).unwrap();

    assert!(result.is_complete());
    assert_eq!(result.artifact, doc);
    assert_eq!(result.stats.batches_mismatched, 1);
    assert_eq!(
        result.batches[0].error,
        Some(BatchError::StructuralMismatch {
            sequence: 1,
            expected: 2,
            actual: 1,
        })
    );
}

#[tokio::test]
async fn styles_survive_and_short_paragraphs_pass_through() {
    let doc = Document::from_parts([
        ("Chapter One", StyleTag::heading(1)),
        ("a", StyleTag::Normal),
        ("The **dragon** slept.", StyleTag::Normal),
        ("", StyleTag::Normal),
        ("Quote here.", StyleTag::other("Quote")),
    ]);
    let service = Scripted::new(|body| Ok(Generation::new(body.replace("slept", "woke"))));
    let config = fast_config().build().unwrap();

    let result = Orchestrator::new(service.clone(), config).run(&doc).await.unwrap();

    assert_eq!(result.artifact.len(), doc.len());
    assert_eq!(result.artifact.paragraphs[0].style, StyleTag::heading(1));
    assert_eq!(result.artifact.paragraphs[1].text, "a");
    assert_eq!(result.artifact.paragraphs[2].text, "The dragon woke.");
    assert_eq!(result.artifact.paragraphs[3].text, "");
    assert_eq!(result.artifact.paragraphs[4].style, StyleTag::other("Quote"));
    assert_eq!(result.stats.paragraphs_passed_through, 2);

    let prompts = service.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(!batch_body(&prompts[0]).contains("\n\na\n\n"));
}

#[tokio::test]
async fn quote_with_inner_blank_line_is_rewritten_in_place() {
    let doc = Document::from_markdown(
        "> first quoted line\n>\n> second quoted line\n\nA plain paragraph here.",
    );
    assert_eq!(doc.len(), 2);
    let service = Scripted::shouting();
    let config = fast_config().build().unwrap();

    let result = Orchestrator::new(service.clone(), config).run(&doc).await.unwrap();

    assert_eq!(result.batches[0].disposition, BatchDisposition::Applied);
    assert_eq!(result.stats.batches_mismatched, 0);
    assert_eq!(
        result.artifact.paragraphs[0].text,
        doc.paragraphs[0].text.to_uppercase()
    );
    assert_eq!(result.artifact.paragraphs[0].style, doc.paragraphs[0].style);
    assert_eq!(result.artifact.paragraphs[1].text, "A PLAIN PARAGRAPH HERE.");

    let prompts = service.prompts.lock().unwrap();
    assert!(prompts[0].contains("Return exactly 3 paragraph(s)"));
}

#[tokio::test]
async fn block_mode_concatenates_with_separator() {
    let doc = Document::from_parts([
        ("Alpha alpha.", StyleTag::Normal),
        ("--", StyleTag::Normal),
        ("Beta beta.", StyleTag::Normal),
        ("Gamma gamma.", StyleTag::heading(2)),
    ]);
    let config = fast_config()
        .batch_size(20)
        .reassembly(ReassemblyStrategy::BlockConcatenating)
        .block_separator("~")
        .build()
        .unwrap();

    let result = Orchestrator::new(Scripted::shouting(), config).run(&doc).await.unwrap();

    let texts: Vec<&str> = result.artifact.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, vec!["ALPHA ALPHA.\n\nBETA BETA.", "--", "~", "GAMMA GAMMA."]);
    assert!(result.artifact.iter().all(|p| p.style == StyleTag::Normal));
    assert_eq!(result.stats.paragraphs_rewritten, 3);
}

#[tokio::test]
async fn block_mode_halt_emits_nothing_from_the_failed_batch() {
    let doc = Document::from_parts([
        ("Alpha paragraph one.", StyleTag::Normal),
        ("ok", StyleTag::Normal),
        ("Beta paragraph two.", StyleTag::Normal),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config()
        .reassembly(ReassemblyStrategy::BlockConcatenating)
        .checkpoint_path(checkpoint_in(&dir))
        .build()
        .unwrap();
    let service = Scripted::new(|_| Err(ServiceError::Fatal("404 not found".into())));

    let result = Orchestrator::new(service, config.clone()).run(&doc).await.unwrap();

    assert_eq!(result.status, RunStatus::HaltedOnFatalError);
    assert!(result.artifact.is_empty(), "got {:?}", result.artifact);
    assert!(recover(&config).unwrap().is_none());
}

// ── Modes ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn audit_writes_a_report_and_skips_clean_batches() {
    let doc = Document::from_parts([
        ("Everything here is fine.", StyleTag::Normal),
        ("Whirlwind lost her saddle.", StyleTag::Normal),
    ]);
    let service = Scripted::new(|body| {
        if body.contains("her saddle") {
            Ok(Generation::new("- \"her\" should be \"his\" (Whirlwind is HE)"))
        } else {
            Ok(Generation::new("CLEAN"))
        }
    });
    let config = fast_config()
        .batch_size(10)
        .mode(TransformMode::Audit)
        .house_rules("Whirlwind is referred to as HE.")
        .build()
        .unwrap();

    let result = Orchestrator::new(service.clone(), config).run(&doc).await.unwrap();

    assert_eq!(result.batches[0].disposition, BatchDisposition::Clean);
    assert_eq!(result.batches[1].disposition, BatchDisposition::Applied);
    assert_eq!(result.artifact.len(), 2);
    assert_eq!(result.artifact.paragraphs[0].text, "Audit Report");
    assert!(result.artifact.paragraphs[1].text.starts_with("Paragraph 2:\n"));
    assert!(result.artifact.paragraphs[1].text.contains("should be \"his\""));

    let prompts = service.prompts.lock().unwrap();
    assert!(prompts.iter().all(|p| p.contains("Whirlwind is referred to as HE.")));
}

#[tokio::test]
async fn workbook_cleanup_only_sends_exercises() {
    let doc = Document::from_parts([
        ("Name three fruits: ____________", StyleTag::Normal),
        ("The fox ran home. The end.", StyleTag::Normal),
        ("Draw your favourite animal ..........", StyleTag::Normal),
    ]);
    let service = Scripted::new(|_| {
        Ok(Generation::new(
            "Name three fruits. Use your Activity Workbook.\n\n\
             Draw your favourite animal. Use your Activity Workbook.",
        ))
    });
    let config = fast_config()
        .mode(TransformMode::WorkbookCleanup)
        .call_to_action("Use your Activity Workbook.")
        .build()
        .unwrap();

    let result = Orchestrator::new(service.clone(), config).run(&doc).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.batches[0].paragraph_indices, vec![0, 2]);
    assert_eq!(
        result.artifact.paragraphs[0].text,
        "Name three fruits. Use your Activity Workbook."
    );
    assert_eq!(result.artifact.paragraphs[1].text, doc.paragraphs[1].text);
    assert_eq!(result.stats.paragraphs_passed_through, 1);

    let prompts = service.prompts.lock().unwrap();
    assert!(prompts[0].contains("Use your Activity Workbook."));
    assert!(!prompts[0].contains("The fox ran home"));
}

// ── Cancellation and checkpoint failures ─────────────────────────────────────

struct CancelAfterFirst(CancelToken);

impl RewriteProgressCallback for CancelAfterFirst {
    fn on_batch_complete(&self, _sequence: u64, _estimated_total: usize, _output_len: usize) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn cancel_stops_between_batches() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancelToken::new();
    let config = fast_config()
        .checkpoint_path(checkpoint_in(&dir))
        .progress_callback(Arc::new(CancelAfterFirst(token.clone())))
        .build()
        .unwrap();

    let service = Scripted::shouting();
    let mut orch = Orchestrator::new(service.clone(), config.clone()).with_cancel_token(token);
    let result = orch.run(&twelve_paragraphs()).await.unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(orch.state(), RunState::Cancelled);
    assert_eq!(service.calls(), 1);
    assert_eq!(recover(&config).unwrap().unwrap().last_completed_sequence, 1);
    assert!(matches!(
        result.into_result(),
        Err(RewriteError::Cancelled { last_completed: 1 })
    ));
}

#[tokio::test]
async fn checkpoint_failure_warns_and_continues_by_default() {
    let config = fast_config().build().unwrap();
    let mut orch =
        Orchestrator::new(Scripted::shouting(), config).with_checkpoint_store(Arc::new(FullDisk));

    let result = orch.run(&twelve_paragraphs()).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.stats.batches_succeeded, 3);
    assert_eq!(result.stats.checkpoint_failures, 1, "no retry after the first failure");
}

#[tokio::test]
async fn checkpoint_failure_halts_under_halt_policy() {
    let config = fast_config()
        .checkpoint_policy(CheckpointPolicy::Halt)
        .build()
        .unwrap();
    let service = Scripted::shouting();
    let mut orch =
        Orchestrator::new(service.clone(), config).with_checkpoint_store(Arc::new(FullDisk));

    let result = orch.run(&twelve_paragraphs()).await.unwrap();

    assert_eq!(result.status, RunStatus::HaltedOnFatalError);
    assert_eq!(service.calls(), 1);
    assert!(result.fatal_reason.as_deref().unwrap().contains("checkpoint"));
    assert_eq!(
        result.artifact.paragraphs[0].text,
        twelve_paragraphs().paragraphs[0].text.to_uppercase()
    );
}

// ── Live provider ────────────────────────────────────────────────────────────

/// Live run against a real provider. Needs an API key and `E2E_ENABLED=1`.
///
///   E2E_ENABLED=1 OPENAI_API_KEY=sk-... cargo test --test pipeline live -- --nocapture
#[tokio::test]
async fn live_rewrite_round_trip() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run live tests");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book.md");
    let output = dir.path().join("book.rewritten.md");
    std::fs::write(
        &input,
        "# The Storm\n\nIt were a dark and stormy night, and the wind blowed hard.\n\n\
         Whirlwind shaked her mane and runned to the barn.\n",
    )
    .unwrap();

    let config = RewriteConfig::builder()
        .house_rules("Whirlwind is referred to as HE.")
        .checkpoint_path(dir.path().join("book.ckpt"))
        .build()
        .unwrap();

    let result = edgequake_manuscript::rewrite_to_file(
        input.to_str().unwrap(),
        &output,
        &config,
    )
    .await
    .expect("live run failed to start");

    println!("{:#?}", result.stats);
    assert!(result.is_complete(), "fatal: {:?}", result.fatal_reason);
    let md = std::fs::read_to_string(&output).unwrap();
    assert!(md.starts_with("# The Storm"));
    assert!(!dir.path().join("book.ckpt").exists());
}
