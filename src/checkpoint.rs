//! Durable snapshots of a run in progress.
//!
//! After every committed batch the orchestrator saves the output document
//! as it stands, together with the sequence number of that batch. If the
//! process dies, the last snapshot is the recoverable partial result.
//!
//! [`FileCheckpointStore`] writes the snapshot to a temporary file in the
//! same directory, flushes it to disk and renames it over the previous one.
//! A crash at any point leaves either the old checkpoint or the new one,
//! never a torn file. The directory is synced after the rename so the new
//! entry also survives a power cut.

use crate::config::TransformMode;
use crate::document::Document;
use crate::error::CheckpointError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Format version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

/// A saved snapshot of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub last_completed_sequence: u64,
    pub mode: TransformMode,
    pub paragraphs_consumed: usize,
    pub total_paragraphs: usize,
    pub saved_at_epoch_ms: u64,
    /// The output document after batch `last_completed_sequence`.
    pub artifact: Document,
}

impl Checkpoint {
    pub fn new(last_completed_sequence: u64, mode: TransformMode, artifact: Document) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            last_completed_sequence,
            mode,
            paragraphs_consumed: 0,
            total_paragraphs: 0,
            saved_at_epoch_ms: now_ms(),
            artifact,
        }
    }

    pub fn with_progress(mut self, consumed: usize, total: usize) -> Self {
        self.paragraphs_consumed = consumed;
        self.total_paragraphs = total;
        self
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Where checkpoints are kept.
///
/// Implementations must make `save` crash-atomic: after it returns, `load`
/// yields the saved checkpoint even if the process dies immediately.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// The last saved checkpoint, or `None` when there is none.
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Delete the checkpoint. Deleting a missing checkpoint is not an error.
    fn clear(&self) -> Result<(), CheckpointError>;

    /// Human-readable location for messages.
    fn location(&self) -> String;
}

/// JSON checkpoint file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint)?;
        write_atomic(&self.path, &json).map_err(|e| self.io_err(e))?;

        debug!(
            "Checkpoint saved: batch {} → {}",
            checkpoint.last_completed_sequence,
            self.path.display()
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Corrupt {
                path: self.path.clone(),
                detail: format!(
                    "unsupported version {} (expected {})",
                    checkpoint.version, CHECKPOINT_VERSION
                ),
            });
        }
        Ok(Some(checkpoint))
    }

    fn clear(&self) -> Result<(), CheckpointError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Replace `path` with `bytes` through a fsynced temp file in the same
/// directory, then sync the directory entry.
///
/// Shared by the checkpoint store and the output writer.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    // Same filesystem as the target, or the rename is not atomic.
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(&dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Process-local store, used when no checkpoint path is configured.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    slot: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(checkpoint.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn clear(&self) -> Result<(), CheckpointError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
