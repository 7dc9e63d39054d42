//! Input resolution: turn a user-supplied path or URL into a [`Document`].
//!
//! URLs are downloaded into a `TempDir` that lives as long as the
//! [`ResolvedInput`], so the downloaded copy is removed automatically when
//! the run ends, even on panic. The encoding is chosen from the file
//! extension: `.json` is the structured form, anything else is read as
//! Markdown or plain text.

use crate::document::{Document, DocumentFormat};
use crate::error::RewriteError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the `TempDir` is kept alive until the input is dropped.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn format(&self) -> DocumentFormat {
        DocumentFormat::from_path(self.path())
    }

    /// Read and parse the document.
    pub async fn load(&self) -> Result<Document, RewriteError> {
        let path = self.path();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => RewriteError::PermissionDenied {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::NotFound => RewriteError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => RewriteError::InvalidDocument {
                path: path.to_path_buf(),
                detail: e.to_string(),
            },
        })?;
        parse_bytes(path, &bytes, self.format())
    }
}

/// Parse raw bytes read from `path` with the given encoding.
pub fn parse_bytes(path: &Path, bytes: &[u8], format: DocumentFormat) -> Result<Document, RewriteError> {
    let text = std::str::from_utf8(bytes).map_err(|e| RewriteError::InvalidDocument {
        path: path.to_path_buf(),
        detail: format!("not valid UTF-8 text ({e})"),
    })?;
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let doc = Document::parse(text, format).map_err(|e| RewriteError::InvalidDocument {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    debug!("Parsed {} paragraphs from {}", doc.len(), path.display());
    Ok(doc)
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local file.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, RewriteError> {
    if input.trim().is_empty() {
        return Err(RewriteError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve the input and parse it in one step.
pub async fn load_document(
    input: &str,
    timeout_secs: u64,
) -> Result<(ResolvedInput, Document), RewriteError> {
    let resolved = resolve_input(input, timeout_secs).await?;
    let doc = resolved.load().await?;
    Ok((resolved, doc))
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, RewriteError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(RewriteError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(RewriteError::InvalidInput {
            input: path_str.to_string(),
        });
    }

    match std::fs::File::open(&path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(RewriteError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(RewriteError::FileNotFound { path });
        }
    }

    debug!("Resolved local document: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, RewriteError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RewriteError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            RewriteError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            RewriteError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(RewriteError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);
    let temp_dir = TempDir::new().map_err(|e| RewriteError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| RewriteError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| RewriteError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.md".to_string()
}
