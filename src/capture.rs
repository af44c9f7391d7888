//! Durable screenshot storage, keyed by task name and step index.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

/// Writes captures under `<root>/<task>/<NN>.png`. Index 0 is always the
/// baseline taken before any action.
pub struct CaptureSink {
    root: PathBuf,
    task: String,
}

impl CaptureSink {
    pub fn new(root: impl Into<PathBuf>, task: &str) -> Self {
        Self {
            root: root.into(),
            task: task.to_string(),
        }
    }

    /// Persist one capture. Filenames are zero-padded two-digit indices so a
    /// directory listing reads in execution order.
    pub fn store(&self, step_index: usize, png: &[u8]) -> Result<PathBuf> {
        let dir = self.root.join(&self.task);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating capture directory {}", dir.display()))?;
        let path = dir.join(format!("{step_index:02}.png"));
        fs::write(&path, png)
            .with_context(|| format!("writing capture {}", path.display()))?;
        info!(path = %path.display(), "saved screenshot");
        Ok(path)
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.task)
    }
}

/// Derive a filesystem-friendly capture folder name from a task description.
pub fn task_slug(task: &str) -> String {
    let slug: String = task
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let trimmed: String = slug.trim_matches('_').chars().take(40).collect();
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed
    }
}
