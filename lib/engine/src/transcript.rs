//! Human-readable run transcripts.

use crate::run::RunStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use taskloom_core::{RunId, TaskId};

/// What happened to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task produced a result.
    Completed(String),
    /// The task failed with this message.
    Failed(String),
    /// The run was aborted before the task's layer.
    NotRun,
}

/// One task's section of a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// The task.
    pub task_id: TaskId,
    /// Its title.
    pub title: String,
    /// What happened.
    pub outcome: TaskOutcome,
}

/// Record of a finished run, written to durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    workspace_name: String,
    run_id: RunId,
    finished_at: DateTime<Utc>,
    status: RunStatus,
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Starts a transcript stamped with the current time.
    #[must_use]
    pub fn new(workspace_name: impl Into<String>, run_id: RunId, status: RunStatus) -> Self {
        Self {
            workspace_name: workspace_name.into(),
            run_id,
            finished_at: Utc::now(),
            status,
            entries: Vec::new(),
        }
    }

    /// Appends a task section.
    pub fn push(&mut self, task_id: TaskId, title: impl Into<String>, outcome: TaskOutcome) {
        self.entries.push(TranscriptEntry {
            task_id,
            title: title.into(),
            outcome,
        });
    }

    /// Returns the task sections in execution order.
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Renders the transcript as plain text.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Workspace: {} ===", self.workspace_name)?;
        writeln!(f, "Run: {}", self.run_id)?;
        writeln!(
            f,
            "Finished: {}",
            self.finished_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(f, "Status: {}", self.status)?;

        for entry in &self.entries {
            writeln!(f)?;
            writeln!(f, "[{}] {}", entry.task_id, entry.title)?;
            match &entry.outcome {
                TaskOutcome::Completed(result) => writeln!(f, "Result:\n{result}")?,
                TaskOutcome::Failed(message) => writeln!(f, "Error: {message}")?,
                TaskOutcome::NotRun => writeln!(f, "not run (aborted)")?,
            }
        }
        Ok(())
    }
}
