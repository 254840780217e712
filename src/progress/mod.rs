//! Progress reporting module
//!
//! Uploads report transferred bytes to a [`ProgressReporter`]. Each part of
//! an upload owns its own task handle; the reporter is the only state shared
//! between parts and must serialise its own updates.

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

pub mod bars;
pub mod reader;

pub use bars::BarProgressReporter;
pub use reader::{ContentSource, PartProgress, ProgressSection, ProgressSectionReader};

/// Handle identifying one task inside a reporter
pub type TaskId = usize;

/// Progress reporting errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error("task index {0} outside of available range")]
    UnknownTask(TaskId),
}

/// Sink for per-task progress updates
///
/// Implementations are called concurrently from every in-flight part upload.
pub trait ProgressReporter: Send + Sync {
    /// Create a task tracking a file (or part) of `size` bytes, if known
    fn create_file_task(&self, size: Option<u64>) -> Result<TaskId, ProgressError>;

    /// Change the human-readable description of a task
    fn describe_task(&self, task: TaskId, description: &str) -> Result<(), ProgressError>;

    /// Advance a task by `delta` bytes
    fn advance_task(&self, task: TaskId, delta: u64) -> Result<(), ProgressError>;

    /// Mark a task as done
    fn finish_task(&self, task: TaskId) -> Result<(), ProgressError>;
}

/// Reporter that discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    fn create_file_task(&self, _size: Option<u64>) -> Result<TaskId, ProgressError> {
        Ok(0)
    }

    fn describe_task(&self, _task: TaskId, _description: &str) -> Result<(), ProgressError> {
        Ok(())
    }

    fn advance_task(&self, _task: TaskId, _delta: u64) -> Result<(), ProgressError> {
        Ok(())
    }

    fn finish_task(&self, _task: TaskId) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// Point-in-time view of a task kept by [`LogProgressReporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub size: Option<u64>,
    pub position: u64,
    pub description: String,
}

#[derive(Debug, Default)]
struct ReporterState {
    next_id: TaskId,
    tasks: HashMap<TaskId, TaskSnapshot>,
}

/// Reporter that emits tracing events
///
/// Describing a task starts a new phase: its position restarts at zero.
/// Finished tasks are forgotten.
#[derive(Debug, Default)]
pub struct LogProgressReporter {
    state: Mutex<ReporterState>,
}

impl LogProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of an unfinished task
    pub fn task(&self, task: TaskId) -> Option<TaskSnapshot> {
        self.state.lock().tasks.get(&task).cloned()
    }

    /// Number of unfinished tasks
    pub fn active_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }
}

impl ProgressReporter for LogProgressReporter {
    fn create_file_task(&self, size: Option<u64>) -> Result<TaskId, ProgressError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.insert(
            id,
            TaskSnapshot {
                size,
                position: 0,
                description: String::new(),
            },
        );
        Ok(id)
    }

    fn describe_task(&self, task: TaskId, description: &str) -> Result<(), ProgressError> {
        let mut state = self.state.lock();
        let entry = state
            .tasks
            .get_mut(&task)
            .ok_or(ProgressError::UnknownTask(task))?;
        entry.description = description.to_string();
        entry.position = 0;

        tracing::debug!(task, size = ?entry.size, description, "progress phase started");
        Ok(())
    }

    fn advance_task(&self, task: TaskId, delta: u64) -> Result<(), ProgressError> {
        let mut state = self.state.lock();
        let entry = state
            .tasks
            .get_mut(&task)
            .ok_or(ProgressError::UnknownTask(task))?;
        entry.position = entry.position.saturating_add(delta);

        tracing::trace!(
            task,
            position = entry.position,
            size = ?entry.size,
            description = %entry.description,
            "progress"
        );
        Ok(())
    }

    fn finish_task(&self, task: TaskId) -> Result<(), ProgressError> {
        let mut state = self.state.lock();
        let entry = state
            .tasks
            .remove(&task)
            .ok_or(ProgressError::UnknownTask(task))?;

        tracing::debug!(
            task,
            position = entry.position,
            description = %entry.description,
            "progress task finished"
        );
        Ok(())
    }
}
