//! Terminal progress bars
//!
//! One bar per task, stacked in a [`MultiProgress`]. A bar is only drawn
//! once its task first advances, and is cleared when the task finishes.

use super::{ProgressError, ProgressReporter, TaskId};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;

const BAR_TEMPLATE: &str =
    "{msg:>10} [{bar:40.cyan/blue}] {bytes:>10}/{total_bytes:10} {bytes_per_sec}";

struct BarTask {
    bar: ProgressBar,
    shown: bool,
}

#[derive(Default)]
struct BarState {
    next_id: TaskId,
    tasks: HashMap<TaskId, BarTask>,
}

/// Reporter drawing per-task progress bars
pub struct BarProgressReporter {
    multi: MultiProgress,
    style: ProgressStyle,
    state: Mutex<BarState>,
}

impl BarProgressReporter {
    /// Bars drawn on stderr
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        Self {
            multi: MultiProgress::with_draw_target(target),
            style,
            state: Mutex::new(BarState::default()),
        }
    }

    /// Number of unfinished tasks
    pub fn active_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Number of unfinished tasks that have a bar on screen
    pub fn visible_tasks(&self) -> usize {
        self.state.lock().tasks.values().filter(|t| t.shown).count()
    }

    /// Position of an unfinished task in its current phase
    pub fn position(&self, task: TaskId) -> Option<u64> {
        self.state.lock().tasks.get(&task).map(|t| t.bar.position())
    }
}

impl Default for BarProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarProgressReporter {
    fn create_file_task(&self, size: Option<u64>) -> Result<TaskId, ProgressError> {
        let bar = ProgressBar::hidden().with_style(self.style.clone());
        if let Some(size) = size {
            bar.set_length(size);
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.insert(id, BarTask { bar, shown: false });
        Ok(id)
    }

    fn describe_task(&self, task: TaskId, description: &str) -> Result<(), ProgressError> {
        let state = self.state.lock();
        let entry = state
            .tasks
            .get(&task)
            .ok_or(ProgressError::UnknownTask(task))?;

        // Each description starts a new phase over the same bytes.
        entry.bar.set_message(description.to_string());
        entry.bar.set_position(0);
        Ok(())
    }

    fn advance_task(&self, task: TaskId, delta: u64) -> Result<(), ProgressError> {
        let mut state = self.state.lock();
        let entry = state
            .tasks
            .get_mut(&task)
            .ok_or(ProgressError::UnknownTask(task))?;

        if !entry.shown {
            entry.bar = self.multi.add(entry.bar.clone());
            entry.shown = true;
        }
        entry.bar.inc(delta);
        Ok(())
    }

    fn finish_task(&self, task: TaskId) -> Result<(), ProgressError> {
        let entry = self
            .state
            .lock()
            .tasks
            .remove(&task)
            .ok_or(ProgressError::UnknownTask(task))?;

        entry.bar.finish_and_clear();
        if entry.shown {
            self.multi.remove(&entry.bar);
        }
        Ok(())
    }
}
