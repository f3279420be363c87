use std::fmt;

use crate::tasks::Task;

/// Phase of the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
  #[default]
  Idle,
  Refreshing,
  Draining,
  /// Last operation failed; the next trigger retries
  Error(String),
}

/// Informational message for the user after a queued change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
  CreatedLocally,
  ChangeQueued,
  DeleteQueued,
}

impl fmt::Display for Notice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Notice::CreatedLocally => write!(f, "Task created locally, waiting to sync"),
      Notice::ChangeQueued => write!(f, "Change saved locally, waiting to sync"),
      Notice::DeleteQueued => write!(f, "Deletion waiting to sync"),
    }
  }
}

/// What the UI should currently show
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskView {
  pub tasks: Vec<Task>,
  pub notice: Option<Notice>,
}
