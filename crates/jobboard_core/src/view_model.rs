use crate::{BoardColumn, ConnectionState, ErrorClass, ErrorNotice, Issue, Job};

/// Snapshot of the board handed to subscribers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoardView {
    /// Most recent first.
    pub jobs: Vec<Job>,
    pub issues: Vec<Issue>,
    pub connection: ConnectionState,
    pub last_error: Option<ErrorNotice>,
}

impl BoardView {
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// True when fetching is blocked until a server is configured.
    pub fn needs_configuration(&self) -> bool {
        self.error_class() == Some(ErrorClass::Configuration)
    }

    /// True when the displayed data may be stale but recovery is automatic.
    pub fn is_reconnecting(&self) -> bool {
        self.error_class() == Some(ErrorClass::Transient)
            || matches!(
                self.connection,
                ConnectionState::Connecting | ConnectionState::Error
            )
    }

    pub fn issues_in(&self, column: BoardColumn) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |issue| issue.column == column)
    }

    fn error_class(&self) -> Option<ErrorClass> {
        self.last_error.as_ref().map(|notice| notice.class)
    }
}
