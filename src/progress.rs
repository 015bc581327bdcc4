//! Progress bookkeeping shared by all workers of a run.
//!
//! One record per (user, course) plus the run-wide aggregate. Every method
//! takes the internal lock for the whole update, so callers never synchronize
//! on their own and readers never see a half-written record.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::CourseId;
use crate::study::task::Task;

/// Status of one (user, course) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ProgressStatus {
    /// Status only ever moves forward.
    pub fn can_transition_to(&self, target: ProgressStatus) -> bool {
        use ProgressStatus::*;

        matches!(
            (self, target),
            (Pending, InProgress)
                | (Pending, Completed)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Progress of one user on one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCourseProgress {
    pub user_id: String,
    pub course_id: CourseId,
    pub course_name: String,
    /// Percent, 0 to 100. Exactly 100 only when completed.
    pub progress: f64,
    pub status: ProgressStatus,
    pub updated_at: DateTime<Utc>,
}

/// Run-wide counters as reported to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub total: usize,
    pub completed: usize,
    pub percentage: f64,
}

pub type ProgressSnapshot = BTreeMap<String, BTreeMap<CourseId, UserCourseProgress>>;

/// Highest percent a record may show before it is completed.
const MAX_UNFINISHED_PERCENT: f64 = 99.0;

#[derive(Debug, Default)]
struct Inner {
    total: usize,
    completed: usize,
    records: ProgressSnapshot,
}

#[derive(Debug, Default)]
pub struct ProgressStore {
    inner: Mutex<Inner>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking writer leaves the maps consistent; keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new run: counters cleared, `total` set to the number of tasks
    /// and one pending record per distinct (user, course).
    pub fn reset(&self, tasks: &[Task]) {
        let mut inner = self.lock();
        inner.total = tasks.len();
        inner.completed = 0;
        inner.records.clear();

        let now = Utc::now();
        for task in tasks {
            inner
                .records
                .entry(task.user.username.clone())
                .or_default()
                .insert(
                    task.course.id,
                    UserCourseProgress {
                        user_id: task.user.username.clone(),
                        course_id: task.course.id,
                        course_name: task.course.name.clone(),
                        progress: 0.0,
                        status: ProgressStatus::Pending,
                        updated_at: now,
                    },
                );
        }
    }

    /// Pending → InProgress. Ignored for unknown or already finished records.
    pub fn mark_started(&self, user_id: &str, course_id: CourseId) {
        let mut inner = self.lock();
        if let Some(record) = record_mut(&mut inner, user_id, course_id) {
            if record.status.can_transition_to(ProgressStatus::InProgress) {
                record.status = ProgressStatus::InProgress;
                record.updated_at = Utc::now();
            }
        }
    }

    /// Raise the percent of an in-flight record. Never lowers it and never
    /// reaches 100.
    pub fn mark_progress(&self, user_id: &str, course_id: CourseId, percent: f64) {
        let mut inner = self.lock();
        if let Some(record) = record_mut(&mut inner, user_id, course_id) {
            if record.status == ProgressStatus::InProgress {
                let percent = percent.clamp(0.0, MAX_UNFINISHED_PERCENT);
                if percent > record.progress {
                    record.progress = percent;
                    record.updated_at = Utc::now();
                }
            }
        }
    }

    /// Record a task's final outcome and count the task in the aggregate.
    ///
    /// Called exactly once per task. Every call counts, so tasks sharing a
    /// (user, course) key each reach the aggregate. The record itself keeps
    /// the first terminal outcome; the return value tells whether this call
    /// set it.
    pub fn mark_terminal(
        &self,
        user_id: &str,
        course_id: CourseId,
        status: ProgressStatus,
        percent: f64,
    ) -> bool {
        debug_assert!(status.is_terminal());
        let mut inner = self.lock();

        if inner.completed < inner.total {
            inner.completed += 1;
        }

        match record_mut(&mut inner, user_id, course_id) {
            Some(record) if record.status.is_terminal() => {
                tracing::warn!(
                    user = %user_id,
                    course_id,
                    status = %record.status,
                    "Record already terminal, keeping its outcome"
                );
                false
            }
            Some(record) => {
                record.status = status;
                record.progress = match status {
                    ProgressStatus::Completed => 100.0,
                    _ => percent.clamp(0.0, MAX_UNFINISHED_PERCENT),
                };
                record.updated_at = Utc::now();
                true
            }
            None => {
                tracing::warn!(user = %user_id, course_id, "Terminal mark for unknown task");
                false
            }
        }
    }

    /// Deep copy of every record.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().records.clone()
    }

    pub fn aggregate(&self) -> AggregateSnapshot {
        let inner = self.lock();
        let percentage = if inner.total > 0 {
            inner.completed as f64 / inner.total as f64 * 100.0
        } else {
            0.0
        };
        AggregateSnapshot {
            total: inner.total,
            completed: inner.completed,
            percentage,
        }
    }
}

fn record_mut<'a>(
    inner: &'a mut Inner,
    user_id: &str,
    course_id: CourseId,
) -> Option<&'a mut UserCourseProgress> {
    inner.records.get_mut(user_id)?.get_mut(&course_id)
}
