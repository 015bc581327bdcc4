//! Scheduled unit of work: one user studying one course.

use crate::client::{Course, CourseState};
use crate::config::UserAccount;

/// Course progress as known when the task was planned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedProgress {
    /// Listing already reports the whole course as watched.
    AlreadyWatched,
    /// The course is closed; nothing can be studied anymore.
    CourseEnded,
    /// Watched fraction so far.
    Remaining(f64),
}

impl ResolvedProgress {
    pub fn from_course(course: &Course) -> Self {
        if course.progress >= 1.0 {
            Self::AlreadyWatched
        } else if course.state == CourseState::Ended {
            Self::CourseEnded
        } else {
            Self::Remaining(course.progress)
        }
    }

    /// Nothing left to study for this course.
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Remaining(_))
    }
}

/// Immutable input of the scheduler, consumed exactly once by a worker.
#[derive(Debug, Clone)]
pub struct Task {
    pub user: UserAccount,
    pub course: Course,
    pub resolved: ResolvedProgress,
}

impl Task {
    pub fn new(user: UserAccount, course: Course) -> Self {
        let resolved = ResolvedProgress::from_course(&course);
        Self {
            user,
            course,
            resolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_from_course() {
        let course = Course::new(1, "A").with_progress(1.0);
        assert_eq!(
            ResolvedProgress::from_course(&course),
            ResolvedProgress::AlreadyWatched
        );

        let course = Course::new(1, "A").with_state(CourseState::Ended);
        assert_eq!(
            ResolvedProgress::from_course(&course),
            ResolvedProgress::CourseEnded
        );

        let course = Course::new(1, "A").with_progress(0.25);
        let resolved = ResolvedProgress::from_course(&course);
        assert_eq!(resolved, ResolvedProgress::Remaining(0.25));
        assert!(!resolved.is_finished());
    }

    #[test]
    fn watched_wins_over_ended() {
        let course = Course::new(1, "A")
            .with_progress(1.0)
            .with_state(CourseState::Ended);
        let task = Task::new(UserAccount::new("mooc.test", "alice", "pw"), course);
        assert_eq!(task.resolved, ResolvedProgress::AlreadyWatched);
        assert!(task.resolved.is_finished());
    }
}
