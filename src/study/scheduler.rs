//! Bounded worker pool running (user, course) tasks.
//!
//! Tasks are pre-loaded into a bounded channel that is closed once filled.
//! Each worker takes one task at a time and studies its course node by node;
//! different tasks run in parallel on different workers. Every task ends in
//! exactly one terminal mark on the [`ProgressStore`], whatever happens to it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::cancel::CancellationSignal;
use crate::client::{CaptchaSolver, ClientFactory, StudyNode};
use crate::config::SessionConfig;
use crate::error::TaskError;
use crate::progress::{ProgressStatus, ProgressStore};
use crate::study::session::{NodeOutcome, SessionDeps, StudySession};
use crate::study::task::Task;

/// Shared dependencies of the scheduler and its workers.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub factory: Arc<dyn ClientFactory>,
    pub solver: Arc<dyn CaptchaSolver>,
    pub store: Arc<ProgressStore>,
    pub cancel: Arc<CancellationSignal>,
    pub session: SessionConfig,
}

/// Result of one scheduling run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub workers: usize,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Per-task outcome counts of one worker.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    succeeded: usize,
    failed: usize,
}

impl Tally {
    fn merge(self, other: Tally) -> Tally {
        Tally {
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
        }
    }
}

/// Final report of a single task before it is written to the store.
struct TaskReport {
    percent: f64,
    result: Result<(), TaskError>,
}

impl TaskReport {
    fn done() -> Self {
        Self {
            percent: 100.0,
            result: Ok(()),
        }
    }

    fn failed(percent: f64, error: TaskError) -> Self {
        Self {
            percent,
            result: Err(error),
        }
    }
}

pub struct TaskScheduler {
    deps: SchedulerDeps,
}

impl TaskScheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        Self { deps }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.deps.store
    }

    /// Run every task with at most `worker_count` in parallel and wait for all
    /// of them to finish.
    pub async fn run(&self, tasks: Vec<Task>, worker_count: usize) -> RunSummary {
        let run_id = Uuid::new_v4();
        self.deps.cancel.clear();
        self.deps.store.reset(&tasks);

        let total = tasks.len();
        let workers = worker_count.min(total).max(usize::from(total > 0));
        if total == 0 {
            info!(%run_id, "No tasks to run");
            return self.summary(run_id, 0, Tally::default());
        }

        let span = info_span!("run", %run_id);
        async {
            info!(workers, tasks = total, "Task system started");

            let (tx, rx) = mpsc::channel::<Task>(workers);
            let rx = Arc::new(Mutex::new(rx));

            let handles: Vec<_> = (0..workers)
                .map(|id| {
                    let worker = Worker {
                        id,
                        deps: self.deps.clone(),
                        queue: Arc::clone(&rx),
                    };
                    tokio::spawn(worker.run().instrument(info_span!("worker", id)))
                })
                .collect();

            let mut unclaimed = 0;
            let mut pending = tasks.into_iter();
            for task in pending.by_ref() {
                if let Err(mpsc::error::SendError(task)) = tx.send(task).await {
                    // Every worker is gone; nobody will pick the rest up.
                    unclaimed += self.fail_unclaimed(std::iter::once(task));
                    break;
                }
            }
            unclaimed += self.fail_unclaimed(pending);
            drop(tx);

            let mut tally = Tally {
                succeeded: 0,
                failed: unclaimed,
            };
            for (id, joined) in join_all(handles).await.into_iter().enumerate() {
                match joined {
                    Ok(worker_tally) => tally = tally.merge(worker_tally),
                    Err(e) => error!(worker = id, "Worker terminated abnormally: {e}"),
                }
            }

            let summary = self.summary(run_id, workers, tally);
            info!(
                completed = summary.completed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "All tasks finished"
            );
            summary
        }
        .instrument(span)
        .await
    }

    fn fail_unclaimed(&self, tasks: impl Iterator<Item = Task>) -> usize {
        let mut count = 0;
        for task in tasks {
            count += 1;
            warn!(
                user = %task.user.username,
                course_id = task.course.id,
                "Task never reached a worker"
            );
            self.deps.store.mark_terminal(
                &task.user.username,
                task.course.id,
                ProgressStatus::Failed,
                0.0,
            );
        }
        count
    }

    fn summary(&self, run_id: Uuid, workers: usize, tally: Tally) -> RunSummary {
        let aggregate = self.deps.store.aggregate();
        RunSummary {
            run_id,
            workers,
            total: aggregate.total,
            completed: aggregate.completed,
            succeeded: tally.succeeded,
            failed: tally.failed,
        }
    }
}

/// One member of the pool, draining the shared queue.
struct Worker {
    id: usize,
    deps: SchedulerDeps,
    queue: Arc<Mutex<mpsc::Receiver<Task>>>,
}

impl Worker {
    async fn run(self) -> Tally {
        let mut tally = Tally::default();
        loop {
            let next = self.queue.lock().await.recv().await;
            let Some(task) = next else {
                break;
            };

            let user = task.user.username.clone();
            let course_id = task.course.id;

            let report = match AssertUnwindSafe(self.process(&task)).catch_unwind().await {
                Ok(report) => report,
                Err(_) => {
                    error!(user = %user, course_id, "Task panicked");
                    TaskReport::failed(0.0, TaskError::Panicked)
                }
            };

            match report.result {
                Ok(()) => {
                    tally.succeeded += 1;
                    info!(user = %user, course_id, course = %task.course.name, "Course finished");
                    self.deps
                        .store
                        .mark_terminal(&user, course_id, ProgressStatus::Completed, 100.0);
                }
                Err(e) => {
                    tally.failed += 1;
                    warn!(user = %user, course_id, course = %task.course.name, "Course failed: {e}");
                    self.deps
                        .store
                        .mark_terminal(&user, course_id, ProgressStatus::Failed, report.percent);
                }
            }
        }
        info!(
            worker = self.id,
            succeeded = tally.succeeded,
            failed = tally.failed,
            "Queue drained, worker exiting"
        );
        tally
    }

    async fn process(&self, task: &Task) -> TaskReport {
        let user = task.user.username.as_str();
        let course = &task.course;
        let store = &self.deps.store;

        store.mark_started(user, course.id);
        if self.deps.cancel.is_set() {
            info!(user = %user, course_id = course.id, "Stop requested, skipping task");
            return TaskReport::failed(0.0, TaskError::Cancelled);
        }

        let client = self.deps.factory.create(&task.user);
        if let Err(e) = client.login().await {
            return TaskReport::failed(
                0.0,
                TaskError::LoginFailed {
                    user: user.to_string(),
                    reason: e.to_string(),
                },
            );
        }
        info!(user = %user, "Logged in");

        if self.deps.cancel.is_set() {
            return TaskReport::failed(0.0, TaskError::Cancelled);
        }

        if task.resolved.is_finished() {
            info!(
                user = %user,
                course_id = course.id,
                course = %course.name,
                resolved = ?task.resolved,
                "Course needs no study, marking complete"
            );
            return TaskReport::done();
        }

        info!(
            user = %user,
            course_id = course.id,
            course = %course.name,
            progress = course.progress,
            "Starting course"
        );
        let chapters = match client.list_chapters(course.id).await {
            Ok(chapters) => chapters,
            Err(e) => {
                return TaskReport::failed(
                    0.0,
                    TaskError::ChaptersFailed {
                        course_id: course.id,
                        reason: e.to_string(),
                    },
                );
            }
        };

        let nodes: Vec<&StudyNode> = chapters
            .iter()
            .flat_map(|chapter| chapter.nodes.iter())
            .filter(|node| node.is_video)
            .collect();
        let total = nodes.len();
        let session_deps = SessionDeps {
            client,
            solver: Arc::clone(&self.deps.solver),
            cancel: Arc::clone(&self.deps.cancel),
            config: self.deps.session.clone(),
        };

        let (mut done, mut aborted) = (0usize, 0usize);
        for node in nodes {
            let percent = node_percent(done, total);
            if self.deps.cancel.is_set() {
                return TaskReport::failed(percent, TaskError::Cancelled);
            }

            match StudySession::new(&session_deps, user, node).run().await {
                NodeOutcome::Completed => {
                    done += 1;
                    store.mark_progress(user, course.id, node_percent(done, total));
                }
                NodeOutcome::Cancelled => {
                    return TaskReport::failed(percent, TaskError::Cancelled);
                }
                NodeOutcome::Aborted(reason) => {
                    aborted += 1;
                    warn!(
                        user = %user,
                        course_id = course.id,
                        node_id = node.id,
                        "Node aborted, moving to next: {reason}"
                    );
                }
            }
        }

        if aborted > 0 {
            TaskReport::failed(
                node_percent(done, total),
                TaskError::NodesAborted { aborted, total },
            )
        } else {
            TaskReport::done()
        }
    }
}

fn node_percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}
