//! Run launcher and state behind the control surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cancel::CancellationSignal;
use crate::client::{CaptchaSolver, ClientFactory, Course, CourseId};
use crate::config::{AppConfig, ControlConfig, SessionConfig};
use crate::error::ControlError;
use crate::progress::{AggregateSnapshot, ProgressSnapshot, ProgressStore};
use crate::study::planner;
use crate::study::scheduler::{RunSummary, SchedulerDeps, TaskScheduler};

/// Clears the running flag when a run ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the config, the progress store and at most one active run.
pub struct ControlPlane {
    config: RwLock<AppConfig>,
    control: ControlConfig,
    factory: Arc<dyn ClientFactory>,
    scheduler: TaskScheduler,
    store: Arc<ProgressStore>,
    cancel: Arc<CancellationSignal>,
    running: Arc<AtomicBool>,
    current: Mutex<Option<JoinHandle<Option<RunSummary>>>>,
}

impl ControlPlane {
    pub fn new(
        config: AppConfig,
        control: ControlConfig,
        factory: Arc<dyn ClientFactory>,
        solver: Arc<dyn CaptchaSolver>,
        session: SessionConfig,
    ) -> Arc<Self> {
        let cancel = Arc::new(match &control.stop_marker {
            Some(path) => CancellationSignal::with_marker(path),
            None => CancellationSignal::new(),
        });
        let store = Arc::new(ProgressStore::new());
        let scheduler = TaskScheduler::new(SchedulerDeps {
            factory: Arc::clone(&factory),
            solver,
            store: Arc::clone(&store),
            cancel: Arc::clone(&cancel),
            session,
        });

        Arc::new(Self {
            config: RwLock::new(config),
            control,
            factory,
            scheduler,
            store,
            cancel,
            running: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Plan every configured account and run the tasks in the background.
    pub async fn start_run(self: &Arc<Self>) -> Result<(), ControlError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ControlError::AlreadyRunning);
        }

        let config = self.config.read().await.clone();
        self.cancel.clear();

        let plane = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = RunningGuard(Arc::clone(&plane.running));

            let tasks = planner::plan(plane.factory.as_ref(), &config.users).await;
            if plane.cancel.is_set() {
                info!("Stop requested while planning, run abandoned");
                return None;
            }
            if tasks.is_empty() {
                return None;
            }
            Some(plane.scheduler.run(tasks, config.global.limit).await)
        });

        *self.current.lock().await = Some(handle);
        info!("Run started");
        Ok(())
    }

    /// Ask the active run to wind down. The run stays "running" until its
    /// workers have reached a checkpoint and exited.
    pub fn stop_run(&self) -> Result<(), ControlError> {
        if !self.is_running() {
            return Err(ControlError::NotRunning);
        }
        self.cancel.set();
        Ok(())
    }

    /// Wait for the most recently started run, if any.
    pub async fn wait_for_run(&self) -> Option<RunSummary> {
        let handle = self.current.lock().await.take()?;
        match handle.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Run task failed: {e}");
                None
            }
        }
    }

    pub fn progress(&self) -> AggregateSnapshot {
        self.store.aggregate()
    }

    pub fn course_progress(&self) -> ProgressSnapshot {
        self.store.snapshot()
    }

    pub fn cancellation(&self) -> &Arc<CancellationSignal> {
        &self.cancel
    }

    pub async fn config_view(&self) -> serde_json::Value {
        self.config.read().await.redacted()
    }

    /// Validate, persist and activate a new config. Redacted passwords sent
    /// back by a dashboard keep their current value.
    pub async fn save_config(&self, mut config: AppConfig) -> Result<(), ControlError> {
        config
            .validate()
            .map_err(|e| ControlError::InvalidRequest(e.to_string()))?;
        let mut current = self.config.write().await;
        config.restore_redacted_passwords(&current);
        config.save(&self.control.config_path)?;
        info!(
            path = %self.control.config_path.display(),
            users = config.users.len(),
            "Configuration saved"
        );
        *current = config;
        Ok(())
    }

    pub async fn find_course(&self, course_id: CourseId) -> Result<Course, ControlError> {
        self.first_user_courses()
            .await?
            .into_iter()
            .find(|c| c.id == course_id)
            .ok_or(ControlError::CourseNotFound)
    }

    pub async fn find_courses_by_name(&self, name: &str) -> Result<Vec<Course>, ControlError> {
        let matches: Vec<Course> = self
            .first_user_courses()
            .await?
            .into_iter()
            .filter(|c| c.matches_name(name))
            .collect();
        if matches.is_empty() {
            return Err(ControlError::CourseNotFound);
        }
        Ok(matches)
    }

    async fn first_user_courses(&self) -> Result<Vec<Course>, ControlError> {
        let user = self
            .config
            .read()
            .await
            .users
            .first()
            .cloned()
            .ok_or(ControlError::NoUsers)?;
        let client = self.factory.create(&user);
        client.login().await?;
        Ok(client.list_courses().await?)
    }
}
