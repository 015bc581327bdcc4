//! Scripted in-memory platform shared by the integration tests.
//!
//! A node completes once it has accepted `heartbeats_to_complete` heartbeats
//! (default 1). Errors can be queued per node for heartbeats and progress
//! queries; every call is recorded for assertions.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use course_pilot::cancel::CancellationSignal;
use course_pilot::client::{
    CaptchaSolver, Chapter, ClientFactory, Course, CourseId, HeartbeatReceipt, HeartbeatRequest,
    NodeId, NodeProgress, StudyClient, StudyNode,
};
use course_pilot::config::UserAccount;
use course_pilot::error::ClientError;

#[derive(Default)]
pub struct PlatformState {
    pub courses: HashMap<String, Vec<Course>>,
    pub chapters: HashMap<CourseId, Vec<Chapter>>,
    pub heartbeats_to_complete: HashMap<NodeId, u32>,
    pub accepted: HashMap<NodeId, u32>,
    pub heartbeat_script: HashMap<NodeId, VecDeque<ClientError>>,
    pub query_script: HashMap<NodeId, VecDeque<ClientError>>,
    pub broken_watchers: HashSet<NodeId>,
    pub failing_logins: HashSet<String>,
    pub heartbeats: Vec<(String, HeartbeatRequest)>,
    pub queries: Vec<NodeId>,
    pub logins: Vec<(String, Instant)>,
    pub completions: HashMap<NodeId, Instant>,
    pub chapter_calls: usize,
    pub cancel_after: Option<(usize, Arc<CancellationSignal>)>,
    pub marker_after: Option<(usize, PathBuf)>,
}

#[derive(Default)]
pub struct FakePlatform {
    pub state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut PlatformState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Enroll `user` in `course` made of a single chapter with `nodes`.
    pub fn enroll(&self, user: &str, course: Course, nodes: Vec<StudyNode>) {
        self.with_state(|s| {
            s.chapters.insert(
                course.id,
                vec![Chapter {
                    id: course.id * 100,
                    idx: 1,
                    name: format!("{} chapter 1", course.name),
                    nodes,
                }],
            );
            s.courses.entry(user.to_string()).or_default().push(course);
        });
    }

    pub fn require_heartbeats(&self, node_id: NodeId, count: u32) {
        self.with_state(|s| {
            s.heartbeats_to_complete.insert(node_id, count);
        });
    }

    pub fn script_heartbeat_errors(&self, node_id: NodeId, errors: Vec<ClientError>) {
        self.with_state(|s| {
            s.heartbeat_script.insert(node_id, errors.into());
        });
    }

    pub fn script_query_errors(&self, node_id: NodeId, errors: Vec<ClientError>) {
        self.with_state(|s| {
            s.query_script.insert(node_id, errors.into());
        });
    }

    pub fn break_watcher(&self, node_id: NodeId) {
        self.with_state(|s| {
            s.broken_watchers.insert(node_id);
        });
    }

    pub fn fail_login(&self, user: &str) {
        self.with_state(|s| {
            s.failing_logins.insert(user.to_string());
        });
    }

    pub fn cancel_after_heartbeats(&self, count: usize, signal: Arc<CancellationSignal>) {
        self.with_state(|s| s.cancel_after = Some((count, signal)));
    }

    /// Create `path` from outside the engine once `count` heartbeats arrived.
    pub fn touch_marker_after_heartbeats(&self, count: usize, path: PathBuf) {
        self.with_state(|s| s.marker_after = Some((count, path)));
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatRequest> {
        self.with_state(|s| s.heartbeats.iter().map(|(_, r)| r.clone()).collect())
    }

    pub fn heartbeats_for(&self, node_id: NodeId) -> Vec<HeartbeatRequest> {
        self.heartbeats()
            .into_iter()
            .filter(|r| r.node_id == node_id)
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.with_state(|s| s.queries.len())
    }

    pub fn login_time(&self, user: &str) -> Option<Instant> {
        self.with_state(|s| s.logins.iter().find(|(u, _)| u == user).map(|(_, t)| *t))
    }

    pub fn completion_time(&self, node_id: NodeId) -> Option<Instant> {
        self.with_state(|s| s.completions.get(&node_id).copied())
    }
}

pub struct FakeClient {
    platform: Arc<FakePlatform>,
    user: String,
}

impl FakeClient {
    pub fn new(platform: Arc<FakePlatform>, user: &str) -> Self {
        Self {
            platform,
            user: user.to_string(),
        }
    }
}

#[async_trait]
impl StudyClient for FakeClient {
    async fn login(&self) -> Result<(), ClientError> {
        self.platform.with_state(|s| {
            s.logins.push((self.user.clone(), Instant::now()));
            if s.failing_logins.contains(&self.user) {
                Err(ClientError::api("wrong password"))
            } else {
                Ok(())
            }
        })
    }

    async fn list_courses(&self) -> Result<Vec<Course>, ClientError> {
        self.platform
            .with_state(|s| Ok(s.courses.get(&self.user).cloned().unwrap_or_default()))
    }

    async fn list_chapters(&self, course_id: CourseId) -> Result<Vec<Chapter>, ClientError> {
        self.platform.with_state(|s| {
            s.chapter_calls += 1;
            s.chapters
                .get(&course_id)
                .cloned()
                .ok_or_else(|| ClientError::api("course not found"))
        })
    }

    async fn query_node_progress(&self, node_id: NodeId) -> Result<NodeProgress, ClientError> {
        self.platform.with_state(|s| {
            s.queries.push(node_id);
            if s.broken_watchers.contains(&node_id) {
                return Err(ClientError::Transport("connection reset".into()));
            }
            if let Some(err) = s.query_script.get_mut(&node_id).and_then(|q| q.pop_front()) {
                return Err(err);
            }
            let needed = s.heartbeats_to_complete.get(&node_id).copied().unwrap_or(1);
            let accepted = s.accepted.get(&node_id).copied().unwrap_or(0);
            let complete = accepted >= needed;
            if complete {
                s.completions.entry(node_id).or_insert_with(Instant::now);
            }
            Ok(NodeProgress {
                progress: (accepted as f64 / needed as f64).min(1.0),
                complete,
            })
        })
    }

    async fn submit_heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatReceipt, ClientError> {
        self.platform.with_state(|s| {
            s.heartbeats.push((self.user.clone(), request.clone()));
            if let Some((count, signal)) = &s.cancel_after {
                if s.heartbeats.len() >= *count {
                    signal.set();
                }
            }
            if let Some((count, path)) = &s.marker_after {
                if s.heartbeats.len() >= *count {
                    std::fs::write(path, "stop").unwrap();
                }
            }
            if let Some(err) = s
                .heartbeat_script
                .get_mut(&request.node_id)
                .and_then(|q| q.pop_front())
            {
                return Err(err);
            }
            let accepted = s.accepted.entry(request.node_id).or_insert(0);
            *accepted += 1;
            Ok(HeartbeatReceipt {
                study_id: request.node_id * 1000 + i64::from(*accepted),
                message: "ok".to_string(),
            })
        })
    }

    async fn captcha_image(&self) -> Result<Vec<u8>, ClientError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

pub struct FakeFactory {
    pub platform: Arc<FakePlatform>,
    pub created: AtomicUsize,
}

impl FakeFactory {
    pub fn new(platform: Arc<FakePlatform>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            created: AtomicUsize::new(0),
        })
    }
}

impl ClientFactory for FakeFactory {
    fn create(&self, user: &UserAccount) -> Arc<dyn StudyClient> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(FakeClient::new(
            Arc::clone(&self.platform),
            &user.username,
        ))
    }
}

/// Hands out `code1`, `code2`, ... and counts invocations.
#[derive(Default)]
pub struct CountingSolver {
    pub calls: AtomicUsize,
}

impl CountingSolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptchaSolver for CountingSolver {
    async fn solve(&self, image: &[u8]) -> Result<String, ClientError> {
        assert!(!image.is_empty(), "solver got an empty image");
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("code{n}"))
    }
}

pub fn user(name: &str) -> UserAccount {
    UserAccount::new("mooc.test", name, "secret")
}
