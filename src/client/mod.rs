//! Remote platform seam.
//!
//! The study engine only talks to the platform through [`StudyClient`] and to
//! the captcha service through [`CaptchaSolver`]. Concrete HTTP adapters live
//! in the embedding application and are handed in via [`ClientFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::UserAccount;
use crate::error::ClientError;

pub type CourseId = i64;
pub type NodeId = i64;

/// Whether the platform still accepts study time for a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseState {
    Active,
    Ended,
}

/// An enrolled course as returned by the course listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    /// Watched fraction, 0.0 to 1.0.
    pub progress: f64,
    pub state: CourseState,
}

impl Course {
    pub fn new(id: CourseId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            progress: 0.0,
            state: CourseState::Active,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_state(mut self, state: CourseState) -> Self {
        self.state = state;
        self
    }

    /// Case-insensitive substring match used by name filters.
    pub fn matches_name(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// A chapter and its study nodes, in course order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub idx: u32,
    pub name: String,
    pub nodes: Vec<StudyNode>,
}

/// One lesson inside a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyNode {
    pub id: NodeId,
    pub idx: u32,
    pub name: String,
    /// Quizzes and other non-video nodes are skipped.
    pub is_video: bool,
    /// Cached "video finished" state from the chapter listing.
    pub video_complete: bool,
    /// Cached watched fraction from the chapter listing.
    pub progress: f64,
}

impl StudyNode {
    pub fn video(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            idx: 0,
            name: name.into(),
            is_video: true,
            video_complete: false,
            progress: 0.0,
        }
    }

    /// The cached listing already reports this node as fully watched.
    pub fn is_watched(&self) -> bool {
        self.video_complete || self.progress >= 1.0
    }
}

/// Remote progress of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeProgress {
    /// Watched fraction, 0.0 to 1.0.
    pub progress: f64,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub node_id: NodeId,
    /// Seconds of playback claimed so far.
    pub study_time: u64,
    /// Server-side study record; 0 before the first accepted heartbeat.
    pub study_id: i64,
    pub captcha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatReceipt {
    pub study_id: i64,
    pub message: String,
}

/// Calls into the remote course platform for one logged-in account.
#[async_trait]
pub trait StudyClient: Send + Sync {
    /// Authenticate the account the client was created for.
    async fn login(&self) -> Result<(), ClientError>;

    async fn list_courses(&self) -> Result<Vec<Course>, ClientError>;

    async fn list_chapters(&self, course_id: CourseId) -> Result<Vec<Chapter>, ClientError>;

    async fn query_node_progress(&self, node_id: NodeId) -> Result<NodeProgress, ClientError>;

    /// Report continued playback. A captcha demand comes back as
    /// `ClientError::Api { needs_captcha: true, .. }`.
    async fn submit_heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatReceipt, ClientError>;

    /// Fetch the current captcha image.
    async fn captcha_image(&self) -> Result<Vec<u8>, ClientError>;
}

/// External captcha recognition service.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<String, ClientError>;
}

/// Builds one client per account.
pub trait ClientFactory: Send + Sync {
    fn create(&self, user: &UserAccount) -> Arc<dyn StudyClient>;
}
