//! Conversation sessions
//!
//! A session binds one patient's script, rubric and question index to a
//! conversation id for as long as the conversation is active. The
//! [`SessionRegistry`] owns every live session.

mod progress;
mod registry;

pub use progress::{LearningProgress, ProgressLog};
pub use registry::{RegistrySettings, SessionRegistry};

use crate::dialog::{DialogGenerator, ReplyKind};
use crate::embedding::VectorStore;
use crate::scoring::ScoreEngine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Identifier of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Key the session's rubric is loaded under
    pub fn session_key(&self) -> String {
        format!("patient_{}", self.0)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConversationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ConversationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one learner turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    /// 1-based turn number within the session
    pub turn: usize,
    pub score: f64,
    pub similarity: f32,
    pub matched_criterion: Option<String>,
    pub nearest_criterion: Option<String>,
    /// Feedback line for the learner's message
    pub feedback: String,
    /// The patient's reply
    pub next_utterance: String,
    pub reply_kind: ReplyKind,
}

/// Aggregate written back when a conversation ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub conversation_id: ConversationId,
    pub turns: usize,
    pub total_score: f64,
    /// Mean per-turn score; 0 when the learner never answered
    pub average_score: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Mutable per-session state, guarded by the session lock
pub(crate) struct SessionState {
    pub(crate) key: String,
    /// Owns the question index the retrieval dialog searches
    pub(crate) store: VectorStore,
    pub(crate) scorer: ScoreEngine,
    pub(crate) dialog: DialogGenerator,
    pub(crate) scores: Vec<f64>,
    /// Set once the session has been ended; later turns are rejected
    pub(crate) closed: bool,
}

/// One active conversation
pub struct Session {
    id: ConversationId,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(id: ConversationId, state: SessionState) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of scored learner turns so far
    pub async fn turn_count(&self) -> usize {
        self.state.lock().await.scores.len()
    }

    /// Sequential script position; 0 in retrieval mode
    pub async fn cursor(&self) -> usize {
        self.state.lock().await.dialog.cursor()
    }

    /// Number of questions in the session's index
    pub async fn question_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .store
            .collection(crate::dialog::DIALOG_COLLECTION)
            .map(|index| index.len())
            .unwrap_or(0)
    }

    pub async fn is_retrieval(&self) -> bool {
        self.state.lock().await.dialog.is_retrieval()
    }
}
