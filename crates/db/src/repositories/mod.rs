use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use freightdesk_core::domain::session::{ConversationState, SessionId};
use freightdesk_core::flows::{NextStep, TransitionReason, WorkflowNode};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("session `{session_id}` was modified concurrently (expected version {expected})")]
    VersionConflict { session_id: String, expected: u32 },
}

/// Persisted form of one conversation: state plus suspension marker and
/// optimistic-concurrency version. `version == 0` means never saved.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: ConversationState,
    pub pending_node: Option<WorkflowNode>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            state: ConversationState::default(),
            pending_node: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_new(&self) -> bool {
        self.version == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionRecord {
    pub session_id: SessionId,
    pub from_node: WorkflowNode,
    pub to: NextStep,
    pub reason: TransitionReason,
    pub correlation_id: String,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>, RepositoryError>;

    /// Writes the snapshot and appends `transitions` atomically, provided the
    /// stored version still equals `snapshot.version`. Returns the new version.
    async fn save(
        &self,
        snapshot: &SessionSnapshot,
        transitions: &[TransitionRecord],
    ) -> Result<u32, RepositoryError>;

    async fn list_transitions(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<TransitionRecord>, RepositoryError>;
}
