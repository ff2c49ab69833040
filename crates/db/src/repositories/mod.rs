use async_trait::async_trait;
use thiserror::Error;

use servyy_core::domain::conversation::{Turn, UserId};
use servyy_core::errors::{ApplicationError, DomainError};
use servyy_core::domain::prospect::{NewProspect, Prospect, ProspectUpdate};

pub mod conversation;
pub mod memory;
pub mod prospect;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryProspectRepository};
pub use prospect::SqlProspectRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{key}` already exists")]
    Conflict { entity: &'static str, key: String },
    #[error("{entity} `{key}` was not found")]
    NotFound { entity: &'static str, key: String },
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { entity, key } => {
                Self::Domain(DomainError::DuplicateKey { entity, key })
            }
            RepositoryError::NotFound { entity, key } => {
                Self::Domain(DomainError::NotFound { entity, key })
            }
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => Self::Persistence(message),
        }
    }
}

/// Per-user rolling conversation history.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Appends one turn to the user's record, creating it when absent, then
    /// keeps only the newest `max_stored_turns` turns (0 keeps everything).
    /// Concurrent appends for the same user never lose a turn.
    async fn append_turn(
        &self,
        user_id: &UserId,
        turn: Turn,
        max_stored_turns: usize,
    ) -> Result<(), RepositoryError>;

    /// Newest `limit` turns, oldest first. Unknown users yield an empty list.
    async fn load_recent_turns(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Turn>, RepositoryError>;
}

#[async_trait]
pub trait ProspectRepository: Send + Sync {
    async fn insert(&self, prospect: NewProspect) -> Result<Prospect, RepositoryError>;

    async fn update(
        &self,
        email: &str,
        update: &ProspectUpdate,
    ) -> Result<Prospect, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Prospect>, RepositoryError>;

    /// All prospects ordered by name ascending.
    async fn list_all(&self) -> Result<Vec<Prospect>, RepositoryError>;
}

pub(crate) fn decode_turns(raw: &str) -> Result<Vec<Turn>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid stored turn payload: {error}")))
}

pub(crate) fn encode_turns(turns: &[Turn]) -> Result<String, RepositoryError> {
    serde_json::to_string(turns)
        .map_err(|error| RepositoryError::Decode(format!("could not encode turns: {error}")))
}
