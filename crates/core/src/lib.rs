pub mod config;
pub mod domain;
pub mod errors;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use domain::conversation::{ConversationRecord, Turn, UserId};
pub use domain::email::EmailDraft;
pub use domain::prospect::{NewProspect, Prospect, ProspectUpdate};
pub use errors::{ApplicationError, DomainError, InterfaceError};
