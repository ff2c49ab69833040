//! Sales-assistant agent: content policy, language-model client, the
//! capability set, email composition and the conversation orchestrator.
//!
//! A turn flows through [`runtime::AgentRuntime::handle_message`]:
//! 1. **Policy** (`guardrails`) sanitizes the message and refuses forbidden content
//! 2. **Prompt** (`conversation`) replays the stored history behind the persona
//! 3. **Capability loop** (`tools`, `capabilities`) runs until the model answers
//! 4. **Persist** appends the completed turn to the conversation store
//!
//! Capability failures never fail a turn: they come back to the model as
//! `❌` strings so it can explain them.

pub mod assembly;
pub mod capabilities;
pub mod conversation;
pub mod email;
pub mod guardrails;
pub mod llm;
pub mod prospects;
pub mod runtime;
pub mod search;
pub mod tools;

pub use assembly::{assemble_runtime, AssemblyError, ExternalServices};
pub use runtime::{AgentRuntime, RuntimeSettings, TurnError, TurnOutcome};
