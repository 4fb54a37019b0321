//! Action Resolution & Confirmation Engine
//!
//! This crate turns planner intents into confirmed mutations of record stores:
//! - Entity resolution (ids, shown-list indices, fuzzed free-text queries)
//! - Option normalization for enumerated fields
//! - Create-time duplicate detection
//! - A single pending action per conversation with pick/confirm/cancel
//! - Dispatch of confirmed actions, including batch continuation
//!
//! Collaborators (stores, presenter, option catalog) sit behind the traits in
//! [`ports`]; in-memory and HTTP adapters are included.

pub mod types;

pub mod classify;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fuzzer;
pub mod gateway;
pub mod http_store;
pub mod llm;
pub mod memory;
pub mod options;
pub mod pending;
pub mod ports;
pub mod render;
pub mod resolver;

// Re-export commonly used types at crate root
pub use types::{
    ActionId, ActionKind, Candidate, ConversationId, Domain, Intent, IntentParseError, PendingAction,
    PendingState, Record, ResolvedTarget, ShownItem,
};

pub use classify::{PhraseTable, ReplyDecision};
pub use config::Config;
pub use engine::{Engine, Outcome};
pub use error::{EngineError, MutationError};
pub use executor::ExecutionReport;
pub use gateway::ConfirmationEvent;
pub use ports::{
    Button, Keyboard, ListFilter, MessageRef, OptionCatalog, Presenter, RecordStore, ReplyClassifier,
    ShownLists, Stores,
};
